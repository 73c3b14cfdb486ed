// src/routes/booking_routes.rs

use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::ApiError,
    meeting::{MeetingRequest, create_meeting_or_fallback},
    middleware::auth_context::AuthContext,
    models::{
        AppState, NotificationType, Role, SESSION_COLUMNS, SLOT_COLUMNS, SessionRow,
        SessionStatus, SlotRow, THERAPIST_COLUMNS, TherapistRow, VerificationStatus, format_amount,
    },
    payhere::{CheckoutForm, CheckoutParams, Payer, build_checkout_form, generate_order_id},
    routes::{
        availability_routes::{parse_date, parse_time_slot},
        notification_routes::{NewNotification, push_notification},
        patient_routes::load_patient_for_user,
    },
};

pub const ONLINE: &str = "online";
pub const IN_PERSON: &str = "in-person";

pub fn router() -> Router<AppState> {
    Router::new().route("/patient/payment/initiate", post(initiate_booking))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub date: String,
    pub time_slot: String,
    pub session_type: Option<String>,
}

/// Sent as the whole response body, without the `{data}` envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingData {
    pub requires_payment: bool,
    pub session: SessionRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<CheckoutForm>,
}

/// `online` (default) or `in-person`; `in_person` is accepted too.
pub fn normalize_session_type(raw: Option<&str>) -> Result<&'static str, ApiError> {
    let raw = raw.map(str::trim).unwrap_or("");
    match raw.to_ascii_lowercase().replace('_', "-").as_str() {
        "" | "online" => Ok(ONLINE),
        "in-person" => Ok(IN_PERSON),
        _ => Err(ApiError::validation("sessionType must be online or in-person")),
    }
}

/// Free slots book at zero regardless of the therapist's rate.
pub fn booked_rate(slot: &SlotRow, therapist_rate_cents: i64) -> i64 {
    if slot.is_free { 0 } else { therapist_rate_cents.max(0) }
}

/// Slot times are stored without zone and read as UTC.
pub fn scheduled_at(date: NaiveDate, start: NaiveTime) -> DateTime<Utc> {
    date.and_time(start).and_utc()
}

fn slot_unavailable() -> ApiError {
    ApiError::BadRequest("SLOT_UNAVAILABLE", "Selected time slot is not available".into())
}

pub async fn initiate_booking(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BookingRequest>,
) -> Result<Json<BookingData>, ApiError> {
    auth.require(&[Role::Patient])?;

    let patient = load_patient_for_user(&state, auth.user_id).await?;
    let therapist_id = patient.primary_therapist_id.ok_or_else(|| {
        ApiError::BadRequest("NO_THERAPIST", "No therapist assigned".into())
    })?;

    let date = parse_date(&req.date, "date")?;
    let range = parse_time_slot(&req.time_slot)?;
    let session_type = normalize_session_type(req.session_type.as_deref())?;

    let sql = format!(
        r#"
        SELECT {SLOT_COLUMNS}
        FROM availability_slot
        WHERE therapist_id = $1
          AND slot_date = $2
          AND start_time = $3
          AND is_booked = false
          AND is_blocked = false
        "#
    );
    let slot: SlotRow = sqlx::query_as::<_, SlotRow>(&sql)
        .bind(therapist_id)
        .bind(date)
        .bind(range.start)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(slot_unavailable)?;
    if range.end.is_some_and(|end| end != slot.end_time) {
        return Err(slot_unavailable());
    }

    // same filter as the patient-facing therapist directory
    let sql = format!(
        r#"
        SELECT {THERAPIST_COLUMNS}
        FROM therapist t
        WHERE t.therapist_id = $1
          AND t.verification_status = $2
          AND EXISTS (
              SELECT 1 FROM app_user u
              WHERE u.user_id = t.user_id AND u.is_active = true
          )
        "#
    );
    let therapist: TherapistRow = sqlx::query_as::<_, TherapistRow>(&sql)
        .bind(therapist_id)
        .bind(VerificationStatus::Verified)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest(
                "THERAPIST_UNAVAILABLE",
                "Your therapist is not currently accepting bookings".into(),
            )
        })?;

    let rate = booked_rate(&slot, therapist.session_rate_cents);
    let requires_payment = rate > 0;

    let credentials = if requires_payment {
        let Some((merchant_id, secret)) = state.payhere.credentials() else {
            tracing::error!("payhere credentials missing, refusing paid booking");
            return Err(ApiError::Internal("Payment gateway is not configured".into()));
        };
        Some((merchant_id.to_string(), secret.to_string()))
    } else {
        None
    };

    let start = scheduled_at(date, slot.start_time);
    let end = scheduled_at(date, slot.end_time);
    let duration_minutes = (end - start).num_minutes() as i32;

    let mut tx = state.db.begin().await?;

    // a concurrent booking that committed first leaves 0 rows here
    let flagged: Option<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE availability_slot
        SET is_booked = true,
            updated_at = now()
        WHERE slot_id = $1
          AND is_booked = false
          AND is_blocked = false
        RETURNING slot_id
        "#,
    )
    .bind(slot.slot_id)
    .fetch_optional(&mut *tx)
    .await?;
    if flagged.is_none() {
        return Err(slot_unavailable());
    }

    // only once the slot is ours, so a lost race leaves no calendar event behind
    let meeting = if session_type == ONLINE {
        let request = MeetingRequest {
            access_token: therapist.google_access_token.clone(),
            summary: format!("Therapy session with {} {}", patient.first_name, patient.last_name),
            start,
            end,
            attendees: vec![auth.email.clone()],
        };
        Some(create_meeting_or_fallback(state.meetings.as_ref(), &request).await)
    } else {
        None
    };

    let sql = format!(
        r#"
        INSERT INTO therapy_session (
            patient_id, therapist_id, availability_slot_id, scheduled_at, duration_minutes,
            session_type, status, booked_rate_cents, meeting_link, calendar_event_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {SESSION_COLUMNS}
        "#
    );
    let session: SessionRow = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(patient.patient_id)
        .bind(therapist_id)
        .bind(slot.slot_id)
        .bind(start)
        .bind(duration_minutes)
        .bind(session_type)
        .bind(SessionStatus::Scheduled)
        .bind(rate)
        .bind(meeting.as_ref().map(|m| m.meeting_link.as_str()))
        .bind(meeting.as_ref().and_then(|m| m.event_id.as_deref()))
        .fetch_one(&mut *tx)
        .await?;

    let payment_data = match &credentials {
        Some((merchant_id, secret)) => {
            let order_id = generate_order_id();
            let metadata = json!({
                "patientId": patient.patient_id,
                "therapistId": therapist_id,
                "slotId": slot.slot_id,
                "sessionType": session_type,
                "amount": format_amount(rate),
            });

            sqlx::query(
                r#"
                INSERT INTO payment (order_id, session_id, amount_cents, currency, metadata)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&order_id)
            .bind(session.session_id)
            .bind(rate)
            .bind(&state.payhere.currency)
            .bind(sqlx::types::Json(metadata))
            .execute(&mut *tx)
            .await?;

            let payer = Payer {
                first_name: patient.first_name.clone(),
                last_name: patient.last_name.clone(),
                email: auth.email.clone(),
                phone: patient.phone.clone(),
            };
            Some(build_checkout_form(CheckoutParams {
                merchant_id,
                merchant_secret: secret,
                app_base_url: &state.app_base_url,
                order_id: &order_id,
                amount_cents: rate,
                currency: &state.payhere.currency,
                session_id: session.session_id,
                description: format!("Therapy session {date} {}", slot.start_time.format("%H:%M")),
                payer: &payer,
            }))
        }
        None => None,
    };

    tx.commit().await?;

    tracing::info!(
        session_id = %session.session_id,
        slot_id = %slot.slot_id,
        requires_payment,
        "session booked"
    );

    let message = format!(
        "{} {} booked a session on {} at {}",
        patient.first_name,
        patient.last_name,
        date,
        slot.start_time.format("%H:%M")
    );
    push_notification(
        &state,
        NewNotification {
            sender: Some(auth.user_id),
            receiver: therapist.user_id,
            kind: NotificationType::SessionBooked,
            message: &message,
            urgent: false,
        },
    )
    .await;

    Ok(Json(BookingData {
        requires_payment,
        session,
        payment_url: requires_payment.then(|| state.payhere.checkout_url()),
        payment_data,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use axum::http::StatusCode;
    use serde_json::Value;
    use sqlx::PgPool;
    use tower::ServiceExt;

    use crate::meeting::MeetingProvider;
    use crate::models::PaymentStatus;
    use crate::routes::{
        router,
        testing::{CountingMeetings, NoMeetings, body_json, insert_user, json_request, login_as, state_with},
    };

    use super::*;

    fn slot(is_free: bool) -> SlotRow {
        SlotRow {
            slot_id: Uuid::new_v4(),
            therapist_id: Uuid::new_v4(),
            slot_date: NaiveDate::from_ymd_opt(2024, 7, 22).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(9, 45, 0).unwrap(),
            is_booked: false,
            is_free,
            is_blocked: false,
        }
    }

    fn session(rate: i64) -> SessionRow {
        let now = Utc::now();
        SessionRow {
            session_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            therapist_id: Uuid::new_v4(),
            availability_slot_id: Uuid::new_v4(),
            scheduled_at: scheduled_at(
                NaiveDate::from_ymd_opt(2024, 7, 22).unwrap(),
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            ),
            duration_minutes: 45,
            session_type: ONLINE.into(),
            status: SessionStatus::Scheduled,
            booked_rate_cents: rate,
            meeting_link: None,
            calendar_event_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn free_slot_books_at_zero() {
        assert_eq!(booked_rate(&slot(true), 150000), 0);
        assert_eq!(booked_rate(&slot(false), 150000), 150000);
        assert_eq!(booked_rate(&slot(false), 0), 0);
    }

    #[test]
    fn session_types_are_normalized() {
        assert_eq!(normalize_session_type(None).unwrap(), ONLINE);
        assert_eq!(normalize_session_type(Some(" Online ")).unwrap(), ONLINE);
        assert_eq!(normalize_session_type(Some("in_person")).unwrap(), IN_PERSON);
        assert_eq!(normalize_session_type(Some("IN-PERSON")).unwrap(), IN_PERSON);
        assert!(normalize_session_type(Some("phone")).is_err());
    }

    #[test]
    fn free_booking_response_has_no_payment_fields() {
        let data = BookingData {
            requires_payment: false,
            session: session(0),
            payment_url: None,
            payment_data: None,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["requiresPayment"], false);
        assert_eq!(json["session"]["scheduledAt"], "2024-07-22T09:00:00.000Z");
        assert_eq!(json["session"]["status"], "SCHEDULED");
        assert_eq!(json["session"]["bookedRateCents"], 0);
        assert!(json.get("paymentUrl").is_none());
        assert!(json.get("paymentData").is_none());
    }

    #[test]
    fn paid_booking_carries_signed_checkout() {
        let payer = Payer {
            first_name: "Nimal".into(),
            last_name: "Perera".into(),
            email: "nimal@example.com".into(),
            phone: None,
        };
        let s = session(150000);
        let form = build_checkout_form(CheckoutParams {
            merchant_id: "1211149",
            merchant_secret: "secret123",
            app_base_url: "http://localhost:3000",
            order_id: "ORD-1",
            amount_cents: s.booked_rate_cents,
            currency: "LKR",
            session_id: s.session_id,
            description: "Therapy session".into(),
            payer: &payer,
        });
        let data = BookingData {
            requires_payment: true,
            session: s,
            payment_url: Some("https://sandbox.payhere.lk/pay/checkout"),
            payment_data: Some(form),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["requiresPayment"], true);
        assert_eq!(json["paymentData"]["amount"], "1500.00");
        assert_eq!(json["paymentData"]["hash"], "B75F46E1700095509FBB531A8683AA9C");
        assert_eq!(json["paymentUrl"], "https://sandbox.payhere.lk/pay/checkout");
    }

    /* -------------------------
       Against a migrated database
       ------------------------- */

    const RATE: i64 = 150000;

    struct Fixture {
        token: String,
        therapist_id: Uuid,
    }

    async fn seed(db: &PgPool, verification: VerificationStatus) -> Fixture {
        let therapist_user = insert_user(db, "therapist@example.com", Role::Therapist).await;
        let therapist_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO therapist (user_id, session_rate_cents, verification_status)
            VALUES ($1, $2, $3)
            RETURNING therapist_id
            "#,
        )
        .bind(therapist_user)
        .bind(RATE)
        .bind(verification)
        .fetch_one(db)
        .await
        .unwrap();

        let patient_user = insert_user(db, "patient@example.com", Role::Patient).await;
        sqlx::query(
            r#"
            INSERT INTO patient (user_id, first_name, last_name, primary_therapist_id)
            VALUES ($1, 'Nimal', 'Perera', $2)
            "#,
        )
        .bind(patient_user)
        .bind(therapist_id)
        .execute(db)
        .await
        .unwrap();

        Fixture {
            token: login_as(db, patient_user).await,
            therapist_id,
        }
    }

    async fn add_slot(db: &PgPool, therapist_id: Uuid, start: &str, is_free: bool) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO availability_slot (therapist_id, slot_date, start_time, end_time, is_free)
            VALUES ($1, '2030-07-22', $2::time, $2::time + interval '45 minutes', $3)
            RETURNING slot_id
            "#,
        )
        .bind(therapist_id)
        .bind(start)
        .bind(is_free)
        .fetch_one(db)
        .await
        .unwrap()
    }

    async fn book(
        db: &PgPool,
        meetings: Arc<dyn MeetingProvider>,
        token: &str,
        time_slot: &str,
    ) -> (StatusCode, Value) {
        let app = router(state_with(db.clone(), meetings));
        let resp = app
            .oneshot(json_request(
                "POST",
                "/api/patient/payment/initiate",
                Some(token),
                serde_json::json!({ "date": "2030-07-22", "timeSlot": time_slot }),
            ))
            .await
            .unwrap();
        (resp.status(), body_json(resp).await)
    }

    async fn count(db: &PgPool, sql: &str, slot_id: Uuid) -> i64 {
        sqlx::query_scalar(sql).bind(slot_id).fetch_one(db).await.unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn free_slot_books_without_payment(db: PgPool) {
        let fx = seed(&db, VerificationStatus::Verified).await;
        let slot_id = add_slot(&db, fx.therapist_id, "09:00", true).await;

        let (status, json) = book(&db, Arc::new(NoMeetings), &fx.token, "09:00-09:45").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["requiresPayment"], false);
        assert!(json.get("data").is_none());
        assert_eq!(json["session"]["scheduledAt"], "2030-07-22T09:00:00.000Z");
        assert_eq!(json["session"]["bookedRateCents"], 0);
        assert!(json.get("paymentData").is_none());

        let booked: bool = sqlx::query_scalar("SELECT is_booked FROM availability_slot WHERE slot_id = $1")
            .bind(slot_id)
            .fetch_one(&db)
            .await
            .unwrap();
        assert!(booked);
        let payments = count(
            &db,
            "SELECT count(*) FROM payment p JOIN therapy_session s USING (session_id) \
             WHERE s.availability_slot_id = $1",
            slot_id,
        )
        .await;
        assert_eq!(payments, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn paid_slot_creates_one_pending_payment_at_therapist_rate(db: PgPool) {
        let fx = seed(&db, VerificationStatus::Verified).await;
        let slot_id = add_slot(&db, fx.therapist_id, "10:00", false).await;

        let (status, json) = book(&db, Arc::new(NoMeetings), &fx.token, "10:00").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["requiresPayment"], true);
        assert_eq!(json["session"]["bookedRateCents"], RATE);
        assert_eq!(json["paymentData"]["amount"], "1500.00");
        assert_eq!(json["paymentUrl"], "https://sandbox.payhere.lk/pay/checkout");

        let rows: Vec<(i64, PaymentStatus)> = sqlx::query_as(
            r#"
            SELECT p.amount_cents, p.status
            FROM payment p
            JOIN therapy_session s USING (session_id)
            WHERE s.availability_slot_id = $1
            "#,
        )
        .bind(slot_id)
        .fetch_all(&db)
        .await
        .unwrap();
        assert_eq!(rows, vec![(RATE, PaymentStatus::Pending)]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn concurrent_bookings_of_one_slot_succeed_once(db: PgPool) {
        let fx = seed(&db, VerificationStatus::Verified).await;
        let slot_id = add_slot(&db, fx.therapist_id, "11:00", true).await;
        let meetings = Arc::new(CountingMeetings::default());

        let (a, b) = tokio::join!(
            book(&db, meetings.clone(), &fx.token, "11:00-11:45"),
            book(&db, meetings.clone(), &fx.token, "11:00-11:45"),
        );

        let mut statuses = vec![a.0, b.0];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::BAD_REQUEST]);
        let loser = if a.0 == StatusCode::BAD_REQUEST { a.1 } else { b.1 };
        assert_eq!(loser["code"], "SLOT_UNAVAILABLE");

        let sessions = count(
            &db,
            "SELECT count(*) FROM therapy_session WHERE availability_slot_id = $1",
            slot_id,
        )
        .await;
        assert_eq!(sessions, 1);
        // the losing request never reached the calendar
        assert_eq!(meetings.calls.load(Ordering::SeqCst), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn booked_slot_rejects_second_booking(db: PgPool) {
        let fx = seed(&db, VerificationStatus::Verified).await;
        add_slot(&db, fx.therapist_id, "12:00", true).await;
        let meetings = Arc::new(CountingMeetings::default());

        let (first, _) = book(&db, meetings.clone(), &fx.token, "12:00").await;
        let (second, json) = book(&db, meetings.clone(), &fx.token, "12:00").await;

        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "SLOT_UNAVAILABLE");
        assert_eq!(meetings.calls.load(Ordering::SeqCst), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unverified_therapist_cannot_be_booked(db: PgPool) {
        let fx = seed(&db, VerificationStatus::PendingReview).await;
        let slot_id = add_slot(&db, fx.therapist_id, "13:00", true).await;

        let (status, json) = book(&db, Arc::new(NoMeetings), &fx.token, "13:00").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "THERAPIST_UNAVAILABLE");
        let sessions = count(
            &db,
            "SELECT count(*) FROM therapy_session WHERE availability_slot_id = $1",
            slot_id,
        )
        .await;
        assert_eq!(sessions, 0);
    }
}
