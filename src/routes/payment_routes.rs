// src/routes/payment_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, NotificationType, PAYMENT_COLUMNS, PaymentRow, PaymentStatus, Role,
        SessionStatus, format_amount,
    },
    payhere::{NotifyForm, NotifyOutcome, PayHereError},
    routes::{
        notification_routes::{NewNotification, push_notification},
        patient_routes::load_patient_for_user,
        session_routes::release_slot,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payment/notify", post(payment_notify))
        .route("/patient/payments/{order_id}", get(get_payment))
}

/// `None` leaves the payment as it is. Terminal payments never move again.
pub fn next_payment_status(current: PaymentStatus, outcome: NotifyOutcome) -> Option<PaymentStatus> {
    if current != PaymentStatus::Pending {
        return None;
    }
    match outcome {
        NotifyOutcome::Success => Some(PaymentStatus::Complete),
        NotifyOutcome::Failed => Some(PaymentStatus::Failed),
        NotifyOutcome::Pending => None,
    }
}

impl From<PayHereError> for ApiError {
    fn from(e: PayHereError) -> Self {
        match e {
            PayHereError::MissingCredentials => ApiError::Internal(e.to_string()),
            PayHereError::BadSignature | PayHereError::MerchantMismatch => {
                ApiError::BadRequest("INVALID_SIGNATURE", e.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyAck {
    pub order_id: String,
    pub status: PaymentStatus,
    pub changed: bool,
}

/// Server-to-server callback from the gateway.
pub async fn payment_notify(
    State(state): State<AppState>,
    Form(form): Form<NotifyForm>,
) -> Result<Json<ApiOk<NotifyAck>>, ApiError> {
    let (merchant_id, secret) = state
        .payhere
        .credentials()
        .ok_or(PayHereError::MissingCredentials)?;

    let outcome = match form.verify(merchant_id, secret) {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(order_id = %form.order_id, error = %e, "rejected payment notification");
            return Err(e.into());
        }
    };

    let mut tx = state.db.begin().await?;

    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payment WHERE order_id = $1 FOR UPDATE");
    let payment: PaymentRow = sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(&form.order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("payment not found"))?;

    if outcome == NotifyOutcome::Success
        && (form.payhere_amount.trim() != format_amount(payment.amount_cents)
            || !form.payhere_currency.eq_ignore_ascii_case(&payment.currency))
    {
        tracing::warn!(
            order_id = %form.order_id,
            paid = %form.payhere_amount,
            expected = payment.amount_cents,
            "payment amount mismatch"
        );
        return Err(ApiError::BadRequest(
            "AMOUNT_MISMATCH",
            "Paid amount does not match the order".into(),
        ));
    }

    let Some(next) = next_payment_status(payment.status, outcome) else {
        tx.commit().await?;
        tracing::info!(order_id = %form.order_id, status = ?payment.status, "payment notification ignored");
        return Ok(Json(ApiOk {
            data: NotifyAck {
                order_id: payment.order_id,
                status: payment.status,
                changed: false,
            },
        }));
    };

    let gateway = json!({
        "payherePaymentId": form.payment_id,
        "method": form.method,
        "statusCode": form.status_code,
        "statusMessage": form.status_message,
    });

    sqlx::query(
        r#"
        UPDATE payment
        SET status = $2,
            metadata = metadata || $3,
            updated_at = now()
        WHERE payment_id = $1
        "#,
    )
    .bind(payment.payment_id)
    .bind(next)
    .bind(sqlx::types::Json(gateway))
    .execute(&mut *tx)
    .await?;

    if next == PaymentStatus::Failed {
        let slot_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE therapy_session
            SET status = $2,
                updated_at = now()
            WHERE session_id = $1
              AND status = $3
            RETURNING availability_slot_id
            "#,
        )
        .bind(payment.session_id)
        .bind(SessionStatus::Cancelled)
        .bind(SessionStatus::Scheduled)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(slot_id) = slot_id {
            release_slot(&mut tx, slot_id).await?;
        }
    }

    tx.commit().await?;
    tracing::info!(order_id = %payment.order_id, status = ?next, "payment updated");

    let receiver: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT COALESCE(p.user_id, p.guardian_user_id)
        FROM therapy_session s
        JOIN patient p ON p.patient_id = s.patient_id
        WHERE s.session_id = $1
        "#,
    )
    .bind(payment.session_id)
    .fetch_optional(&state.db)
    .await?
    .flatten();

    if let Some(receiver) = receiver {
        let message = match next {
            PaymentStatus::Complete => format!("Payment {} received, your session is confirmed", payment.order_id),
            _ => format!("Payment {} failed, the session was cancelled", payment.order_id),
        };
        push_notification(
            &state,
            NewNotification {
                sender: None,
                receiver,
                kind: NotificationType::Payment,
                message: &message,
                urgent: next == PaymentStatus::Failed,
            },
        )
        .await;
    }

    Ok(Json(ApiOk {
        data: NotifyAck {
            order_id: payment.order_id,
            status: next,
            changed: true,
        },
    }))
}

pub async fn get_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(order_id): Path<String>,
) -> Result<Json<ApiOk<PaymentRow>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient = load_patient_for_user(&state, auth.user_id).await?;

    let sql = format!(
        r#"
        SELECT {cols}
        FROM payment pay
        JOIN therapy_session s ON s.session_id = pay.session_id
        WHERE pay.order_id = $1
          AND s.patient_id = $2
        "#,
        cols = PAYMENT_COLUMNS
            .split(',')
            .map(|c| format!("pay.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let payment = sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(order_id.trim())
        .bind(patient.patient_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("payment not found"))?;

    Ok(Json(ApiOk { data: payment }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_payments_transition() {
        assert_eq!(
            next_payment_status(PaymentStatus::Pending, NotifyOutcome::Success),
            Some(PaymentStatus::Complete)
        );
        assert_eq!(
            next_payment_status(PaymentStatus::Pending, NotifyOutcome::Failed),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(next_payment_status(PaymentStatus::Pending, NotifyOutcome::Pending), None);
        assert_eq!(next_payment_status(PaymentStatus::Complete, NotifyOutcome::Failed), None);
        assert_eq!(next_payment_status(PaymentStatus::Failed, NotifyOutcome::Success), None);
    }

    #[test]
    fn gateway_errors_map_to_http() {
        assert_eq!(
            ApiError::from(PayHereError::BadSignature).status(),
            axum::http::StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(PayHereError::MissingCredentials).status(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn notify_form_parses_urlencoded_body() {
        use axum::extract::FromRequest;

        let body = "merchant_id=1211149&order_id=ORD-1&payment_id=320025071278&payhere_amount=1500.00\
                    &payhere_currency=LKR&status_code=2&md5sig=59312EC9E0DE05993B824AFDF870A26B&method=VISA";
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/payment/notify")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(axum::body::Body::from(body))
            .unwrap();

        let Form(form) = Form::<NotifyForm>::from_request(req, &()).await.unwrap();
        assert_eq!(form.status_code, 2);
        assert_eq!(form.status_message, None);
        assert_eq!(form.verify("1211149", "secret123"), Ok(NotifyOutcome::Success));
    }
}
