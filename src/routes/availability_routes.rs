// src/routes/availability_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role, SLOT_COLUMNS, SlotRow},
    routes::{patient_routes::load_patient_for_user, therapist_routes::load_therapist_for_user},
};

const MAX_RANGE_DAYS: i64 = 31;
const MAX_SLOTS_PER_REQUEST: usize = 48;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/therapist/availability",
            get(list_own_slots).post(create_slots),
        )
        .route("/therapist/availability/{slot_id}", patch(update_slot))
        .route("/patient/sessions/available-slots", get(available_slots))
}

/* ============================================================
   Parsing helpers
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
}

impl TimeRange {
    pub fn end_or_default(&self, default_minutes: i64) -> Result<NaiveTime, ApiError> {
        if let Some(end) = self.end {
            return Ok(end);
        }
        let (end, wrapped) = self
            .start
            .overflowing_add_signed(Duration::minutes(default_minutes));
        if wrapped != 0 {
            return Err(ApiError::validation("time slot would run past midnight"));
        }
        Ok(end)
    }
}

pub fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation(format!("{field} must be YYYY-MM-DD")))
}

fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// Accepts `"09:00-09:45"` or a bare start `"09:00"`.
pub fn parse_time_slot(raw: &str) -> Result<TimeRange, ApiError> {
    let invalid = || ApiError::validation(format!("invalid time slot '{raw}', expected HH:MM-HH:MM"));

    let (start, end) = match raw.split_once('-') {
        Some((s, e)) => (parse_hhmm(s).ok_or_else(invalid)?, Some(parse_hhmm(e).ok_or_else(invalid)?)),
        None => (parse_hhmm(raw).ok_or_else(invalid)?, None),
    };

    if let Some(end) = end {
        if end <= start {
            return Err(ApiError::validation(format!("time slot '{raw}' ends before it starts")));
        }
    }
    Ok(TimeRange { start, end })
}

/* ============================================================
   Therapist: GET /therapist/availability
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: Option<String>,
    pub days: Option<i64>,
}

pub async fn list_own_slots(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<RangeQuery>,
) -> Result<Json<ApiOk<Vec<SlotRow>>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    let therapist = load_therapist_for_user(&state, auth.user_id).await?;

    let days = q.days.unwrap_or(7);
    if !(1..=MAX_RANGE_DAYS).contains(&days) {
        return Err(ApiError::validation(format!("days must be between 1 and {MAX_RANGE_DAYS}")));
    }
    let start = match q.start.as_deref() {
        Some(s) => parse_date(s, "start")?,
        None => Utc::now().date_naive(),
    };
    let end = start + Duration::days(days);

    let sql = format!(
        r#"
        SELECT {SLOT_COLUMNS}
        FROM availability_slot
        WHERE therapist_id = $1
          AND slot_date >= $2
          AND slot_date < $3
        ORDER BY slot_date ASC, start_time ASC
        "#
    );
    let rows: Vec<SlotRow> = sqlx::query_as::<_, SlotRow>(&sql)
        .bind(therapist.therapist_id)
        .bind(start)
        .bind(end)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   Therapist: POST /therapist/availability
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSlotsRequest {
    pub date: String,
    pub time_slots: Vec<String>,
    pub is_free: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSlotsData {
    pub created: Vec<SlotRow>,
    pub skipped: Vec<String>,
}

pub async fn create_slots(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateSlotsRequest>,
) -> Result<Json<ApiOk<CreateSlotsData>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    let therapist = load_therapist_for_user(&state, auth.user_id).await?;

    let date = parse_date(&req.date, "date")?;
    if date < Utc::now().date_naive() {
        return Err(ApiError::validation("cannot add availability in the past"));
    }
    if req.time_slots.is_empty() {
        return Err(ApiError::validation("timeSlots must not be empty"));
    }
    if req.time_slots.len() > MAX_SLOTS_PER_REQUEST {
        return Err(ApiError::validation(format!(
            "at most {MAX_SLOTS_PER_REQUEST} slots per request"
        )));
    }

    let ranges = req
        .time_slots
        .iter()
        .map(|raw| parse_time_slot(raw).map(|r| (raw.clone(), r)))
        .collect::<Result<Vec<_>, _>>()?;
    let is_free = req.is_free.unwrap_or(false);

    let mut tx = state.db.begin().await?;
    let mut created = Vec::new();
    let mut skipped = Vec::new();

    let sql = format!(
        r#"
        INSERT INTO availability_slot (therapist_id, slot_date, start_time, end_time, is_free)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (therapist_id, slot_date, start_time) DO NOTHING
        RETURNING {SLOT_COLUMNS}
        "#
    );

    for (raw, range) in ranges {
        let row: Option<SlotRow> = sqlx::query_as::<_, SlotRow>(&sql)
            .bind(therapist.therapist_id)
            .bind(date)
            .bind(range.start)
            .bind(range.end_or_default(state.default_session_minutes)?)
            .bind(is_free)
            .fetch_optional(&mut *tx)
            .await?;

        match row {
            Some(slot) => created.push(slot),
            None => skipped.push(raw),
        }
    }

    tx.commit().await?;
    tracing::info!(
        therapist_id = %therapist.therapist_id,
        %date,
        created = created.len(),
        skipped = skipped.len(),
        "availability updated"
    );

    Ok(Json(ApiOk {
        data: CreateSlotsData { created, skipped },
    }))
}

/* ============================================================
   Therapist: PATCH /therapist/availability/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSlotRequest {
    pub is_free: Option<bool>,
    pub is_blocked: Option<bool>,
}

pub async fn update_slot(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(slot_id): Path<Uuid>,
    Json(req): Json<UpdateSlotRequest>,
) -> Result<Json<ApiOk<SlotRow>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    let therapist = load_therapist_for_user(&state, auth.user_id).await?;

    if req.is_free.is_none() && req.is_blocked.is_none() {
        return Err(ApiError::validation("nothing to update"));
    }

    let sql = format!(
        r#"
        UPDATE availability_slot
        SET is_free = COALESCE($3, is_free),
            is_blocked = COALESCE($4, is_blocked),
            updated_at = now()
        WHERE slot_id = $1
          AND therapist_id = $2
          AND is_booked = false
        RETURNING {SLOT_COLUMNS}
        "#
    );
    let updated: Option<SlotRow> = sqlx::query_as::<_, SlotRow>(&sql)
        .bind(slot_id)
        .bind(therapist.therapist_id)
        .bind(req.is_free)
        .bind(req.is_blocked)
        .fetch_optional(&state.db)
        .await?;

    if let Some(slot) = updated {
        return Ok(Json(ApiOk { data: slot }));
    }

    // tell "booked" apart from "not yours / missing"
    let booked: Option<bool> = sqlx::query_scalar(
        r#"SELECT is_booked FROM availability_slot WHERE slot_id = $1 AND therapist_id = $2"#,
    )
    .bind(slot_id)
    .bind(therapist.therapist_id)
    .fetch_optional(&state.db)
    .await?;

    match booked {
        Some(true) => Err(ApiError::Conflict(
            "SLOT_BOOKED",
            "A booked slot cannot be changed".into(),
        )),
        _ => Err(ApiError::not_found("slot not found")),
    }
}

/* ============================================================
   Patient: GET /patient/sessions/available-slots
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct AvailableQuery {
    pub date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlot {
    #[serde(flatten)]
    pub slot: SlotRow,
    pub time_slot: String,
    pub is_available: bool,
}

impl From<SlotRow> for AvailableSlot {
    fn from(slot: SlotRow) -> Self {
        AvailableSlot {
            time_slot: format!(
                "{}-{}",
                slot.start_time.format("%H:%M"),
                slot.end_time.format("%H:%M")
            ),
            is_available: slot.is_available(),
            slot,
        }
    }
}

pub async fn available_slots(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<AvailableQuery>,
) -> Result<Json<ApiOk<Vec<AvailableSlot>>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let date = parse_date(&q.date, "date")?;

    let patient = load_patient_for_user(&state, auth.user_id).await?;
    let therapist_id = patient.primary_therapist_id.ok_or_else(|| {
        ApiError::BadRequest("NO_THERAPIST", "No therapist assigned".into())
    })?;

    let sql = format!(
        r#"
        SELECT {SLOT_COLUMNS}
        FROM availability_slot
        WHERE therapist_id = $1
          AND slot_date = $2
        ORDER BY start_time ASC
        "#
    );
    let rows: Vec<SlotRow> = sqlx::query_as::<_, SlotRow>(&sql)
        .bind(therapist_id)
        .bind(date)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiOk {
        data: rows.into_iter().map(AvailableSlot::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parses_start_and_end() {
        let r = parse_time_slot("09:00-09:45").unwrap();
        assert_eq!(r.start, t(9, 0));
        assert_eq!(r.end, Some(t(9, 45)));
        assert_eq!(r.end_or_default(60).unwrap(), t(9, 45));
    }

    #[test]
    fn bare_start_uses_default_duration() {
        let r = parse_time_slot(" 14:30 ").unwrap();
        assert_eq!(r.end, None);
        assert_eq!(r.end_or_default(45).unwrap(), t(15, 15));
    }

    #[test]
    fn default_duration_cannot_cross_midnight() {
        let r = parse_time_slot("23:30").unwrap();
        assert!(r.end_or_default(45).is_err());
    }

    #[test]
    fn rejects_malformed_slots() {
        assert!(parse_time_slot("9am").is_err());
        assert!(parse_time_slot("10:00-09:00").is_err());
        assert!(parse_time_slot("10:00-10:00").is_err());
        assert!(parse_time_slot("25:00-26:00").is_err());
        assert!(parse_time_slot("").is_err());
    }

    #[test]
    fn dates_are_iso() {
        assert_eq!(
            parse_date("2024-07-22", "date").unwrap(),
            NaiveDate::from_ymd_opt(2024, 7, 22).unwrap()
        );
        assert!(parse_date("22/07/2024", "date").is_err());
    }

    #[test]
    fn available_slot_view() {
        let slot = SlotRow {
            slot_id: Uuid::new_v4(),
            therapist_id: Uuid::new_v4(),
            slot_date: NaiveDate::from_ymd_opt(2024, 7, 22).unwrap(),
            start_time: t(9, 0),
            end_time: t(9, 45),
            is_booked: false,
            is_free: false,
            is_blocked: true,
        };
        let view = AvailableSlot::from(slot);
        assert_eq!(view.time_slot, "09:00-09:45");
        assert!(!view.is_available);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["timeSlot"], "09:00-09:45");
        assert_eq!(json["isBlocked"], true);
        assert_eq!(json["isAvailable"], false);
    }
}
