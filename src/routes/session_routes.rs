// src/routes/session_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, NotificationType, PaymentStatus, Role, SESSION_COLUMNS, SessionRow,
        SessionStatus,
    },
    routes::{
        notification_routes::{NewNotification, push_notification},
        patient_routes::load_patient_for_user,
        therapist_routes::load_therapist_for_user,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patient/sessions", get(list_patient_sessions))
        .route("/patient/sessions/{session_id}/cancel", post(cancel_own_session))
        .route("/therapist/sessions", get(list_therapist_sessions))
        .route("/therapist/sessions/{session_id}/status", patch(update_session_status))
}

/// Frees the slot behind a session that is no longer live.
pub async fn release_slot(conn: &mut PgConnection, slot_id: Uuid) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        UPDATE availability_slot
        SET is_booked = false,
            updated_at = now()
        WHERE slot_id = $1
        "#,
    )
    .bind(slot_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// A pending payment of a cancelled session can never complete.
pub async fn fail_pending_payment(conn: &mut PgConnection, session_id: Uuid) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        UPDATE payment
        SET status = $2,
            updated_at = now()
        WHERE session_id = $1
          AND status = $3
        "#,
    )
    .bind(session_id)
    .bind(PaymentStatus::Failed)
    .bind(PaymentStatus::Pending)
    .execute(conn)
    .await?;
    Ok(())
}

/// Only SCHEDULED sessions move, and only to a terminal state.
pub fn check_transition(from: SessionStatus, to: SessionStatus) -> Result<(), ApiError> {
    match (from, to) {
        (SessionStatus::Scheduled, SessionStatus::Completed | SessionStatus::Cancelled) => Ok(()),
        (SessionStatus::Scheduled, SessionStatus::Scheduled) => {
            Err(ApiError::validation("status must be COMPLETED or CANCELLED"))
        }
        _ => Err(ApiError::Conflict(
            "SESSION_CLOSED",
            "Session is already completed or cancelled".into(),
        )),
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub session: SessionRow,
    pub counterpart_name: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<SessionStatus>,
}

/* ============================================================
   Patient
   ============================================================ */

pub async fn list_patient_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<StatusQuery>,
) -> Result<Json<ApiOk<Vec<SessionListItem>>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient = load_patient_for_user(&state, auth.user_id).await?;

    let sql = format!(
        r#"
        SELECT {cols}, u.name AS counterpart_name
        FROM therapy_session s
        JOIN therapist t ON t.therapist_id = s.therapist_id
        JOIN app_user u ON u.user_id = t.user_id
        WHERE s.patient_id = $1
          AND ($2::smallint IS NULL OR s.status = $2)
        ORDER BY s.scheduled_at DESC
        "#,
        cols = prefixed_session_columns("s")
    );
    let rows = sqlx::query_as::<_, SessionListItem>(&sql)
        .bind(patient.patient_id)
        .bind(q.status)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn cancel_own_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ApiOk<SessionRow>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient = load_patient_for_user(&state, auth.user_id).await?;

    let mut tx = state.db.begin().await?;

    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM therapy_session WHERE session_id = $1 AND patient_id = $2 FOR UPDATE"
    );
    let current: SessionRow = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(session_id)
        .bind(patient.patient_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("session not found"))?;

    check_transition(current.status, SessionStatus::Cancelled)?;
    let updated = set_status(&mut tx, session_id, SessionStatus::Cancelled).await?;
    release_slot(&mut tx, updated.availability_slot_id).await?;
    fail_pending_payment(&mut tx, session_id).await?;

    tx.commit().await?;
    tracing::info!(session_id = %session_id, "session cancelled by patient");

    let therapist_user: Option<Uuid> =
        sqlx::query_scalar(r#"SELECT user_id FROM therapist WHERE therapist_id = $1"#)
            .bind(updated.therapist_id)
            .fetch_optional(&state.db)
            .await?;
    if let Some(receiver) = therapist_user {
        let message = format!(
            "{} {} cancelled the session on {}",
            patient.first_name,
            patient.last_name,
            updated.scheduled_at.format("%Y-%m-%d %H:%M")
        );
        push_notification(
            &state,
            NewNotification {
                sender: Some(auth.user_id),
                receiver,
                kind: NotificationType::SessionCancelled,
                message: &message,
                urgent: true,
            },
        )
        .await;
    }

    Ok(Json(ApiOk { data: updated }))
}

/* ============================================================
   Therapist
   ============================================================ */

pub async fn list_therapist_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<StatusQuery>,
) -> Result<Json<ApiOk<Vec<SessionListItem>>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    let therapist = load_therapist_for_user(&state, auth.user_id).await?;

    let sql = format!(
        r#"
        SELECT {cols}, (p.first_name || ' ' || p.last_name) AS counterpart_name
        FROM therapy_session s
        JOIN patient p ON p.patient_id = s.patient_id
        WHERE s.therapist_id = $1
          AND ($2::smallint IS NULL OR s.status = $2)
        ORDER BY s.scheduled_at ASC
        "#,
        cols = prefixed_session_columns("s")
    );
    let rows = sqlx::query_as::<_, SessionListItem>(&sql)
        .bind(therapist.therapist_id)
        .bind(q.status)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: SessionStatus,
}

pub async fn update_session_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiOk<SessionRow>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    let therapist = load_therapist_for_user(&state, auth.user_id).await?;

    let mut tx = state.db.begin().await?;

    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM therapy_session WHERE session_id = $1 AND therapist_id = $2 FOR UPDATE"
    );
    let current: SessionRow = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(session_id)
        .bind(therapist.therapist_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("session not found"))?;

    check_transition(current.status, req.status)?;
    let updated = set_status(&mut tx, session_id, req.status).await?;
    if req.status == SessionStatus::Cancelled {
        release_slot(&mut tx, updated.availability_slot_id).await?;
        fail_pending_payment(&mut tx, session_id).await?;
    }

    tx.commit().await?;
    tracing::info!(session_id = %session_id, status = ?req.status, "session status changed");

    let receiver: Option<Uuid> = sqlx::query_scalar(
        r#"SELECT COALESCE(user_id, guardian_user_id) FROM patient WHERE patient_id = $1"#,
    )
    .bind(updated.patient_id)
    .fetch_one(&state.db)
    .await?;

    if let Some(receiver) = receiver {
        let when = updated.scheduled_at.format("%Y-%m-%d %H:%M");
        let (kind, message) = match req.status {
            SessionStatus::Completed => (
                NotificationType::SessionCompleted,
                format!("Your session on {when} was marked completed"),
            ),
            _ => (
                NotificationType::SessionCancelled,
                format!("Your session on {when} was cancelled by your therapist"),
            ),
        };
        push_notification(
            &state,
            NewNotification {
                sender: Some(auth.user_id),
                receiver,
                kind,
                message: &message,
                urgent: kind == NotificationType::SessionCancelled,
            },
        )
        .await;
    }

    Ok(Json(ApiOk { data: updated }))
}

/* ============================================================
   Shared
   ============================================================ */

async fn set_status(
    conn: &mut PgConnection,
    session_id: Uuid,
    status: SessionStatus,
) -> Result<SessionRow, ApiError> {
    let sql = format!(
        r#"
        UPDATE therapy_session
        SET status = $2,
            updated_at = now()
        WHERE session_id = $1
        RETURNING {SESSION_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(session_id)
        .bind(status)
        .fetch_one(conn)
        .await?;
    Ok(row)
}

fn prefixed_session_columns(alias: &str) -> String {
    SESSION_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_sessions_close_once() {
        assert!(check_transition(SessionStatus::Scheduled, SessionStatus::Completed).is_ok());
        assert!(check_transition(SessionStatus::Scheduled, SessionStatus::Cancelled).is_ok());
        assert!(matches!(
            check_transition(SessionStatus::Scheduled, SessionStatus::Scheduled),
            Err(ApiError::BadRequest(..))
        ));
        assert!(matches!(
            check_transition(SessionStatus::Completed, SessionStatus::Cancelled),
            Err(ApiError::Conflict("SESSION_CLOSED", _))
        ));
        assert!(matches!(
            check_transition(SessionStatus::Cancelled, SessionStatus::Completed),
            Err(ApiError::Conflict(..))
        ));
    }

    #[test]
    fn session_columns_get_alias() {
        let cols = prefixed_session_columns("s");
        assert!(cols.starts_with("s.session_id, s.patient_id"));
        assert!(cols.ends_with("s.updated_at"));
        assert!(!cols.contains("s. "));
    }

    #[test]
    fn status_filter_parses_wire_names() {
        let q: StatusQuery = serde_json::from_str(r#"{"status":"COMPLETED"}"#).unwrap();
        assert_eq!(q.status, Some(SessionStatus::Completed));
        let q: StatusQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.status, None);
    }
}
