// src/routes/admin_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, NotificationType, Role, VerificationStatus},
    routes::notification_routes::{NewNotification, push_notification},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/therapists", get(list_therapists))
        .route(
            "/admin/therapists/{therapist_id}/verification",
            post(review_verification),
        )
}

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    auth.require(&[Role::Admin, Role::Manager])
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<VerificationStatus>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TherapistReviewItem {
    pub therapist_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub license_number: Option<String>,
    pub specialization: Option<String>,
    pub verification_status: VerificationStatus,
    pub verification_documents: sqlx::types::Json<Vec<String>>,
    pub rejection_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub async fn list_therapists(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<TherapistReviewItem>>>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let rows: Vec<TherapistReviewItem> = sqlx::query_as::<_, TherapistReviewItem>(
        r#"
        SELECT t.therapist_id, t.user_id, u.name, u.email, t.license_number, t.specialization,
               t.verification_status, t.verification_documents, t.rejection_reason, t.updated_at
        FROM therapist t
        JOIN app_user u ON u.user_id = t.user_id
        WHERE ($1::smallint IS NULL OR t.verification_status = $1)
        ORDER BY t.updated_at ASC
        "#,
    )
    .bind(q.status)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub approve: bool,
    pub reason: Option<String>,
}

/// Outcome status and stored reason; a rejection must say why.
pub fn review_outcome(req: &ReviewRequest) -> Result<(VerificationStatus, Option<String>), ApiError> {
    if req.approve {
        return Ok((VerificationStatus::Verified, None));
    }
    let reason = req
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::validation("reason is required when rejecting"))?;
    Ok((VerificationStatus::Rejected, Some(reason.to_string())))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewData {
    pub therapist_id: Uuid,
    pub verification_status: VerificationStatus,
    pub rejection_reason: Option<String>,
}

pub async fn review_verification(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(therapist_id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<ApiOk<ReviewData>>, ApiError> {
    ensure_admin_or_manager(&auth)?;
    let (status, reason) = review_outcome(&req)?;

    let reviewed: Option<(ReviewData, Uuid)> = sqlx::query_as::<_, (Uuid, VerificationStatus, Option<String>, Uuid)>(
        r#"
        UPDATE therapist
        SET verification_status = $2,
            rejection_reason = $3,
            updated_at = now()
        WHERE therapist_id = $1
          AND verification_status = $4
        RETURNING therapist_id, verification_status, rejection_reason, user_id
        "#,
    )
    .bind(therapist_id)
    .bind(status)
    .bind(&reason)
    .bind(VerificationStatus::PendingReview)
    .fetch_optional(&state.db)
    .await?
    .map(|(therapist_id, verification_status, rejection_reason, user_id)| {
        (
            ReviewData {
                therapist_id,
                verification_status,
                rejection_reason,
            },
            user_id,
        )
    });

    let Some((data, therapist_user)) = reviewed else {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM therapist WHERE therapist_id = $1)"#)
                .bind(therapist_id)
                .fetch_one(&state.db)
                .await?;
        return Err(if exists {
            ApiError::Conflict(
                "NOT_PENDING_REVIEW",
                "Therapist has no verification awaiting review".into(),
            )
        } else {
            ApiError::not_found("therapist not found")
        });
    };

    tracing::info!(
        therapist_id = %therapist_id,
        reviewer = %auth.user_id,
        status = ?data.verification_status,
        "verification reviewed"
    );

    let message = match &data.rejection_reason {
        None => "Your verification was approved. You can now accept patients.".to_string(),
        Some(r) => format!("Your verification was rejected: {r}"),
    };
    push_notification(
        &state,
        NewNotification {
            sender: Some(auth.user_id),
            receiver: therapist_user,
            kind: NotificationType::Verification,
            message: &message,
            urgent: false,
        },
    )
    .await;

    Ok(Json(ApiOk { data }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(approve: bool, reason: Option<&str>) -> ReviewRequest {
        ReviewRequest {
            approve,
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn approval_clears_reason() {
        let (status, reason) = review_outcome(&req(true, Some("ignored"))).unwrap();
        assert_eq!(status, VerificationStatus::Verified);
        assert_eq!(reason, None);
    }

    #[test]
    fn rejection_requires_reason() {
        assert!(review_outcome(&req(false, None)).is_err());
        assert!(review_outcome(&req(false, Some("   "))).is_err());
        let (status, reason) = review_outcome(&req(false, Some(" license expired "))).unwrap();
        assert_eq!(status, VerificationStatus::Rejected);
        assert_eq!(reason.as_deref(), Some("license expired"));
    }

    #[test]
    fn status_filter_uses_wire_names() {
        let q: ListQuery = serde_json::from_str(r#"{"status":"PENDING_REVIEW"}"#).unwrap();
        assert_eq!(q.status, Some(VerificationStatus::PendingReview));
    }
}
