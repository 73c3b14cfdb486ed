// src/routes/home_routes.rs

use axum::{Json, Router, extract::State, http::Uri, routing::get};
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::middleware::role_gate::home_path;
use crate::models::{AppState, ApiOk, RequestStatus, Role, SessionStatus, VerificationStatus};
use crate::routes::patient_routes::load_patient_for_user;
use crate::routes::therapist_routes::load_therapist_for_user;

/// JSON API: role-specific summary counts.
pub fn api_router() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard_summary))
}

/// Browser pages. Protected ones sit behind the role gate layer.
pub fn page_router() -> Router<AppState> {
    Router::new()
        .route("/", get(public_page))
        .route("/auth/login", get(public_page))
        .route("/auth/register", get(public_page))
        .route("/blog", get(public_page))
        .route("/resources", get(public_page))
        .route("/dashboard", get(page))
        .route("/dashboard/sessions", get(page))
        .route("/parent/dashboard", get(page))
        .route("/therapist/dashboard", get(page))
        .route("/therapist/verification", get(page))
        .route("/manager/dashboard", get(page))
        .route("/admin/dashboard", get(page))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub view: String,
    pub role: Option<Role>,
    pub home: Option<&'static str>,
}

/// "/therapist/dashboard" -> "therapist.dashboard", "/" -> "index"
pub fn view_name(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "index".to_string()
    } else {
        trimmed.replace('/', ".")
    }
}

pub async fn public_page(uri: Uri) -> Json<ApiOk<PageView>> {
    Json(ApiOk {
        data: PageView {
            view: view_name(uri.path()),
            role: None,
            home: None,
        },
    })
}

pub async fn page(uri: Uri, auth: AuthContext) -> Json<ApiOk<PageView>> {
    Json(ApiOk {
        data: PageView {
            view: view_name(uri.path()),
            role: Some(auth.role),
            home: Some(home_path(auth.role, auth.verified)),
        },
    })
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub upcoming_sessions: i64,
    pub unread_notifications: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_requests: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_verifications: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<i64>,
}

pub async fn dashboard_summary(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<DashboardSummary>>, ApiError> {
    let unread_notifications: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM notification WHERE receiver_user_id = $1 AND is_read = false"#,
    )
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await?;

    let mut summary = DashboardSummary {
        unread_notifications,
        ..Default::default()
    };

    match auth.role {
        Role::Patient => {
            let patient = load_patient_for_user(&state, auth.user_id).await?;
            summary.upcoming_sessions = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM therapy_session
                WHERE patient_id = $1 AND status = $2 AND scheduled_at > now()
                "#,
            )
            .bind(patient.patient_id)
            .bind(SessionStatus::Scheduled)
            .fetch_one(&state.db)
            .await?;
        }
        Role::ParentGuardian => {
            let (children, upcoming): (i64, i64) = sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM patient WHERE guardian_user_id = $1),
                    (SELECT COUNT(*)
                     FROM therapy_session s
                     JOIN patient p ON p.patient_id = s.patient_id
                     WHERE p.guardian_user_id = $1 AND s.status = $2 AND s.scheduled_at > now())
                "#,
            )
            .bind(auth.user_id)
            .bind(SessionStatus::Scheduled)
            .fetch_one(&state.db)
            .await?;
            summary.children = Some(children);
            summary.upcoming_sessions = upcoming;
        }
        Role::Therapist => {
            let therapist = load_therapist_for_user(&state, auth.user_id).await?;
            let (upcoming, pending): (i64, i64) = sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM therapy_session
                     WHERE therapist_id = $1 AND status = $2 AND scheduled_at > now()),
                    (SELECT COUNT(*) FROM patient_request
                     WHERE therapist_id = $1 AND status = $3)
                "#,
            )
            .bind(therapist.therapist_id)
            .bind(SessionStatus::Scheduled)
            .bind(RequestStatus::Pending)
            .fetch_one(&state.db)
            .await?;
            summary.upcoming_sessions = upcoming;
            summary.pending_requests = Some(pending);
        }
        Role::Manager | Role::Admin => {
            let (upcoming, pending): (i64, i64) = sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM therapy_session WHERE status = $1 AND scheduled_at > now()),
                    (SELECT COUNT(*) FROM therapist WHERE verification_status = $2)
                "#,
            )
            .bind(SessionStatus::Scheduled)
            .bind(VerificationStatus::PendingReview)
            .fetch_one(&state.db)
            .await?;
            summary.upcoming_sessions = upcoming;
            summary.pending_verifications = Some(pending);
        }
    }

    Ok(Json(ApiOk { data: summary }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_names_follow_path() {
        assert_eq!(view_name("/"), "index");
        assert_eq!(view_name("/therapist/dashboard"), "therapist.dashboard");
        assert_eq!(view_name("/auth/login/"), "auth.login");
    }

    #[test]
    fn summary_omits_counts_of_other_roles() {
        let s = DashboardSummary {
            upcoming_sessions: 2,
            unread_notifications: 1,
            pending_requests: Some(3),
            ..Default::default()
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["upcomingSessions"], 2);
        assert_eq!(json["pendingRequests"], 3);
        assert!(json.get("pendingVerifications").is_none());
        assert!(json.get("children").is_none());
    }
}
