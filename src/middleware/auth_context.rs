use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use headers::{Authorization, HeaderMapExt, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, Role};

pub const SESSION_COOKIE: &str = "session_token";

/// The authenticated caller, as every handler sees it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub email: String,
    pub auth_session_id: Uuid,
    /// Only meaningful for therapists.
    pub verified: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    auth_session_id: Uuid,
    user_id: Uuid,
    role: Role,
    email: String,
    verified: bool,
}

/// Bearer header wins over the cookie so API clients and browsers share one path.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

impl AuthContext {
    /// `Ok(None)` when the request carries no token or the token is stale.
    pub async fn resolve(headers: &HeaderMap, state: &AppState) -> Result<Option<Self>, ApiError> {
        let Some(token) = extract_token(headers) else {
            return Ok(None);
        };
        let token_hash = hash_access_token(&token);

        let row: Option<SessionLookupRow> = sqlx::query_as::<_, SessionLookupRow>(
            r#"
            SELECT s.auth_session_id, s.user_id, u.role, u.email,
                   COALESCE(t.verification_status = 2, false) AS verified
            FROM auth_session s
            JOIN app_user u ON u.user_id = s.user_id
            LEFT JOIN therapist t ON t.user_id = u.user_id
            WHERE s.token_hash = $1
              AND s.revoked_at IS NULL
              AND s.expires_at > now()
              AND u.is_active = true
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&state.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        // best-effort
        if let Err(e) = sqlx::query(
            r#"
            UPDATE auth_session
            SET last_seen_at = now()
            WHERE auth_session_id = $1
            "#,
        )
        .bind(row.auth_session_id)
        .execute(&state.db)
        .await
        {
            tracing::warn!(error = %e, "failed to touch auth session");
        }

        Ok(Some(AuthContext {
            user_id: row.user_id,
            role: row.role,
            email: row.email,
            auth_session_id: row.auth_session_id,
            verified: row.verified,
        }))
    }

    pub fn require(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden("You do not have permission to perform this action"))
        }
    }
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        AuthContext::resolve(&parts.headers, state)
            .await?
            .ok_or_else(ApiError::session_expired)
    }
}
