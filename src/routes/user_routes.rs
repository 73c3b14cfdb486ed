// src/routes/user_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{hash_password, validate_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData, Role},
    routes::auth_routes::{normalize_email, split_name},
};

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role.is_staff() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only admin/manager can manage users"))
    }
}

/// Staff accounts are handed out by admins only.
fn ensure_can_assign(auth: &AuthContext, role: Role) -> Result<(), ApiError> {
    if role.is_staff() && auth.role != Role::Admin {
        return Err(ApiError::forbidden("Only an admin can grant ADMIN or MANAGER"));
    }
    Ok(())
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserPublicRow {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const USER_PUBLIC_COLUMNS: &str = "user_id, email, name, role, is_active, created_at";

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    pub is_active: Option<bool>, // default true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        // /api/users
        .route("/", get(list_users).post(create_user))
        // /api/users/{user_id}
        .route("/{user_id}", get(get_user).patch(update_user))
        .route("/{user_id}/disable", post(disable_user))
        .route("/{user_id}/enable", post(enable_user))
}

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListUsersQuery>,
) -> Result<Json<ApiOk<Vec<UserPublicRow>>>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let sql = format!(
        r#"
        SELECT {USER_PUBLIC_COLUMNS}
        FROM app_user
        WHERE ($1::smallint IS NULL OR role = $1)
        ORDER BY created_at DESC
        LIMIT 200
        "#
    );
    let users = sqlx::query_as::<_, UserPublicRow>(&sql)
        .bind(q.role)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiOk { data: users }))
}

async fn load_user(state: &AppState, user_id: Uuid) -> Result<UserPublicRow, ApiError> {
    let sql = format!("SELECT {USER_PUBLIC_COLUMNS} FROM app_user WHERE user_id = $1");
    sqlx::query_as::<_, UserPublicRow>(&sql)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    ensure_admin_or_manager(&auth)?;
    let user = load_user(&state, user_id).await?;
    Ok(Json(ApiOk { data: user }))
}

fn validate_name(name: &str) -> Result<&str, ApiError> {
    let n = name.trim();
    if n.is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    Ok(n)
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiOk<UserPublicRow>>), ApiError> {
    ensure_admin_or_manager(&auth)?;
    ensure_can_assign(&auth, req.role)?;

    let email = normalize_email(&req.email)?;
    let name = validate_name(&req.name)?;
    validate_password(&req.password)?;

    let pw_hash = hash_password(&req.password)?;

    let mut tx = state.db.begin().await?;

    let sql = format!(
        r#"
        INSERT INTO app_user (email, name, password_hash, role, is_active)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO NOTHING
        RETURNING {USER_PUBLIC_COLUMNS}
        "#
    );
    let user: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(&sql)
        .bind(&email)
        .bind(name)
        .bind(&pw_hash)
        .bind(req.role)
        .bind(req.is_active.unwrap_or(true))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict("EMAIL_TAKEN", "An account with this email already exists".into())
        })?;

    // same profile rows self-registration would create
    match user.role {
        Role::Patient => {
            let (first, last) = split_name(name);
            sqlx::query(r#"INSERT INTO patient (user_id, first_name, last_name) VALUES ($1, $2, $3)"#)
                .bind(user.user_id)
                .bind(first)
                .bind(last)
                .execute(&mut *tx)
                .await?;
        }
        Role::Therapist => {
            sqlx::query(r#"INSERT INTO therapist (user_id) VALUES ($1)"#)
                .bind(user.user_id)
                .execute(&mut *tx)
                .await?;
        }
        _ => {}
    }

    tx.commit().await?;
    tracing::info!(user_id = %user.user_id, by = %auth.user_id, role = user.role.as_str(), "user created");

    Ok((StatusCode::CREATED, Json(ApiOk { data: user })))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let existing = load_user(&state, user_id).await?;

    // managers cannot touch staff accounts at all
    ensure_can_assign(&auth, existing.role)?;

    let name = match req.name.as_deref() {
        Some(n) => validate_name(n)?.to_string(),
        None => existing.name.clone(),
    };

    let role = match req.role {
        Some(r) if r != existing.role => {
            ensure_can_assign(&auth, r)?;
            if matches!(existing.role, Role::Patient | Role::Therapist) || matches!(r, Role::Patient | Role::Therapist) {
                return Err(ApiError::validation(
                    "PATIENT and THERAPIST accounts carry profiles; their role cannot be changed",
                ));
            }
            r
        }
        _ => existing.role,
    };

    let is_active = req.is_active.unwrap_or(existing.is_active);
    if user_id == auth.user_id && (!is_active || role != existing.role) {
        return Err(ApiError::validation("You cannot disable or demote your own account"));
    }

    let sql = format!(
        r#"
        UPDATE app_user
        SET name = $1,
            role = $2,
            is_active = $3
        WHERE user_id = $4
        RETURNING {USER_PUBLIC_COLUMNS}
        "#
    );
    let updated = sqlx::query_as::<_, UserPublicRow>(&sql)
        .bind(&name)
        .bind(role)
        .bind(is_active)
        .bind(user_id)
        .fetch_one(&state.db)
        .await?;

    if !updated.is_active {
        revoke_sessions(&state, user_id).await?;
    }

    Ok(Json(ApiOk { data: updated }))
}

async fn revoke_sessions(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        UPDATE auth_session
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(user_id)
    .execute(&state.db)
    .await?;
    Ok(())
}

async fn set_active(
    state: &AppState,
    auth: &AuthContext,
    user_id: Uuid,
    active: bool,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    ensure_admin_or_manager(auth)?;
    if user_id == auth.user_id && !active {
        return Err(ApiError::validation("You cannot disable your own account"));
    }

    let existing = load_user(state, user_id).await?;
    ensure_can_assign(auth, existing.role)?;

    sqlx::query(r#"UPDATE app_user SET is_active = $1 WHERE user_id = $2"#)
        .bind(active)
        .bind(user_id)
        .execute(&state.db)
        .await?;

    if !active {
        revoke_sessions(state, user_id).await?;
    }
    tracing::info!(user_id = %user_id, by = %auth.user_id, active, "user activation changed");

    Ok(Json(ApiOk { data: OkData { ok: true } }))
}

pub async fn disable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    set_active(&state, &auth, user_id, false).await
}

pub async fn enable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    set_active(&state, &auth, user_id, true).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role,
            email: "staff@example.com".into(),
            auth_session_id: Uuid::new_v4(),
            verified: false,
        }
    }

    #[test]
    fn only_staff_manage_users() {
        assert!(ensure_admin_or_manager(&ctx(Role::Admin)).is_ok());
        assert!(ensure_admin_or_manager(&ctx(Role::Manager)).is_ok());
        assert!(ensure_admin_or_manager(&ctx(Role::Therapist)).is_err());
        assert!(ensure_admin_or_manager(&ctx(Role::Patient)).is_err());
    }

    #[test]
    fn managers_cannot_grant_staff_roles() {
        assert!(ensure_can_assign(&ctx(Role::Manager), Role::Therapist).is_ok());
        assert!(ensure_can_assign(&ctx(Role::Manager), Role::Manager).is_err());
        assert!(ensure_can_assign(&ctx(Role::Manager), Role::Admin).is_err());
        assert!(ensure_can_assign(&ctx(Role::Admin), Role::Manager).is_ok());
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Ann Lee ").unwrap(), "Ann Lee");
        assert!(validate_name("").is_err());
        assert!(validate_name("  ").is_err());
    }

    #[test]
    fn create_request_uses_wire_roles() {
        let req: CreateUserRequest = serde_json::from_str(
            r#"{"email":"t@example.com","name":"T","password":"password123","role":"THERAPIST"}"#,
        )
        .unwrap();
        assert_eq!(req.role, Role::Therapist);
        assert!(req.is_active.is_none());
    }
}
