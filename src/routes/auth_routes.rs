use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, validate_password, verify_password},
    error::ApiError,
    middleware::auth_context::{AuthContext, SESSION_COOKIE},
    models::{ApiOk, AppState, OkData, Role, UserProfile, UserRow},
};

const REMEMBER_ME_TTL_HOURS: i64 = 24 * 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/refresh", post(refresh))
        .route("/change_password", post(change_password))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

pub fn normalize_email(email: &str) -> Result<String, ApiError> {
    let e = email.trim().to_ascii_lowercase();
    let valid = match e.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(ApiError::validation("a valid email is required"));
    }
    Ok(e)
}

/// Self-registration is limited to the roles a member of the public can hold.
pub fn validate_self_register_role(role: Role) -> Result<(), ApiError> {
    match role {
        Role::Patient | Role::ParentGuardian | Role::Therapist => Ok(()),
        _ => Err(ApiError::validation("role must be PATIENT, PARENT_GUARDIAN or THERAPIST")),
    }
}

/// "Jane van Dyke" -> ("Jane", "van Dyke")
pub fn split_name(name: &str) -> (String, String) {
    let name = name.trim();
    match name.split_once(char::is_whitespace) {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (name.to_string(), String::new()),
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiOk<UserProfile>>), ApiError> {
    let email = normalize_email(&req.email)?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    validate_password(&req.password)?;
    validate_self_register_role(req.role)?;

    let pw_hash = hash_password(&req.password)?;

    let mut tx = state.db.begin().await?;

    let user: Option<UserRow> = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO app_user (email, name, password_hash, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO NOTHING
        RETURNING user_id, email, name, password_hash, role, is_active
        "#,
    )
    .bind(&email)
    .bind(name)
    .bind(&pw_hash)
    .bind(req.role)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(user) = user else {
        return Err(ApiError::Conflict(
            "EMAIL_TAKEN",
            "An account with this email already exists".into(),
        ));
    };

    match user.role {
        Role::Patient => {
            let (first, last) = split_name(name);
            sqlx::query(
                r#"
                INSERT INTO patient (user_id, first_name, last_name, phone)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(user.user_id)
            .bind(first)
            .bind(last)
            .bind(req.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()))
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
    tracing::info!(user_id = %user.user_id, role = user.role.as_str(), "user registered");

    Ok((StatusCode::CREATED, Json(ApiOk { data: user.profile() })))
}

/// Browser-session cookie; expiry is enforced server-side on `auth_session`.
fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<ApiOk<LoginData>>), ApiError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }
    let email = req.email.trim().to_ascii_lowercase();

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, email, name, password_hash, role, is_active
        FROM app_user
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }
    if !user.is_active {
        return Err(ApiError::forbidden("Account is disabled"));
    }

    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);

    let ttl_hours = if req.remember_me.unwrap_or(false) {
        REMEMBER_ME_TTL_HOURS
    } else {
        state.session_ttl_hours
    };
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    sqlx::query(
        r#"
        INSERT INTO auth_session (user_id, token_hash, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(user.user_id)
    .bind(&token_hash)
    .bind(expires_at)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %user.user_id, "login");

    let jar = jar.add(session_cookie(access_token.clone()));
    Ok((
        jar,
        Json(ApiOk {
            data: LoginData {
                access_token,
                expires_at,
                user: user.profile(),
            },
        }),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UserProfile>>, ApiError> {
    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, email, name, password_hash, role, is_active
        FROM app_user
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(ApiOk { data: user.profile() }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiOk<OkData>>), ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE auth_session
        SET revoked_at = now()
        WHERE auth_session_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.auth_session_id)
    .execute(&state.db)
    .await?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
    Ok((jar, Json(ApiOk { data: OkData { ok: true } })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub auth_session_id: Uuid,
}

/// Rotates the token of the current session; the old token stops working immediately.
pub async fn refresh(
    State(state): State<AppState>,
    auth: AuthContext,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiOk<RefreshData>>), ApiError> {
    let new_token = generate_access_token();

    let expires_at: DateTime<Utc> = sqlx::query_scalar(
        r#"
        UPDATE auth_session
        SET token_hash = $1,
            last_seen_at = now()
        WHERE auth_session_id = $2
          AND revoked_at IS NULL
          AND expires_at > now()
        RETURNING expires_at
        "#,
    )
    .bind(hash_access_token(&new_token))
    .bind(auth.auth_session_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(ApiError::session_expired)?;

    let jar = jar.add(session_cookie(new_token.clone()));
    Ok((
        jar,
        Json(ApiOk {
            data: RefreshData {
                access_token: new_token,
                expires_at,
                auth_session_id: auth.auth_session_id,
            },
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    if req.old_password.is_empty() {
        return Err(ApiError::validation("oldPassword is required"));
    }
    validate_password(&req.new_password)?;

    let current: String = sqlx::query_scalar(
        r#"
        SELECT password_hash FROM app_user
        WHERE user_id = $1 AND is_active = true
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(ApiError::session_expired)?;

    if !verify_password(&req.old_password, &current) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password)?;

    let mut tx = state.db.begin().await?;

    sqlx::query(r#"UPDATE app_user SET password_hash = $1 WHERE user_id = $2"#)
        .bind(new_hash)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?;

    // keep the current session, drop the rest
    sqlx::query(
        r#"
        UPDATE auth_session
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND auth_session_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.auth_session_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(ApiOk { data: OkData { ok: true } }))
}
