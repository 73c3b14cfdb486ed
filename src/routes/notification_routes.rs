// src/routes/notification_routes.rs

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
    models::{ApiOk, AppState, NotificationType, OkData},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/read_all", post(mark_all_read))
        .route("/notifications/{notification_id}/read", post(mark_read))
}

pub struct NewNotification<'a> {
    pub sender: Option<Uuid>,
    pub receiver: Uuid,
    pub kind: NotificationType,
    pub message: &'a str,
    pub urgent: bool,
}

/// Side-effect only: a failed insert is logged and never fails the caller.
pub async fn push_notification(state: &AppState, n: NewNotification<'_>) {
    let res = sqlx::query(
        r#"
        INSERT INTO notification (sender_user_id, receiver_user_id, notification_type, message, is_urgent)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(n.sender)
    .bind(n.receiver)
    .bind(n.kind)
    .bind(n.message)
    .bind(n.urgent)
    .execute(&state.db)
    .await;

    if let Err(e) = res {
        tracing::warn!(error = %e, receiver = %n.receiver, kind = ?n.kind, "notification insert failed");
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRow {
    pub notification_id: Uuid,
    pub sender_user_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub message: String,
    pub is_read: bool,
    pub is_urgent: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub unread_only: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationList {
    pub notifications: Vec<NotificationRow>,
    pub unread_count: i64,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<NotificationList>>, ApiError> {
    let unread_only = q.unread_only.unwrap_or(false);

    let notifications: Vec<NotificationRow> = sqlx::query_as::<_, NotificationRow>(
        r#"
        SELECT notification_id, sender_user_id, notification_type, message, is_read, is_urgent, created_at
        FROM notification
        WHERE receiver_user_id = $1
          AND ($2 = false OR is_read = false)
        ORDER BY is_urgent DESC, created_at DESC
        LIMIT 100
        "#,
    )
    .bind(auth.user_id)
    .bind(unread_only)
    .fetch_all(&state.db)
    .await?;

    let unread_count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM notification
        WHERE receiver_user_id = $1 AND is_read = false
        "#,
    )
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(ApiOk {
        data: NotificationList {
            notifications,
            unread_count,
        },
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE notification
        SET is_read = true
        WHERE notification_id = $1
          AND receiver_user_id = $2
        "#,
    )
    .bind(notification_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("notification not found"));
    }

    Ok(Json(ApiOk { data: OkData { ok: true } }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllData {
    pub ok: bool,
    pub updated_count: u64,
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MarkAllData>>, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE notification
        SET is_read = true
        WHERE receiver_user_id = $1
          AND is_read = false
        "#,
    )
    .bind(auth.user_id)
    .execute(&state.db)
    .await?;

    Ok(Json(ApiOk {
        data: MarkAllData {
            ok: true,
            updated_count: res.rows_affected(),
        },
    }))
}
