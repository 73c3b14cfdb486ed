// src/routes/content_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, ContentKind, ContentStatus, Role},
};

const MAX_TITLE_LEN: usize = 200;
const MAX_SLUG_ATTEMPTS: usize = 20;

const CONTENT_COLUMNS: &str = "content_id, kind, slug, title, summary, body, resource_url, status, \
     author_user_id, published_at, created_at, updated_at";

const AUTHOR_ROLES: &[Role] = &[Role::Therapist, Role::Manager, Role::Admin];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/content", get(list_published).post(create_item))
        .route("/content/mine", get(list_mine))
        // readers address items by slug, authors by id
        .route("/content/{content}", get(get_published).patch(update_item))
        .route("/content/{content}/publish", post(publish_item))
        .route("/content/{content}/archive", post(archive_item))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContentRow {
    pub content_id: Uuid,
    pub kind: ContentKind,
    pub slug: String,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub resource_url: Option<String>,
    pub status: ContentStatus,
    pub author_user_id: Uuid,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// "Coping with Anxiety: 5 Tips!" -> "coping-with-anxiety-5-tips"
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn validate_title(title: &str) -> Result<&str, ApiError> {
    let t = title.trim();
    if t.is_empty() {
        return Err(ApiError::validation("title is required"));
    }
    if t.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::validation(format!("title must be at most {MAX_TITLE_LEN} characters")));
    }
    Ok(t)
}

fn validate_resource_url(url: Option<&str>) -> Result<Option<String>, ApiError> {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        None => Ok(None),
        Some(u) if u.starts_with("https://") || u.starts_with("http://") => Ok(Some(u.to_string())),
        Some(_) => Err(ApiError::validation("resourceUrl must be an http(s) URL")),
    }
}

/// Therapists manage their own items; managers and admins manage all.
fn can_edit(auth: &AuthContext, item: &ContentRow) -> bool {
    auth.role.is_staff() || item.author_user_id == auth.user_id
}

/* ============================================================
   Public
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub kind: Option<String>,
}

fn parse_kind(raw: Option<&str>) -> Result<Option<ContentKind>, ApiError> {
    match raw.map(|k| k.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(None),
        Some("blog") => Ok(Some(ContentKind::Blog)),
        Some("resource") | Some("resources") => Ok(Some(ContentKind::Resource)),
        Some(_) => Err(ApiError::validation("kind must be blog or resource")),
    }
}

pub async fn list_published(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<ContentRow>>>, ApiError> {
    let kind = parse_kind(q.kind.as_deref())?;

    let sql = format!(
        r#"
        SELECT {CONTENT_COLUMNS}
        FROM content_item
        WHERE status = $1
          AND ($2::smallint IS NULL OR kind = $2)
        ORDER BY published_at DESC
        LIMIT 100
        "#
    );
    let rows = sqlx::query_as::<_, ContentRow>(&sql)
        .bind(ContentStatus::Published)
        .bind(kind)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn get_published(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ApiOk<ContentRow>>, ApiError> {
    let sql = format!("SELECT {CONTENT_COLUMNS} FROM content_item WHERE slug = $1 AND status = $2");
    let row = sqlx::query_as::<_, ContentRow>(&sql)
        .bind(slug.trim())
        .bind(ContentStatus::Published)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("content not found"))?;

    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   Authors
   ============================================================ */

pub async fn list_mine(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<ContentRow>>>, ApiError> {
    auth.require(AUTHOR_ROLES)?;

    let sql = format!(
        "SELECT {CONTENT_COLUMNS} FROM content_item WHERE author_user_id = $1 ORDER BY updated_at DESC"
    );
    let rows = sqlx::query_as::<_, ContentRow>(&sql)
        .bind(auth.user_id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContentRequest {
    pub kind: ContentKind,
    pub title: String,
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub resource_url: Option<String>,
}

pub async fn create_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateContentRequest>,
) -> Result<(StatusCode, Json<ApiOk<ContentRow>>), ApiError> {
    auth.require(AUTHOR_ROLES)?;

    let title = validate_title(&req.title)?;
    let resource_url = validate_resource_url(req.resource_url.as_deref())?;
    if req.kind == ContentKind::Resource && resource_url.is_none() && req.body.is_none() {
        return Err(ApiError::validation("a resource needs a resourceUrl or a body"));
    }

    let explicit = req.slug.as_deref().map(slugify).filter(|s| !s.is_empty());
    let base = match &explicit {
        Some(s) => s.clone(),
        None => slugify(title),
    };
    if base.is_empty() {
        return Err(ApiError::validation("title must contain letters or digits"));
    }

    let sql = format!(
        r#"
        INSERT INTO content_item (kind, slug, title, summary, body, resource_url, author_user_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (slug) DO NOTHING
        RETURNING {CONTENT_COLUMNS}
        "#
    );

    // derived slugs get a numeric suffix, explicit ones must be free
    for attempt in 0..MAX_SLUG_ATTEMPTS {
        let slug = if attempt == 0 { base.clone() } else { format!("{base}-{}", attempt + 1) };
        // "mine" is shadowed by the author listing route
        if slug == "mine" {
            if explicit.is_some() {
                return Err(ApiError::Conflict("SLUG_TAKEN", "Slug is reserved".into()));
            }
            continue;
        }

        let inserted = sqlx::query_as::<_, ContentRow>(&sql)
            .bind(req.kind)
            .bind(&slug)
            .bind(title)
            .bind(req.summary.as_deref().map(str::trim))
            .bind(req.body.as_deref().unwrap_or(""))
            .bind(&resource_url)
            .bind(auth.user_id)
            .fetch_optional(&state.db)
            .await?;

        if let Some(row) = inserted {
            tracing::info!(content_id = %row.content_id, slug = %row.slug, "content created");
            return Ok((StatusCode::CREATED, Json(ApiOk { data: row })));
        }
        if explicit.is_some() {
            return Err(ApiError::Conflict("SLUG_TAKEN", "Slug is already in use".into()));
        }
    }

    Err(ApiError::Conflict("SLUG_TAKEN", "Could not derive a free slug".into()))
}

async fn load_for_edit(state: &AppState, auth: &AuthContext, content_id: Uuid) -> Result<ContentRow, ApiError> {
    auth.require(AUTHOR_ROLES)?;
    let sql = format!("SELECT {CONTENT_COLUMNS} FROM content_item WHERE content_id = $1");
    let item = sqlx::query_as::<_, ContentRow>(&sql)
        .bind(content_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("content not found"))?;

    if !can_edit(auth, &item) {
        return Err(ApiError::forbidden("You can only edit your own content"));
    }
    Ok(item)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContentRequest {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub resource_url: Option<String>,
}

pub async fn update_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(content_id): Path<Uuid>,
    Json(req): Json<UpdateContentRequest>,
) -> Result<Json<ApiOk<ContentRow>>, ApiError> {
    let item = load_for_edit(&state, &auth, content_id).await?;
    if item.status == ContentStatus::Archived {
        return Err(ApiError::Conflict("CONTENT_ARCHIVED", "Archived content cannot be edited".into()));
    }

    let title = match req.title.as_deref() {
        Some(t) => validate_title(t)?.to_string(),
        None => item.title,
    };
    let resource_url = match req.resource_url.as_deref() {
        Some(u) => validate_resource_url(Some(u))?,
        None => item.resource_url,
    };

    let sql = format!(
        r#"
        UPDATE content_item
        SET title = $2,
            summary = $3,
            body = $4,
            resource_url = $5,
            updated_at = now()
        WHERE content_id = $1
        RETURNING {CONTENT_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, ContentRow>(&sql)
        .bind(content_id)
        .bind(title)
        .bind(req.summary.or(item.summary))
        .bind(req.body.unwrap_or(item.body))
        .bind(resource_url)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(ApiOk { data: row }))
}

async fn set_status(
    state: &AppState,
    auth: &AuthContext,
    content_id: Uuid,
    status: ContentStatus,
) -> Result<ContentRow, ApiError> {
    let item = load_for_edit(state, auth, content_id).await?;
    if item.status == status {
        return Ok(item);
    }

    let sql = format!(
        r#"
        UPDATE content_item
        SET status = $2,
            published_at = CASE WHEN $2 = 1 THEN COALESCE(published_at, now()) ELSE published_at END,
            updated_at = now()
        WHERE content_id = $1
        RETURNING {CONTENT_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, ContentRow>(&sql)
        .bind(content_id)
        .bind(status)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(content_id = %content_id, status = ?status, "content status changed");
    Ok(row)
}

pub async fn publish_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(content_id): Path<Uuid>,
) -> Result<Json<ApiOk<ContentRow>>, ApiError> {
    let row = set_status(&state, &auth, content_id, ContentStatus::Published).await?;
    Ok(Json(ApiOk { data: row }))
}

pub async fn archive_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(content_id): Path<Uuid>,
) -> Result<Json<ApiOk<ContentRow>>, ApiError> {
    let row = set_status(&state, &auth, content_id, ContentStatus::Archived).await?;
    Ok(Json(ApiOk { data: row }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercase_and_dashed() {
        assert_eq!(slugify("Coping with Anxiety: 5 Tips!"), "coping-with-anxiety-5-tips");
        assert_eq!(slugify("  --Hello   World--  "), "hello-world");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn kind_filter_accepts_lowercase() {
        assert_eq!(parse_kind(None).unwrap(), None);
        assert_eq!(parse_kind(Some("blog")).unwrap(), Some(ContentKind::Blog));
        assert_eq!(parse_kind(Some("Resource")).unwrap(), Some(ContentKind::Resource));
        assert!(parse_kind(Some("video")).is_err());
    }

    #[test]
    fn resource_urls_must_be_http() {
        assert_eq!(validate_resource_url(None).unwrap(), None);
        assert_eq!(validate_resource_url(Some("  ")).unwrap(), None);
        assert!(validate_resource_url(Some("ftp://x")).is_err());
        assert_eq!(
            validate_resource_url(Some("https://example.com/a.pdf")).unwrap().as_deref(),
            Some("https://example.com/a.pdf")
        );
    }

    #[test]
    fn therapists_edit_only_their_own() {
        let author = Uuid::new_v4();
        let now = Utc::now();
        let item = ContentRow {
            content_id: Uuid::new_v4(),
            kind: ContentKind::Blog,
            slug: "a".into(),
            title: "A".into(),
            summary: None,
            body: String::new(),
            resource_url: None,
            status: ContentStatus::Draft,
            author_user_id: author,
            published_at: None,
            created_at: now,
            updated_at: now,
        };
        let ctx = |user_id, role| AuthContext {
            user_id,
            role,
            email: "x@example.com".into(),
            auth_session_id: Uuid::new_v4(),
            verified: true,
        };
        assert!(can_edit(&ctx(author, Role::Therapist), &item));
        assert!(!can_edit(&ctx(Uuid::new_v4(), Role::Therapist), &item));
        assert!(can_edit(&ctx(Uuid::new_v4(), Role::Manager), &item));
    }

    #[test]
    fn titles_are_bounded() {
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
        assert_eq!(validate_title(" Hello ").unwrap(), "Hello");
    }
}
