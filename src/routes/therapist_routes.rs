// src/routes/therapist_routes.rs

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, NotificationType, RequestStatus, Role, THERAPIST_COLUMNS, TherapistRow,
        VerificationStatus,
    },
    routes::notification_routes::{NewNotification, push_notification},
};

const MAX_DOCUMENTS: usize = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/therapist/profile", get(get_profile).put(update_profile))
        .route(
            "/therapist/verification",
            get(get_verification).put(submit_verification),
        )
        .route(
            "/therapist/patient-requests",
            get(list_patient_requests).post(respond_patient_request),
        )
}

pub async fn load_therapist_for_user(state: &AppState, user_id: Uuid) -> Result<TherapistRow, ApiError> {
    let sql = format!("SELECT {THERAPIST_COLUMNS} FROM therapist WHERE user_id = $1");
    sqlx::query_as::<_, TherapistRow>(&sql)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("NO_THERAPIST_PROFILE", "Therapist profile not found".into()))
}

/* ============================================================
   Profile
   ============================================================ */

pub async fn get_profile(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<TherapistRow>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    let therapist = load_therapist_for_user(&state, auth.user_id).await?;
    Ok(Json(ApiOk { data: therapist }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub specialization: Option<String>,
    pub bio: Option<String>,
    pub experience_years: Option<i32>,
    pub session_rate_cents: Option<i64>,
    pub google_access_token: Option<String>,
}

fn validate_profile(req: &UpdateProfileRequest) -> Result<(), ApiError> {
    if let Some(rate) = req.session_rate_cents {
        if rate < 0 {
            return Err(ApiError::validation("sessionRateCents must not be negative"));
        }
    }
    if let Some(years) = req.experience_years {
        if !(0..=80).contains(&years) {
            return Err(ApiError::validation("experienceYears must be between 0 and 80"));
        }
    }
    Ok(())
}

pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiOk<TherapistRow>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    validate_profile(&req)?;

    let sql = format!(
        r#"
        UPDATE therapist
        SET specialization = COALESCE($2, specialization),
            bio = COALESCE($3, bio),
            experience_years = COALESCE($4, experience_years),
            session_rate_cents = COALESCE($5, session_rate_cents),
            google_access_token = COALESCE($6, google_access_token),
            updated_at = now()
        WHERE user_id = $1
        RETURNING {THERAPIST_COLUMNS}
        "#
    );
    let therapist = sqlx::query_as::<_, TherapistRow>(&sql)
        .bind(auth.user_id)
        .bind(req.specialization.as_deref().map(str::trim))
        .bind(req.bio.as_deref().map(str::trim))
        .bind(req.experience_years)
        .bind(req.session_rate_cents)
        .bind(req.google_access_token.as_deref())
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("NO_THERAPIST_PROFILE", "Therapist profile not found".into()))?;

    Ok(Json(ApiOk { data: therapist }))
}

/* ============================================================
   Verification
   ============================================================ */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationData {
    pub status: VerificationStatus,
    pub license_number: Option<String>,
    pub documents: Vec<String>,
    pub rejection_reason: Option<String>,
}

impl From<TherapistRow> for VerificationData {
    fn from(t: TherapistRow) -> Self {
        VerificationData {
            status: t.verification_status,
            license_number: t.license_number,
            documents: t.verification_documents.0,
            rejection_reason: t.rejection_reason,
        }
    }
}

pub async fn get_verification(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<VerificationData>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    let therapist = load_therapist_for_user(&state, auth.user_id).await?;
    Ok(Json(ApiOk { data: therapist.into() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVerificationRequest {
    pub license_number: String,
    pub specialization: Option<String>,
    pub documents: Vec<String>,
}

fn validate_submission(req: &SubmitVerificationRequest) -> Result<(), ApiError> {
    if req.license_number.trim().is_empty() {
        return Err(ApiError::validation("licenseNumber is required"));
    }
    if req.documents.is_empty() {
        return Err(ApiError::validation("at least one document is required"));
    }
    if req.documents.len() > MAX_DOCUMENTS {
        return Err(ApiError::validation(format!("at most {MAX_DOCUMENTS} documents")));
    }
    if req.documents.iter().any(|d| d.trim().is_empty()) {
        return Err(ApiError::validation("document references must not be empty"));
    }
    Ok(())
}

pub async fn submit_verification(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SubmitVerificationRequest>,
) -> Result<Json<ApiOk<VerificationData>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    validate_submission(&req)?;

    let current = load_therapist_for_user(&state, auth.user_id).await?;
    if current.verification_status == VerificationStatus::Verified {
        return Err(ApiError::Conflict(
            "ALREADY_VERIFIED",
            "Therapist is already verified".into(),
        ));
    }

    let documents: Vec<String> = req.documents.iter().map(|d| d.trim().to_string()).collect();

    let sql = format!(
        r#"
        UPDATE therapist
        SET license_number = $2,
            specialization = COALESCE($3, specialization),
            verification_documents = $4,
            verification_status = $5,
            rejection_reason = NULL,
            updated_at = now()
        WHERE therapist_id = $1
          AND verification_status <> $6
        RETURNING {THERAPIST_COLUMNS}
        "#
    );
    let updated = sqlx::query_as::<_, TherapistRow>(&sql)
        .bind(current.therapist_id)
        .bind(req.license_number.trim())
        .bind(req.specialization.as_deref().map(str::trim))
        .bind(sqlx::types::Json(&documents))
        .bind(VerificationStatus::PendingReview)
        .bind(VerificationStatus::Verified)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::Conflict("ALREADY_VERIFIED", "Therapist is already verified".into()))?;

    tracing::info!(therapist_id = %updated.therapist_id, "verification submitted");
    Ok(Json(ApiOk { data: updated.into() }))
}

/* ============================================================
   Patient requests
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PatientRequestItem {
    pub request_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub message: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

pub async fn list_patient_requests(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<PatientRequestItem>>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    let therapist = load_therapist_for_user(&state, auth.user_id).await?;

    let rows: Vec<PatientRequestItem> = sqlx::query_as::<_, PatientRequestItem>(
        r#"
        SELECT r.request_id, r.patient_id,
               (p.first_name || ' ' || p.last_name) AS patient_name,
               r.message, r.status, r.created_at
        FROM patient_request r
        JOIN patient p ON p.patient_id = r.patient_id
        WHERE r.therapist_id = $1
          AND r.status = $2
        ORDER BY r.created_at ASC
        "#,
    )
    .bind(therapist.therapist_id)
    .bind(RequestStatus::Pending)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestAction {
    Accept,
    Decline,
}

impl RequestAction {
    fn status(self) -> RequestStatus {
        match self {
            RequestAction::Accept => RequestStatus::Accepted,
            RequestAction::Decline => RequestStatus::Declined,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub request_id: Uuid,
    pub action: RequestAction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondData {
    pub request_id: Uuid,
    pub status: RequestStatus,
}

pub async fn respond_patient_request(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<RespondRequest>,
) -> Result<Json<ApiOk<RespondData>>, ApiError> {
    auth.require(&[Role::Therapist])?;
    let therapist = load_therapist_for_user(&state, auth.user_id).await?;
    if therapist.verification_status != VerificationStatus::Verified {
        return Err(ApiError::forbidden("Only verified therapists can accept patients"));
    }

    let new_status = req.action.status();
    let mut tx = state.db.begin().await?;

    let patient_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE patient_request
        SET status = $3, responded_at = now()
        WHERE request_id = $1
          AND therapist_id = $2
          AND status = $4
        RETURNING patient_id
        "#,
    )
    .bind(req.request_id)
    .bind(therapist.therapist_id)
    .bind(new_status)
    .bind(RequestStatus::Pending)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(patient_id) = patient_id else {
        return Err(ApiError::Conflict(
            "REQUEST_NOT_PENDING",
            "Request not found or already answered".into(),
        ));
    };

    if req.action == RequestAction::Accept {
        sqlx::query(
            r#"
            UPDATE patient
            SET primary_therapist_id = $2, updated_at = now()
            WHERE patient_id = $1
            "#,
        )
        .bind(patient_id)
        .bind(therapist.therapist_id)
        .execute(&mut *tx)
        .await?;
    }

    // the guardian is notified when the patient has no login of their own
    let receiver: Option<Uuid> = sqlx::query_scalar(
        r#"SELECT COALESCE(user_id, guardian_user_id) FROM patient WHERE patient_id = $1"#,
    )
    .bind(patient_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    if let Some(receiver) = receiver {
        let (kind, message) = match req.action {
            RequestAction::Accept => (
                NotificationType::RequestAccepted,
                "Your therapist request was accepted. You can now book sessions.",
            ),
            RequestAction::Decline => (
                NotificationType::RequestDeclined,
                "Your therapist request was declined.",
            ),
        };
        push_notification(
            &state,
            NewNotification {
                sender: Some(auth.user_id),
                receiver,
                kind,
                message,
                urgent: false,
            },
        )
        .await;
    }

    Ok(Json(ApiOk {
        data: RespondData {
            request_id: req.request_id,
            status: new_status,
        },
    }))
}
