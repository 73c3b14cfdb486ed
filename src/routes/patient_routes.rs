// src/routes/patient_routes.rs

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, NotificationType, PATIENT_COLUMNS, PatientRow, RequestStatus, Role,
        VerificationStatus,
    },
    routes::notification_routes::{NewNotification, push_notification},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patient/profile", get(get_profile).put(update_profile))
        .route("/patient/therapists", get(list_therapists))
        .route("/patient/therapist-request", post(request_therapist))
        .route("/parent/children", get(list_children).post(add_child))
}

pub async fn load_patient_for_user(state: &AppState, user_id: Uuid) -> Result<PatientRow, ApiError> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patient WHERE user_id = $1");
    sqlx::query_as::<_, PatientRow>(&sql)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("NO_PATIENT_PROFILE", "Patient profile not found".into()))
}

fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // only reached when the field is present: null => Some(None)
    Option::<T>::deserialize(deserializer).map(Some)
}

/* ============================================================
   Profile
   ============================================================ */

pub async fn get_profile(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient = load_patient_for_user(&state, auth.user_id).await?;
    Ok(Json(ApiOk { data: patient }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub date_of_birth: Option<Option<NaiveDate>>,
}

/// Field absent keeps the old value, explicit null clears it.
fn merge_nullable<T>(incoming: Option<Option<T>>, existing: Option<T>) -> Option<T> {
    match incoming {
        None => existing,
        Some(v) => v,
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let existing = load_patient_for_user(&state, auth.user_id).await?;

    let first_name = non_empty(req.first_name.as_deref()).unwrap_or(existing.first_name);
    let last_name = non_empty(req.last_name.as_deref()).unwrap_or(existing.last_name);
    let phone = merge_nullable(
        req.phone.map(|p| non_empty(p.as_deref())),
        existing.phone,
    );
    let date_of_birth = merge_nullable(req.date_of_birth, existing.date_of_birth);

    if let Some(dob) = date_of_birth {
        if dob > chrono::Utc::now().date_naive() {
            return Err(ApiError::validation("dateOfBirth cannot be in the future"));
        }
    }

    let sql = format!(
        r#"
        UPDATE patient
        SET first_name = $2,
            last_name = $3,
            phone = $4,
            date_of_birth = $5,
            updated_at = now()
        WHERE patient_id = $1
        RETURNING {PATIENT_COLUMNS}
        "#
    );
    let updated = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(existing.patient_id)
        .bind(first_name)
        .bind(last_name)
        .bind(phone)
        .bind(date_of_birth)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(ApiOk { data: updated }))
}

/* ============================================================
   Therapist directory & requests
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TherapistListing {
    pub therapist_id: Uuid,
    pub name: String,
    pub specialization: Option<String>,
    pub experience_years: Option<i32>,
    pub bio: Option<String>,
    pub session_rate_cents: i64,
}

pub async fn list_therapists(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<TherapistListing>>>, ApiError> {
    auth.require(&[Role::Patient, Role::ParentGuardian])?;

    let rows: Vec<TherapistListing> = sqlx::query_as::<_, TherapistListing>(
        r#"
        SELECT t.therapist_id, u.name, t.specialization, t.experience_years, t.bio, t.session_rate_cents
        FROM therapist t
        JOIN app_user u ON u.user_id = t.user_id
        WHERE t.verification_status = $1
          AND u.is_active = true
        ORDER BY u.name ASC
        "#,
    )
    .bind(VerificationStatus::Verified)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TherapistRequestBody {
    pub therapist_id: Uuid,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRequest {
    pub request_id: Uuid,
    pub therapist_id: Uuid,
    pub status: RequestStatus,
}

pub async fn request_therapist(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<TherapistRequestBody>,
) -> Result<(StatusCode, Json<ApiOk<CreatedRequest>>), ApiError> {
    auth.require(&[Role::Patient])?;
    let patient = load_patient_for_user(&state, auth.user_id).await?;

    if patient.primary_therapist_id == Some(req.therapist_id) {
        return Err(ApiError::Conflict(
            "ALREADY_ASSIGNED",
            "This therapist is already assigned to you".into(),
        ));
    }

    let therapist_user: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT user_id FROM therapist
        WHERE therapist_id = $1 AND verification_status = $2
        "#,
    )
    .bind(req.therapist_id)
    .bind(VerificationStatus::Verified)
    .fetch_optional(&state.db)
    .await?;
    let therapist_user = therapist_user.ok_or_else(|| ApiError::not_found("therapist not found"))?;

    // the partial unique index allows one pending request per patient
    let created: Option<CreatedRequest> = sqlx::query_as::<_, CreatedRequest>(
        r#"
        INSERT INTO patient_request (patient_id, therapist_id, message)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        RETURNING request_id, therapist_id, status
        "#,
    )
    .bind(patient.patient_id)
    .bind(req.therapist_id)
    .bind(non_empty(req.message.as_deref()))
    .fetch_optional(&state.db)
    .await?;

    let Some(created) = created else {
        return Err(ApiError::Conflict(
            "REQUEST_PENDING",
            "You already have a pending therapist request".into(),
        ));
    };

    let message = format!(
        "New patient request from {} {}",
        patient.first_name, patient.last_name
    );
    push_notification(
        &state,
        NewNotification {
            sender: Some(auth.user_id),
            receiver: therapist_user,
            kind: NotificationType::TherapistRequest,
            message: &message,
            urgent: false,
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(ApiOk { data: created })))
}

/* ============================================================
   Parent / guardian
   ============================================================ */

pub async fn list_children(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<PatientRow>>>, ApiError> {
    auth.require(&[Role::ParentGuardian])?;

    let sql = format!(
        "SELECT {PATIENT_COLUMNS} FROM patient WHERE guardian_user_id = $1 ORDER BY first_name ASC"
    );
    let rows = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(auth.user_id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChildRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
}

pub async fn add_child(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<AddChildRequest>,
) -> Result<(StatusCode, Json<ApiOk<PatientRow>>), ApiError> {
    auth.require(&[Role::ParentGuardian])?;

    let (Some(first_name), Some(last_name)) = (
        non_empty(Some(req.first_name.as_str())),
        non_empty(Some(req.last_name.as_str())),
    ) else {
        return Err(ApiError::validation("firstName and lastName are required"));
    };

    let sql = format!(
        r#"
        INSERT INTO patient (first_name, last_name, date_of_birth, guardian_user_id)
        VALUES ($1, $2, $3, $4)
        RETURNING {PATIENT_COLUMNS}
        "#
    );
    let child = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(first_name)
        .bind(last_name)
        .bind(req.date_of_birth)
        .bind(auth.user_id)
        .fetch_one(&state.db)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiOk { data: child })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_null_and_value_are_distinct() {
        let absent: UpdatePatientRequest = serde_json::from_str("{}").unwrap();
        assert!(absent.phone.is_none());

        let null: UpdatePatientRequest = serde_json::from_str(r#"{"phone": null}"#).unwrap();
        assert_eq!(null.phone, Some(None));

        let set: UpdatePatientRequest =
            serde_json::from_str(r#"{"phone": "0771234567", "dateOfBirth": "1990-01-02"}"#).unwrap();
        assert_eq!(set.phone, Some(Some("0771234567".into())));
        assert_eq!(set.date_of_birth, Some(NaiveDate::from_ymd_opt(1990, 1, 2)));
    }

    #[test]
    fn merge_keeps_clears_or_replaces() {
        assert_eq!(merge_nullable(None, Some(1)), Some(1));
        assert_eq!(merge_nullable(Some(None), Some(1)), None);
        assert_eq!(merge_nullable(Some(Some(2)), Some(1)), Some(2));
    }

    #[test]
    fn blank_strings_become_none() {
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(Some(" Ann ")), Some("Ann".into()));
        assert_eq!(non_empty(None), None);
    }
}
