use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use uuid::Uuid;

use crate::config::PayHereSettings;
use crate::meeting::MeetingProvider;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub app_base_url: String,
    pub default_session_minutes: i64,
    pub payhere: PayHereSettings,
    pub meetings: Arc<dyn MeetingProvider>,
}

/* -------------------------
   Enumerations (smallint columns)
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum Role {
    Patient = 0,
    Admin = 1,
    Manager = 2,
    Therapist = 3,
    ParentGuardian = 4,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "PATIENT",
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::Therapist => "THERAPIST",
            Role::ParentGuardian => "PARENT_GUARDIAN",
        }
    }

    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum SessionStatus {
    Scheduled = 0,
    Completed = 1,
    Cancelled = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum PaymentStatus {
    Pending = 0,
    Complete = 1,
    Failed = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum VerificationStatus {
    PendingSubmission = 0,
    PendingReview = 1,
    Verified = 2,
    Rejected = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum RequestStatus {
    Pending = 0,
    Accepted = 1,
    Declined = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum NotificationType {
    System = 0,
    SessionBooked = 1,
    SessionCancelled = 2,
    SessionCompleted = 3,
    Payment = 4,
    TherapistRequest = 5,
    RequestAccepted = 6,
    RequestDeclined = 7,
    Verification = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum ContentKind {
    Blog = 0,
    Resource = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum ContentStatus {
    Draft = 0,
    Published = 1,
    Archived = 2,
}

/* -------------------------
   Shared DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.user_id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub primary_therapist_id: Option<Uuid>,
    pub guardian_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PATIENT_COLUMNS: &str = "patient_id, user_id, first_name, last_name, phone, date_of_birth, \
     primary_therapist_id, guardian_user_id, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TherapistRow {
    pub therapist_id: Uuid,
    pub user_id: Uuid,
    pub license_number: Option<String>,
    pub specialization: Option<String>,
    pub experience_years: Option<i32>,
    pub bio: Option<String>,
    pub session_rate_cents: i64,
    pub verification_status: VerificationStatus,
    pub verification_documents: sqlx::types::Json<Vec<String>>,
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing)]
    pub google_access_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const THERAPIST_COLUMNS: &str = "therapist_id, user_id, license_number, specialization, \
     experience_years, bio, session_rate_cents, verification_status, verification_documents, \
     rejection_reason, google_access_token, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SlotRow {
    pub slot_id: Uuid,
    pub therapist_id: Uuid,
    pub slot_date: NaiveDate,
    #[serde(serialize_with = "serialize_hhmm")]
    pub start_time: NaiveTime,
    #[serde(serialize_with = "serialize_hhmm")]
    pub end_time: NaiveTime,
    pub is_booked: bool,
    pub is_free: bool,
    pub is_blocked: bool,
}

pub const SLOT_COLUMNS: &str =
    "slot_id, therapist_id, slot_date, start_time, end_time, is_booked, is_free, is_blocked";

impl SlotRow {
    pub fn is_available(&self) -> bool {
        !self.is_booked && !self.is_blocked
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub session_id: Uuid,
    pub patient_id: Uuid,
    pub therapist_id: Uuid,
    pub availability_slot_id: Uuid,
    #[serde(serialize_with = "serialize_millis")]
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub session_type: String,
    pub status: SessionStatus,
    pub booked_rate_cents: i64,
    pub meeting_link: Option<String>,
    pub calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const SESSION_COLUMNS: &str = "session_id, patient_id, therapist_id, availability_slot_id, \
     scheduled_at, duration_minutes, session_type, status, booked_rate_cents, meeting_link, \
     calendar_event_id, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRow {
    pub payment_id: Uuid,
    pub order_id: String,
    pub session_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub metadata: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PAYMENT_COLUMNS: &str =
    "payment_id, order_id, session_id, amount_cents, currency, status, metadata, created_at, updated_at";

/* -------------------------
   Helpers
--------------------------*/

/// `2024-07-22T09:00:00.000Z`
pub fn format_millis(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn serialize_millis<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_millis(ts))
}

fn serialize_hhmm<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format("%H:%M").to_string())
}

/// Minor units to a two-decimal amount string (`150000` -> `"1500.00"`).
pub fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
