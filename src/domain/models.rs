use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Employer,
    Lead,
    Mentor,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Employer => "EMPLOYER",
            UserRole::Lead => "LEAD",
            UserRole::Mentor => "MENTOR",
            UserRole::Admin => "ADMIN",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "review_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewStatus {
    Pending,
    Draft,
    Completed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::Draft => "DRAFT",
            ReviewStatus::Completed => "COMPLETED",
        }
    }
}

impl TryFrom<&str> for ReviewStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(ReviewStatus::Pending),
            "DRAFT" => Ok(ReviewStatus::Draft),
            "COMPLETED" => Ok(ReviewStatus::Completed),
            _ => Err(()),
        }
    }
}

/// A user row. The mentor link is kept as a bare id and resolved through
/// the store on demand.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub father_name: Option<String>,
    pub role: UserRole,
    pub mentored_by_id: Option<Uuid>,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub father_name: Option<String>,
    pub role: UserRole,
    pub auth_token: Option<String>,
}

/// Admin-side edits. `None` leaves a field untouched; the mentor field uses
/// a nested option so it can be cleared.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    #[serde(default, with = "double_option")]
    pub mentored_by_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Quarter {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Question {
    pub id: Uuid,
    pub template_id: Uuid,
    pub text: String,
    pub description: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateWithQuestions {
    #[serde(flatten)]
    pub template: Template,
    pub questions: Vec<Question>,
    pub department_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Review {
    pub id: Uuid,
    pub evaluated_user_id: Uuid,
    pub reviewer_id: Uuid,
    pub template_id: Uuid,
    pub initiated_by_id: Uuid,
    pub quarter_id: Uuid,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub evaluated_user_id: Uuid,
    pub reviewer_id: Uuid,
    pub template_id: Uuid,
    pub initiated_by_id: Uuid,
    pub quarter_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Answer {
    pub id: Uuid,
    pub reviewer_id: Uuid,
    pub question_id: Uuid,
    pub review_id: Uuid,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerInput {
    pub question_id: Uuid,
    pub text: String,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
