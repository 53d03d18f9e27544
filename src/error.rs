use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("could not validate credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("not enough permissions")]
    Forbidden,
    #[error("too many attempts, try again later")]
    TooManyRequests,
    #[error("identity provider error: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        AppError::InvalidInput(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidInput(_) | AppError::InvalidCredentials => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            AppError::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Maps a violated constraint to the message a caller should see.
/// Names match `migrations/0001_init.sql`.
fn constraint_message(constraint: &str) -> &'static str {
    match constraint {
        "only_one_active_quarter" => "another quarter is already active",
        "quarters_no_overlap" => "quarter with this period already exists",
        "quarters_period_check" => "quarter must start before it finishes",
        "users_email_key" => "user with such email exists",
        "users_auth_token_key" => "auth token collision",
        "reviews_assignment_key" => "review already assigned",
        "reviews_not_self_check" => "evaluated user can't be reviewer",
        "answers_review_question_key" => "question already answered in this review",
        "departments_name_key" => "department already exists",
        _ => "conflicting record",
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err.constraint().unwrap_or_default();
            match db_err.code().as_deref() {
                // unique_violation, exclusion_violation
                Some("23505") | Some("23P01") => {
                    return AppError::Conflict(constraint_message(constraint).to_string())
                }
                // check_violation
                Some("23514") => {
                    return AppError::InvalidInput(constraint_message(constraint).to_string())
                }
                // foreign_key_violation
                Some("23503") => return AppError::NotFound("referenced record"),
                _ => {}
            }
        }
        AppError::Internal(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Internal(format!("ticket store: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {err}"))
    }
}
