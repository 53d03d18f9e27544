use crate::domain::models::{AnswerInput, Review, ReviewStatus, User, UserRole};
use crate::error::{AppError, AppResult};
use crate::services::answers::{ReviewForm, SharedQuestion, Submission};
use crate::services::reviews::{CompletionStats, CycleRequest};
use crate::state::SharedState;
use crate::web::session::CurrentUser;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

const MANAGERS: &[UserRole] = &[UserRole::Admin, UserRole::Lead, UserRole::Mentor];

#[derive(Deserialize)]
pub struct AssignedQuery {
    /// Comma-separated statuses; empty or missing means all.
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct UserQuarterQuery {
    pub evaluated_user_id: Uuid,
    pub quarter_id: Uuid,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub answers: Vec<AnswerInput>,
    #[serde(default)]
    pub complete: bool,
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub status: ReviewStatus,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", post(initiate_cycle))
        .route("/assigned", get(assigned))
        .route("/stats", get(stats))
        .route("/outstanding", get(outstanding))
        .route("/shared", get(shared))
        .route("/:id", get(form))
        .route("/:id/answers", put(submit))
        .route("/:id/status", post(transition))
        .with_state(state)
}

fn parse_statuses(raw: Option<&str>) -> AppResult<Vec<ReviewStatus>> {
    raw.unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            ReviewStatus::try_from(s)
                .map_err(|_| AppError::invalid(format!("unknown review status {}", s.trim())))
        })
        .collect()
}

async fn initiate_cycle(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(payload): Json<CycleRequest>,
) -> AppResult<(StatusCode, Json<Vec<Review>>)> {
    current.require(MANAGERS)?;
    let reviews = state.reviews.initiate_cycle(payload, current.0.id).await?;
    Ok((StatusCode::CREATED, Json(reviews)))
}

async fn assigned(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<AssignedQuery>,
) -> AppResult<Json<Vec<Review>>> {
    let statuses = parse_statuses(query.status.as_deref())?;
    Ok(Json(state.reviews.get_assigned(user.id, &statuses).await?))
}

async fn stats(
    State(state): State<SharedState>,
    current: CurrentUser,
    Query(query): Query<UserQuarterQuery>,
) -> AppResult<Json<CompletionStats>> {
    current.require(MANAGERS)?;
    Ok(Json(
        state
            .reviews
            .completion_stats(query.evaluated_user_id, query.quarter_id)
            .await?,
    ))
}

async fn outstanding(
    State(state): State<SharedState>,
    current: CurrentUser,
    Query(query): Query<UserQuarterQuery>,
) -> AppResult<Json<Vec<User>>> {
    current.require(MANAGERS)?;
    Ok(Json(
        state
            .reviews
            .outstanding_reviewers(query.evaluated_user_id, query.quarter_id)
            .await?,
    ))
}

async fn shared(
    State(state): State<SharedState>,
    current: CurrentUser,
    Query(query): Query<UserQuarterQuery>,
) -> AppResult<Json<Vec<SharedQuestion>>> {
    if current.0.id != query.evaluated_user_id {
        current.require(MANAGERS)?;
    }
    Ok(Json(
        state
            .answers
            .shared_feedback(query.evaluated_user_id, query.quarter_id)
            .await?,
    ))
}

async fn form(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ReviewForm>> {
    Ok(Json(state.answers.load(id, user.id).await?))
}

async fn submit(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitRequest>,
) -> AppResult<Json<Submission>> {
    Ok(Json(
        state
            .answers
            .submit(id, user.id, &payload.answers, payload.complete)
            .await?,
    ))
}

async fn transition(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> AppResult<Json<Review>> {
    Ok(Json(
        state.reviews.transition(id, user.id, payload.status).await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_from_a_comma_list() {
        assert!(parse_statuses(None).unwrap().is_empty());
        assert_eq!(
            parse_statuses(Some("pending, DRAFT")).unwrap(),
            vec![ReviewStatus::Pending, ReviewStatus::Draft]
        );
        assert!(matches!(
            parse_statuses(Some("DONE")),
            Err(AppError::InvalidInput(_))
        ));
    }
}
