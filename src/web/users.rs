use crate::domain::models::{Department, User, UserUpdate};
use crate::error::AppResult;
use crate::state::SharedState;
use crate::web::session::CurrentUser;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct DepartmentRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct MemberRequest {
    pub user_id: Uuid,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_users))
        .route("/me", get(me))
        .route("/me/mentees", get(my_mentees))
        .route("/:id", patch(update_user))
        .with_state(state)
}

pub fn departments_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_departments).post(create_department))
        .route("/:id/members", post(add_member))
        .with_state(state)
}

async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

async fn my_mentees(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<User>>> {
    Ok(Json(state.users.mentees(user.id).await?))
}

async fn list_users(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> AppResult<Json<Vec<User>>> {
    current.require_admin()?;
    Ok(Json(state.users.list().await?))
}

async fn update_user(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UserUpdate>,
) -> AppResult<Json<User>> {
    current.require_admin()?;
    Ok(Json(state.users.update(id, payload).await?))
}

async fn list_departments(
    State(state): State<SharedState>,
    _current: CurrentUser,
) -> AppResult<Json<Vec<Department>>> {
    Ok(Json(state.users.departments().await?))
}

async fn create_department(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(payload): Json<DepartmentRequest>,
) -> AppResult<(StatusCode, Json<Department>)> {
    current.require_admin()?;
    let department = state.users.create_department(&payload.name).await?;
    Ok((StatusCode::CREATED, Json(department)))
}

async fn add_member(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<MemberRequest>,
) -> AppResult<StatusCode> {
    current.require_admin()?;
    state.users.add_to_department(payload.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
