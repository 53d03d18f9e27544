use crate::domain::models::Quarter;
use crate::domain::quarter::Period;
use crate::error::AppResult;
use crate::state::SharedState;
use crate::web::session::CurrentUser;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct QuarterRequest {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub is_active: bool,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_quarters).post(create_quarter))
        .route("/active", get(active_quarter))
        .route("/:id", get(get_quarter).patch(update_quarter))
        .route("/:id/activate", post(activate_quarter))
        .route("/:id/deactivate", post(deactivate_quarter))
        .with_state(state)
}

async fn list_quarters(
    State(state): State<SharedState>,
    _current: CurrentUser,
) -> AppResult<Json<Vec<Quarter>>> {
    Ok(Json(state.quarters.list().await?))
}

async fn active_quarter(
    State(state): State<SharedState>,
    _current: CurrentUser,
) -> AppResult<Json<Option<Quarter>>> {
    Ok(Json(state.quarters.active().await?))
}

async fn get_quarter(
    State(state): State<SharedState>,
    _current: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Quarter>> {
    Ok(Json(state.quarters.get(id).await?))
}

async fn create_quarter(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(payload): Json<QuarterRequest>,
) -> AppResult<(StatusCode, Json<Quarter>)> {
    current.require_admin()?;
    let period = Period::new(payload.started_at, payload.finished_at)?;
    let quarter = state.quarters.create(period, payload.is_active).await?;
    Ok((StatusCode::CREATED, Json(quarter)))
}

async fn update_quarter(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<QuarterRequest>,
) -> AppResult<Json<Quarter>> {
    current.require_admin()?;
    let period = Period::new(payload.started_at, payload.finished_at)?;
    Ok(Json(state.quarters.update(id, period, payload.is_active).await?))
}

async fn activate_quarter(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Quarter>> {
    current.require_admin()?;
    Ok(Json(state.quarters.activate(id).await?))
}

async fn deactivate_quarter(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Quarter>> {
    current.require_admin()?;
    Ok(Json(state.quarters.deactivate(id).await?))
}
