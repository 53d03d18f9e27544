use crate::db::QuestionDraft;
use crate::domain::models::{Template, TemplateWithQuestions};
use crate::error::AppResult;
use crate::services::templates::TemplateUpdate;
use crate::state::SharedState;
use crate::web::session::CurrentUser;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct TemplateRequest {
    pub name: String,
    #[serde(default)]
    pub questions: Vec<QuestionDraft>,
    #[serde(default)]
    pub department_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_archived: bool,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route("/mine", get(my_templates))
        .route("/:id", get(get_template).put(update_template))
        .with_state(state)
}

async fn list_templates(
    State(state): State<SharedState>,
    _current: CurrentUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Template>>> {
    Ok(Json(state.templates.list(query.include_archived).await?))
}

async fn my_templates(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<Template>>> {
    Ok(Json(state.templates.for_user(user.id).await?))
}

async fn get_template(
    State(state): State<SharedState>,
    _current: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TemplateWithQuestions>> {
    Ok(Json(state.templates.get(id).await?))
}

async fn create_template(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(payload): Json<TemplateRequest>,
) -> AppResult<(StatusCode, Json<TemplateWithQuestions>)> {
    current.require_admin()?;
    let created = state
        .templates
        .create(&payload.name, &payload.questions, &payload.department_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_template(
    State(state): State<SharedState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TemplateUpdate>,
) -> AppResult<Json<TemplateWithQuestions>> {
    current.require_admin()?;
    Ok(Json(state.templates.update(id, payload).await?))
}
