pub mod auth;
pub mod quarters;
pub mod reviews;
pub mod session;
pub mod templates;
pub mod users;

use crate::state::SharedState;
use axum::{routing::get, Router};

async fn health() -> &'static str {
    "OK"
}

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::router(state.clone()))
        .nest("/users", users::router(state.clone()))
        .nest("/departments", users::departments_router(state.clone()))
        .nest("/quarters", quarters::router(state.clone()))
        .nest("/templates", templates::router(state.clone()))
        .nest("/reviews", reviews::router(state))
}
