mod config;
mod crypto;
mod db;
mod domain;
mod error;
mod middleware;
mod services;
mod state;
mod web;

use crate::config::Settings;
use crate::db::tickets::{MemoryTicketStore, RedisTicketStore, TicketStore};
use crate::db::{MemoryStore, PgStore, Store};
use crate::state::{AppState, SharedState};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let store: Arc<dyn Store> = match &settings.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(settings.db_max_connections)
                .connect(database_url)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to database: {}", e);
                    e
                })?;
            tracing::info!("Database connection established");

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to run database migrations: {}", e);
                    e
                })?;
            tracing::info!("Database migrations completed");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, data is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let tickets: Arc<dyn TicketStore> = match &settings.redis_url {
        Some(redis_url) => {
            tracing::info!("Connecting to Redis...");
            Arc::new(RedisTicketStore::connect(redis_url).await?)
        }
        None => {
            tracing::warn!("REDIS_URL not set, tickets are kept in memory only");
            Arc::new(MemoryTicketStore::new())
        }
    };

    if settings.oauth.is_none() {
        tracing::info!("Google sign-in disabled: OAuth settings incomplete");
    }

    let addr = settings.bind_addr.clone();
    let shared: SharedState = Arc::new(AppState::new(settings, store, tickets)?);

    // Sign-in limiter cleanup
    let limiter = shared.sign_in_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.cleanup().await;
        }
    });

    let app = Router::new()
        .merge(web::routes(shared))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
