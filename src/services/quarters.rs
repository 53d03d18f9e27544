use crate::db::Store;
use crate::domain::models::Quarter;
use crate::domain::quarter::Period;
use crate::error::{AppError, AppResult};
use std::sync::Arc;
use uuid::Uuid;

/// Owns quarter lifecycle. At most one quarter is active and quarters never
/// overlap; both rules are storage constraints, so this layer just forwards
/// and lets a losing concurrent write come back as a conflict.
#[derive(Clone)]
pub struct QuarterRegistry {
    store: Arc<dyn Store>,
}

impl QuarterRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, period: Period, is_active: bool) -> AppResult<Quarter> {
        let quarter = self.store.insert_quarter(period, is_active).await?;
        tracing::info!(
            "Quarter {} created ({} - {}, active: {})",
            quarter.id,
            quarter.started_at,
            quarter.finished_at,
            quarter.is_active
        );
        Ok(quarter)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Quarter> {
        self.store
            .find_quarter(id)
            .await?
            .ok_or(AppError::NotFound("quarter"))
    }

    pub async fn list(&self) -> AppResult<Vec<Quarter>> {
        self.store.list_quarters().await
    }

    pub async fn active(&self) -> AppResult<Option<Quarter>> {
        self.store.active_quarter().await
    }

    pub async fn activate(&self, id: Uuid) -> AppResult<Quarter> {
        let quarter = self.get(id).await?;
        if quarter.is_active {
            return Ok(quarter);
        }
        let quarter = self.update(id, Period::from(&quarter), true).await?;
        tracing::info!("Quarter {} activated", id);
        Ok(quarter)
    }

    pub async fn deactivate(&self, id: Uuid) -> AppResult<Quarter> {
        let quarter = self.get(id).await?;
        if !quarter.is_active {
            return Ok(quarter);
        }
        let quarter = self.update(id, Period::from(&quarter), false).await?;
        tracing::info!("Quarter {} deactivated", id);
        Ok(quarter)
    }

    pub async fn update(&self, id: Uuid, period: Period, is_active: bool) -> AppResult<Quarter> {
        self.store
            .update_quarter(id, period, is_active)
            .await?
            .ok_or(AppError::NotFound("quarter"))
    }
}
