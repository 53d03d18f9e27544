use crate::db::Store;
use crate::domain::models::{Department, User, UserUpdate};
use crate::error::{AppError, AppResult};
use std::sync::Arc;
use uuid::Uuid;

/// User directory and departments.
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn Store>,
}

impl IdentityService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: Uuid) -> AppResult<User> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound("user"))
    }

    pub async fn list(&self) -> AppResult<Vec<User>> {
        self.store.list_users().await
    }

    pub async fn mentees(&self, mentor_id: Uuid) -> AppResult<Vec<User>> {
        self.store.users_by_mentor(mentor_id).await
    }

    pub async fn update(&self, user_id: Uuid, update: UserUpdate) -> AppResult<User> {
        if update.mentored_by_id == Some(Some(user_id)) {
            return Err(AppError::invalid("user can't mentor themselves"));
        }
        let user = self
            .store
            .update_user(user_id, &update)
            .await?
            .ok_or(AppError::NotFound("user"))?;
        if update.is_active == Some(false) {
            tracing::info!("User {} deactivated", user_id);
        }
        Ok(user)
    }

    pub async fn create_department(&self, name: &str) -> AppResult<Department> {
        if name.trim().is_empty() {
            return Err(AppError::invalid("department name is required"));
        }
        self.store.create_department(name.trim()).await
    }

    pub async fn departments(&self) -> AppResult<Vec<Department>> {
        self.store.list_departments().await
    }

    pub async fn add_to_department(&self, user_id: Uuid, department_id: Uuid) -> AppResult<()> {
        self.get(user_id).await?;
        self.store.add_user_to_department(user_id, department_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::models::UserRole;
    use crate::services::testing;

    #[tokio::test]
    async fn mentor_link_can_be_set_and_cleared() {
        let store = Arc::new(MemoryStore::new());
        let users = IdentityService::new(store.clone());
        let mentor = testing::user(store.as_ref(), "mentor", UserRole::Mentor).await;
        let junior = testing::user(store.as_ref(), "junior", UserRole::Employer).await;

        users
            .update(
                junior.id,
                UserUpdate {
                    mentored_by_id: Some(Some(mentor.id)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let mentees = users.mentees(mentor.id).await.unwrap();
        assert_eq!(mentees.len(), 1);
        assert_eq!(mentees[0].id, junior.id);

        let cleared = users
            .update(
                junior.id,
                UserUpdate {
                    mentored_by_id: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.mentored_by_id.is_none());
        assert!(users.mentees(mentor.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deactivated_users_lose_their_token() {
        let store = Arc::new(MemoryStore::new());
        let users = IdentityService::new(store.clone());
        let user = testing::user(store.as_ref(), "leaver", UserRole::Employer).await;
        let token = user.auth_token.clone().unwrap();

        users
            .update(
                user.id,
                UserUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(store.find_active_user_by_token(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deactivating_write_clears_the_token_itself() {
        let store = MemoryStore::new();
        let user = testing::user(&store, "leaver", UserRole::Employer).await;
        assert!(user.auth_token.is_some());

        let update = UserUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        let updated = store.update_user(user.id, &update).await.unwrap().unwrap();
        assert!(!updated.is_active);
        assert!(updated.auth_token.is_none());

        let reactivated = store
            .update_user(
                user.id,
                &UserUpdate {
                    is_active: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(reactivated.auth_token.is_none());
    }

    #[tokio::test]
    async fn self_mentoring_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let users = IdentityService::new(store.clone());
        let user = testing::user(store.as_ref(), "solo", UserRole::Mentor).await;
        let err = users
            .update(
                user.id,
                UserUpdate {
                    mentored_by_id: Some(Some(user.id)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn duplicate_department_is_a_conflict() {
        let users = IdentityService::new(Arc::new(MemoryStore::new()));
        users.create_department("backend").await.unwrap();
        let err = users.create_department("backend").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
