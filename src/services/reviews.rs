use crate::db::Store;
use crate::domain::models::{NewReview, Review, ReviewStatus, User};
use crate::domain::review::{check_transition, ensure_complete};
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CycleRequest {
    pub evaluated_user_id: Uuid,
    pub template_id: Uuid,
    pub reviewer_ids: Vec<Uuid>,
    pub quarter_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CompletionStats {
    pub completed: i64,
    pub total: i64,
}

/// Review assignments and their status machine.
#[derive(Clone)]
pub struct ReviewLedger {
    store: Arc<dyn Store>,
}

impl ReviewLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Assigns one PENDING review per reviewer. Either every review is
    /// created or none is.
    pub async fn initiate_cycle(&self, request: CycleRequest, initiator_id: Uuid) -> AppResult<Vec<Review>> {
        let mut seen = HashSet::new();
        let reviewer_ids: Vec<Uuid> = request
            .reviewer_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        if reviewer_ids.is_empty() {
            return Err(AppError::invalid("at least one reviewer is required"));
        }
        if reviewer_ids.contains(&request.evaluated_user_id) {
            return Err(AppError::invalid("evaluated user can't be reviewer"));
        }

        self.store
            .find_quarter(request.quarter_id)
            .await?
            .ok_or(AppError::NotFound("quarter"))?;
        let template = self
            .store
            .find_template(request.template_id)
            .await?
            .ok_or(AppError::NotFound("template"))?;
        if template.is_archived {
            return Err(AppError::invalid("template is archived"));
        }

        let mut wanted = reviewer_ids.clone();
        wanted.push(request.evaluated_user_id);
        let found: HashSet<Uuid> = self
            .store
            .find_active_users_by_ids(&wanted)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        if !found.contains(&request.evaluated_user_id) {
            return Err(AppError::NotFound("evaluated user"));
        }
        if reviewer_ids.iter().any(|id| !found.contains(id)) {
            return Err(AppError::NotFound("reviewer"));
        }

        let rows: Vec<NewReview> = reviewer_ids
            .iter()
            .map(|reviewer_id| NewReview {
                evaluated_user_id: request.evaluated_user_id,
                reviewer_id: *reviewer_id,
                template_id: request.template_id,
                initiated_by_id: initiator_id,
                quarter_id: request.quarter_id,
            })
            .collect();
        let reviews = self.store.insert_reviews(&rows).await?;
        tracing::info!(
            "Review cycle for user {} started by {}: {} reviewers",
            request.evaluated_user_id,
            initiator_id,
            reviews.len()
        );
        Ok(reviews)
    }

    pub async fn get_assigned(&self, reviewer_id: Uuid, statuses: &[ReviewStatus]) -> AppResult<Vec<Review>> {
        self.store.reviews_by_reviewer(reviewer_id, statuses).await
    }

    pub async fn find_for_reviewer(&self, review_id: Uuid, reviewer_id: Uuid) -> AppResult<Review> {
        self.store
            .find_review_for_reviewer(review_id, reviewer_id)
            .await?
            .ok_or(AppError::NotFound("review"))
    }

    /// Moves a review forward. The write is a compare-and-set on the status
    /// read here, so a concurrent change surfaces as a conflict.
    pub async fn transition(&self, review_id: Uuid, reviewer_id: Uuid, target: ReviewStatus) -> AppResult<Review> {
        let review = self.find_for_reviewer(review_id, reviewer_id).await?;
        check_transition(review.status, target)?;

        if target == ReviewStatus::Completed {
            let questions = self.store.template_questions(review.template_id).await?;
            let answered: HashSet<Uuid> = self
                .store
                .answers_for_review(review.id)
                .await?
                .into_iter()
                .map(|a| a.question_id)
                .collect();
            ensure_complete(target, &questions, &answered)?;
        }

        let updated = self
            .store
            .set_review_status(review.id, review.status, target)
            .await?;
        if target == ReviewStatus::Completed {
            tracing::info!("Review {} completed by {}", review.id, reviewer_id);
        }
        Ok(updated)
    }

    pub async fn completion_stats(&self, evaluated_user_id: Uuid, quarter_id: Uuid) -> AppResult<CompletionStats> {
        let (completed, total) = self.store.review_counts(evaluated_user_id, quarter_id).await?;
        Ok(CompletionStats { completed, total })
    }

    /// Reviewers who still owe a review of `evaluated_user_id` this quarter.
    pub async fn outstanding_reviewers(&self, evaluated_user_id: Uuid, quarter_id: Uuid) -> AppResult<Vec<User>> {
        let pending: Vec<Uuid> = self
            .store
            .reviews_of_user(evaluated_user_id, quarter_id)
            .await?
            .into_iter()
            .filter(|r| r.status != ReviewStatus::Completed)
            .map(|r| r.reviewer_id)
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        self.store.find_active_users_by_ids(&pending).await
    }
}
