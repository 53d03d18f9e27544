//! Persistence seam.
//!
//! Services talk to a [`Store`]; each mutating method is one atomic write in
//! the backing store. Uniqueness rules (one active quarter, one answer per
//! question per review, no overlapping quarters) are enforced here rather
//! than by the callers.

pub mod memory;
pub mod postgres;
pub mod tickets;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::domain::models::{
    Answer, AnswerInput, Department, NewReview, NewUser, Question, Quarter, Review,
    ReviewStatus, Template, TemplateWithQuestions, User, UserUpdate,
};
use crate::domain::quarter::Period;
use crate::error::AppResult;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Returned when a compare-and-set on a review's status loses a race.
pub const STALE_REVIEW: &str = "review was changed by another request";

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionDraft {
    pub id: Option<Uuid>,
    pub text: String,
    pub description: Option<String>,
}

/// A full rewrite of a template. `questions` is the new ordered list; drafts
/// with an id update that question, drafts without one are inserted.
#[derive(Debug, Clone)]
pub struct TemplateChanges {
    pub name: String,
    pub is_archived: bool,
    pub questions: Vec<QuestionDraft>,
    pub delete_question_ids: Vec<Uuid>,
    pub department_ids: Option<Vec<Uuid>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ---- users ----
    async fn find_user_by_id(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn find_active_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn find_active_user_by_token(&self, token: &str) -> AppResult<Option<User>>;
    async fn find_active_users_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<User>>;
    async fn create_user(&self, user: NewUser) -> AppResult<User>;
    async fn set_user_token(&self, user_id: Uuid, token: Option<&str>) -> AppResult<()>;
    /// Deactivating a user clears their token in the same write.
    async fn update_user(&self, user_id: Uuid, update: &UserUpdate) -> AppResult<Option<User>>;
    async fn list_users(&self) -> AppResult<Vec<User>>;
    async fn users_by_mentor(&self, mentor_id: Uuid) -> AppResult<Vec<User>>;

    // ---- departments ----
    async fn create_department(&self, name: &str) -> AppResult<Department>;
    async fn list_departments(&self) -> AppResult<Vec<Department>>;
    async fn add_user_to_department(&self, user_id: Uuid, department_id: Uuid) -> AppResult<()>;
    async fn department_ids_for_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>>;

    // ---- quarters ----
    async fn insert_quarter(&self, period: Period, is_active: bool) -> AppResult<Quarter>;
    async fn update_quarter(
        &self,
        id: Uuid,
        period: Period,
        is_active: bool,
    ) -> AppResult<Option<Quarter>>;
    async fn find_quarter(&self, id: Uuid) -> AppResult<Option<Quarter>>;
    async fn active_quarter(&self) -> AppResult<Option<Quarter>>;
    async fn list_quarters(&self) -> AppResult<Vec<Quarter>>;

    // ---- templates ----
    async fn insert_template(
        &self,
        name: &str,
        questions: &[QuestionDraft],
        department_ids: &[Uuid],
    ) -> AppResult<TemplateWithQuestions>;
    async fn find_template(&self, id: Uuid) -> AppResult<Option<Template>>;
    async fn template_questions(&self, template_id: Uuid) -> AppResult<Vec<Question>>;
    async fn template_department_ids(&self, template_id: Uuid) -> AppResult<Vec<Uuid>>;
    /// `department_ids = None` lists every template.
    async fn list_templates(
        &self,
        department_ids: Option<&[Uuid]>,
        include_archived: bool,
    ) -> AppResult<Vec<Template>>;
    async fn apply_template_changes(&self, id: Uuid, changes: &TemplateChanges) -> AppResult<()>;
    /// Subset of `question_ids` that already carry at least one answer.
    async fn answered_question_ids(&self, question_ids: &[Uuid]) -> AppResult<HashSet<Uuid>>;

    // ---- reviews ----
    /// Inserts every review or none of them.
    async fn insert_reviews(&self, reviews: &[NewReview]) -> AppResult<Vec<Review>>;
    async fn find_review_for_reviewer(
        &self,
        review_id: Uuid,
        reviewer_id: Uuid,
    ) -> AppResult<Option<Review>>;
    /// Empty `statuses` means any status.
    async fn reviews_by_reviewer(
        &self,
        reviewer_id: Uuid,
        statuses: &[ReviewStatus],
    ) -> AppResult<Vec<Review>>;
    async fn reviews_of_user(
        &self,
        evaluated_user_id: Uuid,
        quarter_id: Uuid,
    ) -> AppResult<Vec<Review>>;
    /// `(completed, total)` for one evaluated user in one quarter.
    async fn review_counts(&self, evaluated_user_id: Uuid, quarter_id: Uuid)
        -> AppResult<(i64, i64)>;
    /// Moves `review_id` to `status` only if it is still `expected`;
    /// otherwise fails with a conflict and writes nothing.
    async fn set_review_status(
        &self,
        review_id: Uuid,
        expected: ReviewStatus,
        status: ReviewStatus,
    ) -> AppResult<Review>;

    // ---- answers ----
    async fn answers_for_review(&self, review_id: Uuid) -> AppResult<Vec<Answer>>;
    async fn answers_for_reviews(&self, review_ids: &[Uuid]) -> AppResult<Vec<Answer>>;
    /// Upserts answers keyed by `(review_id, question_id)` and moves the
    /// review from `expected` to `status`, all in one atomic write.
    async fn save_answers(
        &self,
        review_id: Uuid,
        reviewer_id: Uuid,
        inputs: &[AnswerInput],
        expected: ReviewStatus,
        status: ReviewStatus,
    ) -> AppResult<Vec<Answer>>;
}
