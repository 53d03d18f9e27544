use crate::db::Store;
use crate::domain::models::{Answer, AnswerInput, Question, Review, ReviewStatus};
use crate::domain::review::{
    check_transition, ensure_complete, fill_form, merge_answers, requested_status,
    validate_submission, QuestionWithAnswer,
};
use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ReviewForm {
    pub review: Review,
    pub questions: Vec<QuestionWithAnswer>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReviewerAnswer {
    pub reviewer_id: Uuid,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SharedQuestion {
    #[serde(flatten)]
    pub question: Question,
    pub answers: Vec<ReviewerAnswer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub review: Review,
    pub answers: Vec<Answer>,
}

/// Reconciles submitted answers with stored ones and drives the review's
/// status from a submission.
#[derive(Clone)]
pub struct AnswerReconciler {
    store: Arc<dyn Store>,
}

impl AnswerReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn review_for(&self, review_id: Uuid, reviewer_id: Uuid) -> AppResult<Review> {
        self.store
            .find_review_for_reviewer(review_id, reviewer_id)
            .await?
            .ok_or(AppError::NotFound("review"))
    }

    /// Upserts answers by question and moves the review to DRAFT, or to
    /// COMPLETED when `complete` is set. Nothing is written on any error.
    pub async fn submit(
        &self,
        review_id: Uuid,
        reviewer_id: Uuid,
        inputs: &[AnswerInput],
        complete: bool,
    ) -> AppResult<Submission> {
        let review = self.review_for(review_id, reviewer_id).await?;
        let target = requested_status(complete);
        check_transition(review.status, target)?;

        let questions = self.store.template_questions(review.template_id).await?;
        validate_submission(&questions, inputs)?;

        let existing = self.store.answers_for_review(review.id).await?;
        let merge = merge_answers(&existing, inputs);
        ensure_complete(target, &questions, &merge.answered)?;

        let answers = self
            .store
            .save_answers(review.id, reviewer_id, inputs, review.status, target)
            .await?;
        tracing::info!(
            "Review {}: {} answers saved, status {}",
            review.id,
            answers.len(),
            target.as_str()
        );

        let review = self.review_for(review_id, reviewer_id).await?;
        Ok(Submission { review, answers })
    }

    /// Every template question paired with this review's answer, if any.
    pub async fn load(&self, review_id: Uuid, reviewer_id: Uuid) -> AppResult<ReviewForm> {
        let review = self.review_for(review_id, reviewer_id).await?;
        let questions = self.store.template_questions(review.template_id).await?;
        let answers = self.store.answers_for_review(review.id).await?;
        Ok(ReviewForm {
            questions: fill_form(questions, answers),
            review,
        })
    }

    /// Answers from COMPLETED reviews of a user in a quarter, grouped by
    /// question. Drafts are never shared.
    pub async fn shared_feedback(
        &self,
        evaluated_user_id: Uuid,
        quarter_id: Uuid,
    ) -> AppResult<Vec<SharedQuestion>> {
        let completed: Vec<Review> = self
            .store
            .reviews_of_user(evaluated_user_id, quarter_id)
            .await?
            .into_iter()
            .filter(|r| r.status == ReviewStatus::Completed)
            .collect();
        if completed.is_empty() {
            return Ok(Vec::new());
        }

        let review_ids: Vec<Uuid> = completed.iter().map(|r| r.id).collect();
        let mut by_question: HashMap<Uuid, Vec<ReviewerAnswer>> = HashMap::new();
        for answer in self.store.answers_for_reviews(&review_ids).await? {
            by_question
                .entry(answer.question_id)
                .or_default()
                .push(ReviewerAnswer {
                    reviewer_id: answer.reviewer_id,
                    text: answer.text,
                });
        }

        let mut template_ids: Vec<Uuid> = completed.iter().map(|r| r.template_id).collect();
        template_ids.sort();
        template_ids.dedup();

        let mut shared = Vec::new();
        for template_id in template_ids {
            for question in self.store.template_questions(template_id).await? {
                let answers = by_question.remove(&question.id).unwrap_or_default();
                shared.push(SharedQuestion { question, answers });
            }
        }
        Ok(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::models::{NewReview, UserRole};
    use crate::domain::review::{ALREADY_SENT, FOREIGN_QUESTION, NOT_ALL_ANSWERED};
    use crate::services::testing;

    struct Fixture {
        store: Arc<MemoryStore>,
        answers: AnswerReconciler,
        review: Review,
        questions: Vec<Question>,
    }

    async fn fixture(questions: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let evaluated = testing::user(store.as_ref(), "eve", UserRole::Employer).await;
        let reviewer = testing::user(store.as_ref(), "rob", UserRole::Employer).await;
        let tpl = testing::template(store.as_ref(), questions).await;
        let quarter = testing::active_quarter(store.as_ref()).await;
        let review = store
            .insert_reviews(&[NewReview {
                evaluated_user_id: evaluated.id,
                reviewer_id: reviewer.id,
                template_id: tpl.template.id,
                initiated_by_id: evaluated.id,
                quarter_id: quarter.id,
            }])
            .await
            .unwrap()
            .remove(0);
        Fixture {
            answers: AnswerReconciler::new(store.clone()),
            store,
            review,
            questions: tpl.questions,
        }
    }

    fn input(question: &Question, text: &str) -> AnswerInput {
        AnswerInput {
            question_id: question.id,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn draft_keeps_answer_ids_on_resubmit() {
        let f = fixture(2).await;
        let (r, q) = (&f.review, &f.questions);

        let first = f
            .answers
            .submit(r.id, r.reviewer_id, &[input(&q[0], "a"), input(&q[1], "b")], false)
            .await
            .unwrap();
        assert_eq!(first.review.status, ReviewStatus::Draft);

        // Same questions, reversed order.
        f.answers
            .submit(r.id, r.reviewer_id, &[input(&q[1], "b2"), input(&q[0], "a2")], false)
            .await
            .unwrap();

        let stored = f.store.answers_for_review(r.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        for answer in &stored {
            let before = first.answers.iter().find(|a| a.question_id == answer.question_id).unwrap();
            assert_eq!(before.id, answer.id);
        }
        let a = stored.iter().find(|a| a.question_id == q[0].id).unwrap();
        assert_eq!(a.text, "a2");
    }

    #[tokio::test]
    async fn partial_completion_writes_nothing() {
        let f = fixture(3).await;
        let (r, q) = (&f.review, &f.questions);
        let err = f
            .answers
            .submit(r.id, r.reviewer_id, &[input(&q[0], "a"), input(&q[1], "b")], true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(ref m) if m == NOT_ALL_ANSWERED));
        assert!(f.store.answers_for_review(r.id).await.unwrap().is_empty());

        let review = f.store.find_review_for_reviewer(r.id, r.reviewer_id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Pending);
    }

    #[tokio::test]
    async fn completion_counts_previously_saved_answers() {
        let f = fixture(2).await;
        let (r, q) = (&f.review, &f.questions);
        f.answers
            .submit(r.id, r.reviewer_id, &[input(&q[0], "a")], false)
            .await
            .unwrap();
        let done = f
            .answers
            .submit(r.id, r.reviewer_id, &[input(&q[1], "b")], true)
            .await
            .unwrap();
        assert_eq!(done.review.status, ReviewStatus::Completed);
    }

    #[tokio::test]
    async fn completed_review_rejects_submissions() {
        let f = fixture(1).await;
        let (r, q) = (&f.review, &f.questions);
        f.answers
            .submit(r.id, r.reviewer_id, &[input(&q[0], "final")], true)
            .await
            .unwrap();

        let err = f
            .answers
            .submit(r.id, r.reviewer_id, &[input(&q[0], "changed")], false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == ALREADY_SENT));
        let stored = f.store.answers_for_review(r.id).await.unwrap();
        assert_eq!(stored[0].text, "final");
    }

    #[tokio::test]
    async fn foreign_question_is_rejected() {
        let f = fixture(1).await;
        let r = &f.review;
        let other = testing::template(f.store.as_ref(), 1).await;
        let err = f
            .answers
            .submit(r.id, r.reviewer_id, &[input(&other.questions[0], "x")], false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(ref m) if m == FOREIGN_QUESTION));
    }

    #[tokio::test]
    async fn unknown_reviewer_is_not_found() {
        let f = fixture(1).await;
        let err = f
            .answers
            .submit(f.review.id, Uuid::new_v4(), &[], false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("review")));
    }

    #[tokio::test]
    async fn form_pairs_questions_with_answers() {
        let f = fixture(2).await;
        let (r, q) = (&f.review, &f.questions);
        f.answers
            .submit(r.id, r.reviewer_id, &[input(&q[1], "second")], false)
            .await
            .unwrap();
        let form = f.answers.load(r.id, r.reviewer_id).await.unwrap();
        assert_eq!(form.questions.len(), 2);
        assert!(form.questions[0].answer.is_none());
        assert_eq!(form.questions[1].answer.as_ref().unwrap().text, "second");
    }

    #[tokio::test]
    async fn only_completed_reviews_are_shared() {
        let f = fixture(1).await;
        let (r, q) = (&f.review, &f.questions);
        f.answers
            .submit(r.id, r.reviewer_id, &[input(&q[0], "draft")], false)
            .await
            .unwrap();
        assert!(f
            .answers
            .shared_feedback(r.evaluated_user_id, r.quarter_id)
            .await
            .unwrap()
            .is_empty());

        f.answers
            .submit(r.id, r.reviewer_id, &[input(&q[0], "final")], true)
            .await
            .unwrap();
        let shared = f
            .answers
            .shared_feedback(r.evaluated_user_id, r.quarter_id)
            .await
            .unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(
            shared[0].answers,
            vec![ReviewerAnswer {
                reviewer_id: r.reviewer_id,
                text: "final".into()
            }]
        );
    }

    #[tokio::test]
    async fn concurrent_submissions_store_one_answer_per_question() {
        let f = fixture(1).await;
        let q = f.questions[0].clone();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let answers = f.answers.clone();
                let (id, reviewer) = (f.review.id, f.review.reviewer_id);
                let q = q.clone();
                tokio::spawn(async move {
                    answers
                        .submit(id, reviewer, &[input(&q, &format!("take {i}"))], false)
                        .await
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.await.unwrap();
        }
        assert_eq!(f.store.answers_for_review(f.review.id).await.unwrap().len(), 1);
    }
}
