//! Review lifecycle rules.
//!
//! Everything here is pure: the services load rows from the store, ask these
//! functions what is allowed, and then write the outcome in one atomic call.

use crate::domain::models::{Answer, AnswerInput, Question, ReviewStatus};
use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub const NOT_ALL_ANSWERED: &str = "not all questions answered";
pub const ALREADY_SENT: &str = "review already sent";
pub const FOREIGN_QUESTION: &str = "questions is not a part of this review";

fn rank(status: ReviewStatus) -> u8 {
    match status {
        ReviewStatus::Pending => 0,
        ReviewStatus::Draft => 1,
        ReviewStatus::Completed => 2,
    }
}

/// Checks a status move. Moves only go forward; staying in PENDING or DRAFT
/// is allowed so a reviewer can keep saving a draft. Nothing leaves COMPLETED.
pub fn check_transition(from: ReviewStatus, to: ReviewStatus) -> AppResult<()> {
    if from == ReviewStatus::Completed {
        return Err(AppError::conflict(ALREADY_SENT));
    }
    if rank(to) < rank(from) {
        return Err(AppError::invalid(format!(
            "review can't move from {} back to {}",
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}

/// True when every question id has at least one answered id.
pub fn covers_all_questions<'a>(
    question_ids: impl IntoIterator<Item = &'a Uuid>,
    answered: &HashSet<Uuid>,
) -> bool {
    question_ids.into_iter().all(|id| answered.contains(id))
}

/// Rejects submissions that touch questions outside the template or name the
/// same question twice.
pub fn validate_submission(questions: &[Question], inputs: &[AnswerInput]) -> AppResult<()> {
    let known: HashSet<Uuid> = questions.iter().map(|q| q.id).collect();
    let mut seen = HashSet::with_capacity(inputs.len());
    for input in inputs {
        if !known.contains(&input.question_id) {
            return Err(AppError::invalid(FOREIGN_QUESTION));
        }
        if !seen.insert(input.question_id) {
            return Err(AppError::invalid(format!(
                "question {} is answered more than once",
                input.question_id
            )));
        }
    }
    Ok(())
}

/// Outcome of merging submitted answers into the ones already stored.
#[derive(Debug, Default, PartialEq)]
pub struct AnswerMerge {
    /// Existing answers whose text changes, keyed by answer id.
    pub updates: Vec<(Uuid, String)>,
    /// Questions answered for the first time.
    pub inserts: Vec<AnswerInput>,
    /// Question ids answered after the merge is applied.
    pub answered: HashSet<Uuid>,
}

/// Pairs submitted answers with stored ones by question id. List order of
/// either side never matters.
pub fn merge_answers(existing: &[Answer], inputs: &[AnswerInput]) -> AnswerMerge {
    let by_question: HashMap<Uuid, &Answer> =
        existing.iter().map(|a| (a.question_id, a)).collect();

    let mut merge = AnswerMerge {
        answered: by_question.keys().copied().collect(),
        ..Default::default()
    };

    for input in inputs {
        match by_question.get(&input.question_id) {
            Some(stored) => merge.updates.push((stored.id, input.text.clone())),
            None => merge.inserts.push(input.clone()),
        }
        merge.answered.insert(input.question_id);
    }
    merge
}

/// Status a submission asks for: COMPLETED when `complete` is set, DRAFT
/// otherwise.
pub fn requested_status(complete: bool) -> ReviewStatus {
    if complete {
        ReviewStatus::Completed
    } else {
        ReviewStatus::Draft
    }
}

/// A review may only be COMPLETED once every template question is answered.
pub fn ensure_complete(
    target: ReviewStatus,
    questions: &[Question],
    answered: &HashSet<Uuid>,
) -> AppResult<()> {
    if target == ReviewStatus::Completed
        && !covers_all_questions(questions.iter().map(|q| &q.id), answered)
    {
        return Err(AppError::invalid(NOT_ALL_ANSWERED));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuestionWithAnswer {
    #[serde(flatten)]
    pub question: Question,
    pub answer: Option<Answer>,
}

/// Left outer join of a template's questions with a review's answers, in
/// question order.
pub fn fill_form(questions: Vec<Question>, answers: Vec<Answer>) -> Vec<QuestionWithAnswer> {
    let mut by_question: HashMap<Uuid, Answer> =
        answers.into_iter().map(|a| (a.question_id, a)).collect();
    questions
        .into_iter()
        .map(|question| {
            let answer = by_question.remove(&question.id);
            QuestionWithAnswer { question, answer }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(template_id: Uuid, position: i32) -> Question {
        Question {
            id: Uuid::new_v4(),
            template_id,
            text: format!("question {position}"),
            description: None,
            position,
        }
    }

    fn answer(question_id: Uuid, text: &str) -> Answer {
        Answer {
            id: Uuid::new_v4(),
            reviewer_id: Uuid::nil(),
            question_id,
            review_id: Uuid::nil(),
            text: text.to_string(),
        }
    }

    fn input(question_id: Uuid, text: &str) -> AnswerInput {
        AnswerInput {
            question_id,
            text: text.to_string(),
        }
    }

    #[test]
    fn forward_moves_are_allowed() {
        assert!(check_transition(ReviewStatus::Pending, ReviewStatus::Draft).is_ok());
        assert!(check_transition(ReviewStatus::Draft, ReviewStatus::Completed).is_ok());
        assert!(check_transition(ReviewStatus::Pending, ReviewStatus::Completed).is_ok());
        assert!(check_transition(ReviewStatus::Draft, ReviewStatus::Draft).is_ok());
    }

    #[test]
    fn backward_moves_are_rejected() {
        let err = check_transition(ReviewStatus::Draft, ReviewStatus::Pending).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn completed_reviews_never_move() {
        for target in [
            ReviewStatus::Pending,
            ReviewStatus::Draft,
            ReviewStatus::Completed,
        ] {
            let err = check_transition(ReviewStatus::Completed, target).unwrap_err();
            assert!(matches!(err, AppError::Conflict(ref m) if m == ALREADY_SENT));
        }
    }

    #[test]
    fn merge_pairs_by_question_not_position() {
        let t = Uuid::new_v4();
        let (q1, q2, q3) = (question(t, 0), question(t, 1), question(t, 2));
        let stored = vec![answer(q1.id, "old one"), answer(q2.id, "old two")];

        // Reversed order, plus one new question.
        let inputs = vec![
            input(q3.id, "new three"),
            input(q2.id, "new two"),
            input(q1.id, "new one"),
        ];
        let merge = merge_answers(&stored, &inputs);

        assert!(merge.updates.contains(&(stored[0].id, "new one".to_string())));
        assert!(merge.updates.contains(&(stored[1].id, "new two".to_string())));
        assert_eq!(merge.inserts, vec![input(q3.id, "new three")]);
        assert_eq!(merge.answered.len(), 3);
    }

    #[test]
    fn merge_keeps_previously_answered_questions() {
        let t = Uuid::new_v4();
        let (q1, q2) = (question(t, 0), question(t, 1));
        let stored = vec![answer(q1.id, "kept")];
        let merge = merge_answers(&stored, &[input(q2.id, "added")]);
        assert!(merge.answered.contains(&q1.id));
        assert!(merge.answered.contains(&q2.id));
        assert!(merge.updates.is_empty());
    }

    #[test]
    fn foreign_questions_are_rejected() {
        let t = Uuid::new_v4();
        let questions = vec![question(t, 0)];
        let err = validate_submission(&questions, &[input(Uuid::new_v4(), "x")]).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(ref m) if m == FOREIGN_QUESTION));
    }

    #[test]
    fn repeated_questions_are_rejected() {
        let t = Uuid::new_v4();
        let q = question(t, 0);
        let err = validate_submission(
            std::slice::from_ref(&q),
            &[input(q.id, "a"), input(q.id, "b")],
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn completion_needs_every_question() {
        let t = Uuid::new_v4();
        let questions = vec![question(t, 0), question(t, 1), question(t, 2)];
        let partial: HashSet<Uuid> = questions[..2].iter().map(|q| q.id).collect();
        let full: HashSet<Uuid> = questions.iter().map(|q| q.id).collect();

        let err = ensure_complete(ReviewStatus::Completed, &questions, &partial).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(ref m) if m == NOT_ALL_ANSWERED));

        assert!(ensure_complete(ReviewStatus::Completed, &questions, &full).is_ok());
        assert!(ensure_complete(ReviewStatus::Draft, &questions, &partial).is_ok());
        assert_eq!(requested_status(true), ReviewStatus::Completed);
        assert_eq!(requested_status(false), ReviewStatus::Draft);
    }

    #[test]
    fn form_keeps_unanswered_questions() {
        let t = Uuid::new_v4();
        let questions = vec![question(t, 0), question(t, 1)];
        let answers = vec![answer(questions[1].id, "only second")];
        let form = fill_form(questions.clone(), answers);

        assert_eq!(form.len(), 2);
        assert_eq!(form[0].question, questions[0]);
        assert!(form[0].answer.is_none());
        assert_eq!(form[1].answer.as_ref().map(|a| a.text.as_str()), Some("only second"));
    }
}
