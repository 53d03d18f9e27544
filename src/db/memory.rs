//! In-memory implementation of [`Store`].
//!
//! All tables live behind one `RwLock`, so every mutating call is a single
//! critical section and enforces the same constraints as the SQL schema.
//! State is lost on restart; used when no `DATABASE_URL` is configured and
//! as the test fixture.

use super::{QuestionDraft, Store, TemplateChanges, STALE_REVIEW};
use crate::domain::models::{
    Answer, AnswerInput, Department, NewReview, NewUser, Question, Quarter, Review,
    ReviewStatus, Template, TemplateWithQuestions, User, UserUpdate,
};
use crate::domain::quarter::Period;
use crate::domain::review::merge_answers;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    departments: Vec<Department>,
    department_users: HashSet<(Uuid, Uuid)>,
    department_templates: HashSet<(Uuid, Uuid)>,
    quarters: Vec<Quarter>,
    templates: Vec<Template>,
    questions: Vec<Question>,
    reviews: Vec<Review>,
    answers: Vec<Answer>,
}

impl Tables {
    fn check_quarter(&self, skip: Option<Uuid>, period: &Period, is_active: bool) -> AppResult<()> {
        for other in self.quarters.iter().filter(|q| Some(q.id) != skip) {
            if period.overlaps(&Period::from(other)) {
                return Err(AppError::conflict("quarter with this period already exists"));
            }
            if is_active && other.is_active {
                return Err(AppError::conflict("another quarter is already active"));
            }
        }
        Ok(())
    }

    fn questions_of(&self, template_id: Uuid) -> Vec<Question> {
        let mut questions: Vec<Question> = self
            .questions
            .iter()
            .filter(|q| q.template_id == template_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.position);
        questions
    }

    fn review_mut(&mut self, review_id: Uuid) -> AppResult<&mut Review> {
        self.reviews
            .iter_mut()
            .find(|r| r.id == review_id)
            .ok_or(AppError::NotFound("review"))
    }
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_active_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t
            .users
            .iter()
            .find(|u| u.is_active && u.email == email)
            .cloned())
    }

    async fn find_active_user_by_token(&self, token: &str) -> AppResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t
            .users
            .iter()
            .find(|u| u.is_active && u.auth_token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_active_users_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<User>> {
        let t = self.tables.read().await;
        Ok(t
            .users
            .iter()
            .filter(|u| u.is_active && ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut t = self.tables.write().await;
        if t.users.iter().any(|u| u.email == user.email) {
            return Err(AppError::conflict("user with such email exists"));
        }
        if let Some(token) = &user.auth_token {
            if t.users.iter().any(|u| u.auth_token.as_ref() == Some(token)) {
                return Err(AppError::conflict("auth token collision"));
            }
        }
        let row = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            father_name: user.father_name,
            role: user.role,
            mentored_by_id: None,
            auth_token: user.auth_token,
            is_active: true,
            created_at: Utc::now(),
        };
        t.users.push(row.clone());
        Ok(row)
    }

    async fn set_user_token(&self, user_id: Uuid, token: Option<&str>) -> AppResult<()> {
        let mut t = self.tables.write().await;
        if let Some(token) = token {
            if t
                .users
                .iter()
                .any(|u| u.id != user_id && u.auth_token.as_deref() == Some(token))
            {
                return Err(AppError::conflict("auth token collision"));
            }
        }
        let user = t
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(AppError::NotFound("user"))?;
        user.auth_token = token.map(str::to_string);
        Ok(())
    }

    async fn update_user(&self, user_id: Uuid, update: &UserUpdate) -> AppResult<Option<User>> {
        let mut t = self.tables.write().await;
        if let Some(Some(mentor_id)) = update.mentored_by_id {
            if !t.users.iter().any(|u| u.id == mentor_id) {
                return Err(AppError::NotFound("referenced record"));
            }
        }
        let Some(user) = t.users.iter_mut().find(|u| u.id == user_id) else {
            return Ok(None);
        };
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(active) = update.is_active {
            user.is_active = active;
            if !active {
                user.auth_token = None;
            }
        }
        if let Some(mentor) = update.mentored_by_id {
            user.mentored_by_id = mentor;
        }
        Ok(Some(user.clone()))
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let t = self.tables.read().await;
        Ok(t.users.clone())
    }

    async fn users_by_mentor(&self, mentor_id: Uuid) -> AppResult<Vec<User>> {
        let t = self.tables.read().await;
        Ok(t
            .users
            .iter()
            .filter(|u| u.mentored_by_id == Some(mentor_id))
            .cloned()
            .collect())
    }

    async fn create_department(&self, name: &str) -> AppResult<Department> {
        let mut t = self.tables.write().await;
        if t.departments.iter().any(|d| d.name == name) {
            return Err(AppError::conflict("department already exists"));
        }
        let row = Department {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        t.departments.push(row.clone());
        Ok(row)
    }

    async fn list_departments(&self) -> AppResult<Vec<Department>> {
        let t = self.tables.read().await;
        Ok(t.departments.clone())
    }

    async fn add_user_to_department(&self, user_id: Uuid, department_id: Uuid) -> AppResult<()> {
        let mut t = self.tables.write().await;
        if !t.users.iter().any(|u| u.id == user_id)
            || !t.departments.iter().any(|d| d.id == department_id)
        {
            return Err(AppError::NotFound("referenced record"));
        }
        t.department_users.insert((department_id, user_id));
        Ok(())
    }

    async fn department_ids_for_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let t = self.tables.read().await;
        Ok(t
            .department_users
            .iter()
            .filter(|(_, u)| *u == user_id)
            .map(|(d, _)| *d)
            .collect())
    }

    async fn insert_quarter(&self, period: Period, is_active: bool) -> AppResult<Quarter> {
        let mut t = self.tables.write().await;
        t.check_quarter(None, &period, is_active)?;
        let row = Quarter {
            id: Uuid::new_v4(),
            started_at: period.started_at(),
            finished_at: period.finished_at(),
            is_active,
        };
        t.quarters.push(row.clone());
        Ok(row)
    }

    async fn update_quarter(
        &self,
        id: Uuid,
        period: Period,
        is_active: bool,
    ) -> AppResult<Option<Quarter>> {
        let mut t = self.tables.write().await;
        if !t.quarters.iter().any(|q| q.id == id) {
            return Ok(None);
        }
        t.check_quarter(Some(id), &period, is_active)?;
        let quarter = t
            .quarters
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or(AppError::NotFound("quarter"))?;
        quarter.started_at = period.started_at();
        quarter.finished_at = period.finished_at();
        quarter.is_active = is_active;
        Ok(Some(quarter.clone()))
    }

    async fn find_quarter(&self, id: Uuid) -> AppResult<Option<Quarter>> {
        let t = self.tables.read().await;
        Ok(t.quarters.iter().find(|q| q.id == id).cloned())
    }

    async fn active_quarter(&self) -> AppResult<Option<Quarter>> {
        let t = self.tables.read().await;
        Ok(t.quarters.iter().find(|q| q.is_active).cloned())
    }

    async fn list_quarters(&self) -> AppResult<Vec<Quarter>> {
        let t = self.tables.read().await;
        let mut quarters = t.quarters.clone();
        quarters.sort_by_key(|q| q.started_at);
        Ok(quarters)
    }

    async fn insert_template(
        &self,
        name: &str,
        questions: &[QuestionDraft],
        department_ids: &[Uuid],
    ) -> AppResult<TemplateWithQuestions> {
        let mut t = self.tables.write().await;
        if department_ids
            .iter()
            .any(|id| !t.departments.iter().any(|d| d.id == *id))
        {
            return Err(AppError::NotFound("referenced record"));
        }
        let now = Utc::now();
        let template = Template {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_archived: false,
            created_at: now,
            updated_at: now,
        };
        let rows: Vec<Question> = questions
            .iter()
            .enumerate()
            .map(|(idx, draft)| Question {
                id: Uuid::new_v4(),
                template_id: template.id,
                text: draft.text.clone(),
                description: draft.description.clone(),
                position: idx as i32,
            })
            .collect();
        t.templates.push(template.clone());
        t.questions.extend(rows.iter().cloned());
        for department_id in department_ids {
            t.department_templates.insert((*department_id, template.id));
        }
        Ok(TemplateWithQuestions {
            template,
            questions: rows,
            department_ids: department_ids.to_vec(),
        })
    }

    async fn find_template(&self, id: Uuid) -> AppResult<Option<Template>> {
        let t = self.tables.read().await;
        Ok(t.templates.iter().find(|tpl| tpl.id == id).cloned())
    }

    async fn template_questions(&self, template_id: Uuid) -> AppResult<Vec<Question>> {
        let t = self.tables.read().await;
        Ok(t.questions_of(template_id))
    }

    async fn template_department_ids(&self, template_id: Uuid) -> AppResult<Vec<Uuid>> {
        let t = self.tables.read().await;
        Ok(t
            .department_templates
            .iter()
            .filter(|(_, tpl)| *tpl == template_id)
            .map(|(d, _)| *d)
            .collect())
    }

    async fn list_templates(
        &self,
        department_ids: Option<&[Uuid]>,
        include_archived: bool,
    ) -> AppResult<Vec<Template>> {
        let t = self.tables.read().await;
        Ok(t
            .templates
            .iter()
            .filter(|tpl| include_archived || !tpl.is_archived)
            .filter(|tpl| match department_ids {
                None => true,
                Some(ids) => t
                    .department_templates
                    .iter()
                    .any(|(d, id)| *id == tpl.id && ids.contains(d)),
            })
            .cloned()
            .collect())
    }

    async fn apply_template_changes(&self, id: Uuid, changes: &TemplateChanges) -> AppResult<()> {
        let mut t = self.tables.write().await;
        if !t.templates.iter().any(|tpl| tpl.id == id) {
            return Err(AppError::NotFound("template"));
        }
        if changes
            .delete_question_ids
            .iter()
            .any(|qid| t.answers.iter().any(|a| a.question_id == *qid))
        {
            return Err(AppError::conflict("question already has answers"));
        }
        for draft in &changes.questions {
            if let Some(qid) = draft.id {
                if !t.questions.iter().any(|q| q.id == qid && q.template_id == id) {
                    return Err(AppError::NotFound("question"));
                }
            }
        }

        t.questions
            .retain(|q| !(q.template_id == id && changes.delete_question_ids.contains(&q.id)));
        for (idx, draft) in changes.questions.iter().enumerate() {
            match draft.id {
                Some(qid) => {
                    if let Some(q) = t.questions.iter_mut().find(|q| q.id == qid) {
                        q.text = draft.text.clone();
                        q.description = draft.description.clone();
                        q.position = idx as i32;
                    }
                }
                None => t.questions.push(Question {
                    id: Uuid::new_v4(),
                    template_id: id,
                    text: draft.text.clone(),
                    description: draft.description.clone(),
                    position: idx as i32,
                }),
            }
        }
        if let Some(department_ids) = &changes.department_ids {
            t.department_templates.retain(|(_, tpl)| *tpl != id);
            for department_id in department_ids {
                t.department_templates.insert((*department_id, id));
            }
        }
        if let Some(tpl) = t.templates.iter_mut().find(|tpl| tpl.id == id) {
            tpl.name = changes.name.clone();
            tpl.is_archived = changes.is_archived;
            tpl.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn answered_question_ids(&self, question_ids: &[Uuid]) -> AppResult<HashSet<Uuid>> {
        let t = self.tables.read().await;
        Ok(t
            .answers
            .iter()
            .filter(|a| question_ids.contains(&a.question_id))
            .map(|a| a.question_id)
            .collect())
    }

    async fn insert_reviews(&self, reviews: &[NewReview]) -> AppResult<Vec<Review>> {
        let mut t = self.tables.write().await;
        let mut batch_keys = HashSet::new();
        for new in reviews {
            if new.evaluated_user_id == new.reviewer_id {
                return Err(AppError::invalid("evaluated user can't be reviewer"));
            }
            let key = (
                new.evaluated_user_id,
                new.reviewer_id,
                new.template_id,
                new.quarter_id,
            );
            let exists = t.reviews.iter().any(|r| {
                (r.evaluated_user_id, r.reviewer_id, r.template_id, r.quarter_id) == key
            });
            if exists || !batch_keys.insert(key) {
                return Err(AppError::conflict("review already assigned"));
            }
        }

        let now = Utc::now();
        let rows: Vec<Review> = reviews
            .iter()
            .map(|new| Review {
                id: Uuid::new_v4(),
                evaluated_user_id: new.evaluated_user_id,
                reviewer_id: new.reviewer_id,
                template_id: new.template_id,
                initiated_by_id: new.initiated_by_id,
                quarter_id: new.quarter_id,
                status: ReviewStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .collect();
        t.reviews.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn find_review_for_reviewer(
        &self,
        review_id: Uuid,
        reviewer_id: Uuid,
    ) -> AppResult<Option<Review>> {
        let t = self.tables.read().await;
        Ok(t
            .reviews
            .iter()
            .find(|r| r.id == review_id && r.reviewer_id == reviewer_id)
            .cloned())
    }

    async fn reviews_by_reviewer(
        &self,
        reviewer_id: Uuid,
        statuses: &[ReviewStatus],
    ) -> AppResult<Vec<Review>> {
        let t = self.tables.read().await;
        let mut reviews: Vec<Review> = t
            .reviews
            .iter()
            .filter(|r| r.reviewer_id == reviewer_id)
            .filter(|r| statuses.is_empty() || statuses.contains(&r.status))
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }

    async fn reviews_of_user(
        &self,
        evaluated_user_id: Uuid,
        quarter_id: Uuid,
    ) -> AppResult<Vec<Review>> {
        let t = self.tables.read().await;
        Ok(t
            .reviews
            .iter()
            .filter(|r| r.evaluated_user_id == evaluated_user_id && r.quarter_id == quarter_id)
            .cloned()
            .collect())
    }

    async fn review_counts(
        &self,
        evaluated_user_id: Uuid,
        quarter_id: Uuid,
    ) -> AppResult<(i64, i64)> {
        let t = self.tables.read().await;
        let (mut completed, mut total) = (0, 0);
        for r in t
            .reviews
            .iter()
            .filter(|r| r.evaluated_user_id == evaluated_user_id && r.quarter_id == quarter_id)
        {
            total += 1;
            if r.status == ReviewStatus::Completed {
                completed += 1;
            }
        }
        Ok((completed, total))
    }

    async fn set_review_status(
        &self,
        review_id: Uuid,
        expected: ReviewStatus,
        status: ReviewStatus,
    ) -> AppResult<Review> {
        let mut t = self.tables.write().await;
        let review = t.review_mut(review_id)?;
        if review.status != expected {
            return Err(AppError::conflict(STALE_REVIEW));
        }
        review.status = status;
        review.updated_at = Utc::now();
        Ok(review.clone())
    }

    async fn answers_for_review(&self, review_id: Uuid) -> AppResult<Vec<Answer>> {
        let t = self.tables.read().await;
        Ok(t
            .answers
            .iter()
            .filter(|a| a.review_id == review_id)
            .cloned()
            .collect())
    }

    async fn answers_for_reviews(&self, review_ids: &[Uuid]) -> AppResult<Vec<Answer>> {
        let t = self.tables.read().await;
        Ok(t
            .answers
            .iter()
            .filter(|a| review_ids.contains(&a.review_id))
            .cloned()
            .collect())
    }

    async fn save_answers(
        &self,
        review_id: Uuid,
        reviewer_id: Uuid,
        inputs: &[AnswerInput],
        expected: ReviewStatus,
        status: ReviewStatus,
    ) -> AppResult<Vec<Answer>> {
        let mut t = self.tables.write().await;
        {
            let review = t.review_mut(review_id)?;
            if review.status != expected {
                return Err(AppError::conflict(STALE_REVIEW));
            }
            review.status = status;
            review.updated_at = Utc::now();
        }

        let existing: Vec<Answer> = t
            .answers
            .iter()
            .filter(|a| a.review_id == review_id)
            .cloned()
            .collect();
        let merge = merge_answers(&existing, inputs);
        let updates: HashMap<Uuid, String> = merge.updates.into_iter().collect();

        let mut saved = Vec::with_capacity(inputs.len());
        for answer in t.answers.iter_mut() {
            if let Some(text) = updates.get(&answer.id) {
                answer.text = text.clone();
                saved.push(answer.clone());
            }
        }
        for input in merge.inserts {
            let row = Answer {
                id: Uuid::new_v4(),
                reviewer_id,
                question_id: input.question_id,
                review_id,
                text: input.text,
            };
            t.answers.push(row.clone());
            saved.push(row);
        }
        Ok(saved)
    }
}
