//! Postgres implementation of [`Store`] on sqlx.
//!
//! Constraint violations surface as `sqlx::Error::Database` and are turned
//! into `Conflict`/`InvalidInput` by `AppError::from`; nothing here checks
//! uniqueness before writing.

use super::{QuestionDraft, Store, TemplateChanges, STALE_REVIEW};
use crate::domain::models::{
    Answer, AnswerInput, Department, NewReview, NewUser, Question, Quarter, Review,
    ReviewStatus, Template, TemplateWithQuestions, User, UserUpdate,
};
use crate::domain::quarter::Period;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

const USER_COLUMNS: &str = r#"
    id, username, email, password, first_name, last_name, father_name,
    role, mentored_by_id, auth_token, is_active, created_at
"#;

const REVIEW_COLUMNS: &str = r#"
    id, evaluated_user_id, reviewer_id, template_id, initiated_by_id,
    quarter_id, status, created_at, updated_at
"#;

const QUESTION_COLUMNS: &str = "id, template_id, text, description, position";
const ANSWER_COLUMNS: &str = "id, reviewer_id, question_id, review_id, text";
const QUARTER_COLUMNS: &str = "id, started_at, finished_at, is_active";
const TEMPLATE_COLUMNS: &str = "id, name, is_archived, created_at, updated_at";

fn status_names(statuses: &[ReviewStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_active_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND is_active = true"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_active_user_by_token(&self, token: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE auth_token = $1 AND is_active = true"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_active_users_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1) AND is_active = true"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users
                (id, username, email, password, first_name, last_name, father_name, role, auth_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.father_name)
        .bind(user.role)
        .bind(&user.auth_token)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_user_token(&self, user_id: Uuid, token: Option<&str>) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET auth_token = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("user"));
        }
        Ok(())
    }

    async fn update_user(&self, user_id: Uuid, update: &UserUpdate) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET role = COALESCE($2, role),
                is_active = COALESCE($3, is_active),
                auth_token = CASE WHEN $3 IS FALSE THEN NULL ELSE auth_token END,
                mentored_by_id = CASE WHEN $4 THEN $5 ELSE mentored_by_id END,
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(update.role)
        .bind(update.is_active)
        .bind(update.mentored_by_id.is_some())
        .bind(update.mentored_by_id.flatten())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn users_by_mentor(&self, mentor_id: Uuid) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE mentored_by_id = $1 ORDER BY created_at"
        ))
        .bind(mentor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn create_department(&self, name: &str) -> AppResult<Department> {
        let row = sqlx::query_as::<_, Department>(
            "INSERT INTO departments (id, name) VALUES ($1, $2) RETURNING id, name",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_departments(&self) -> AppResult<Vec<Department>> {
        let rows = sqlx::query_as::<_, Department>("SELECT id, name FROM departments ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn add_user_to_department(&self, user_id: Uuid, department_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO department_users (department_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(department_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn department_ids_for_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT department_id FROM department_users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn insert_quarter(&self, period: Period, is_active: bool) -> AppResult<Quarter> {
        let row = sqlx::query_as::<_, Quarter>(&format!(
            r#"
            INSERT INTO quarters (id, started_at, finished_at, is_active)
            VALUES ($1, $2, $3, $4)
            RETURNING {QUARTER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(period.started_at())
        .bind(period.finished_at())
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_quarter(
        &self,
        id: Uuid,
        period: Period,
        is_active: bool,
    ) -> AppResult<Option<Quarter>> {
        let row = sqlx::query_as::<_, Quarter>(&format!(
            r#"
            UPDATE quarters
            SET started_at = $2, finished_at = $3, is_active = $4
            WHERE id = $1
            RETURNING {QUARTER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(period.started_at())
        .bind(period.finished_at())
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_quarter(&self, id: Uuid) -> AppResult<Option<Quarter>> {
        let row = sqlx::query_as::<_, Quarter>(&format!(
            "SELECT {QUARTER_COLUMNS} FROM quarters WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn active_quarter(&self) -> AppResult<Option<Quarter>> {
        let row = sqlx::query_as::<_, Quarter>(&format!(
            "SELECT {QUARTER_COLUMNS} FROM quarters WHERE is_active = true"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_quarters(&self) -> AppResult<Vec<Quarter>> {
        let rows = sqlx::query_as::<_, Quarter>(&format!(
            "SELECT {QUARTER_COLUMNS} FROM quarters ORDER BY started_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_template(
        &self,
        name: &str,
        questions: &[QuestionDraft],
        department_ids: &[Uuid],
    ) -> AppResult<TemplateWithQuestions> {
        let mut tx = self.pool.begin().await?;

        let template = sqlx::query_as::<_, Template>(&format!(
            "INSERT INTO templates (id, name) VALUES ($1, $2) RETURNING {TEMPLATE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        let mut rows = Vec::with_capacity(questions.len());
        for (idx, draft) in questions.iter().enumerate() {
            let question = sqlx::query_as::<_, Question>(&format!(
                r#"
                INSERT INTO questions (id, template_id, text, description, position)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING {QUESTION_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(template.id)
            .bind(&draft.text)
            .bind(&draft.description)
            .bind(idx as i32)
            .fetch_one(&mut *tx)
            .await?;
            rows.push(question);
        }

        for department_id in department_ids {
            sqlx::query(
                "INSERT INTO department_templates (department_id, template_id) VALUES ($1, $2)",
            )
            .bind(department_id)
            .bind(template.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(TemplateWithQuestions {
            template,
            questions: rows,
            department_ids: department_ids.to_vec(),
        })
    }

    async fn find_template(&self, id: Uuid) -> AppResult<Option<Template>> {
        let row = sqlx::query_as::<_, Template>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn template_questions(&self, template_id: Uuid) -> AppResult<Vec<Question>> {
        let rows = sqlx::query_as::<_, Question>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE template_id = $1 ORDER BY position, id"
        ))
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn template_department_ids(&self, template_id: Uuid) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT department_id FROM department_templates WHERE template_id = $1",
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn list_templates(
        &self,
        department_ids: Option<&[Uuid]>,
        include_archived: bool,
    ) -> AppResult<Vec<Template>> {
        let rows = match department_ids {
            None => {
                sqlx::query_as::<_, Template>(&format!(
                    r#"
                    SELECT {TEMPLATE_COLUMNS} FROM templates
                    WHERE ($1 OR is_archived = false)
                    ORDER BY created_at
                    "#
                ))
                .bind(include_archived)
                .fetch_all(&self.pool)
                .await?
            }
            Some(ids) => {
                sqlx::query_as::<_, Template>(&format!(
                    r#"
                    SELECT {TEMPLATE_COLUMNS} FROM templates t
                    WHERE ($1 OR t.is_archived = false)
                      AND EXISTS (
                        SELECT 1 FROM department_templates dt
                        WHERE dt.template_id = t.id AND dt.department_id = ANY($2)
                      )
                    ORDER BY created_at
                    "#
                ))
                .bind(include_archived)
                .bind(ids)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn apply_template_changes(&self, id: Uuid, changes: &TemplateChanges) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE templates
            SET name = $2, is_archived = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&changes.name)
        .bind(changes.is_archived)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound("template"));
        }

        if !changes.delete_question_ids.is_empty() {
            let answered: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM answers WHERE question_id = ANY($1))",
            )
            .bind(&changes.delete_question_ids[..])
            .fetch_one(&mut *tx)
            .await?;
            if answered {
                return Err(AppError::conflict("question already has answers"));
            }
            sqlx::query("DELETE FROM questions WHERE template_id = $1 AND id = ANY($2)")
                .bind(id)
                .bind(&changes.delete_question_ids[..])
                .execute(&mut *tx)
                .await?;
        }

        for (idx, draft) in changes.questions.iter().enumerate() {
            match draft.id {
                Some(question_id) => {
                    let result = sqlx::query(
                        r#"
                        UPDATE questions
                        SET text = $3, description = $4, position = $5
                        WHERE id = $1 AND template_id = $2
                        "#,
                    )
                    .bind(question_id)
                    .bind(id)
                    .bind(&draft.text)
                    .bind(&draft.description)
                    .bind(idx as i32)
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(AppError::NotFound("question"));
                    }
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO questions (id, template_id, text, description, position)
                        VALUES ($1, $2, $3, $4, $5)
                        "#,
                    )
                    .bind(Uuid::new_v4())
                    .bind(id)
                    .bind(&draft.text)
                    .bind(&draft.description)
                    .bind(idx as i32)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        if let Some(department_ids) = &changes.department_ids {
            sqlx::query("DELETE FROM department_templates WHERE template_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            for department_id in department_ids {
                sqlx::query(
                    "INSERT INTO department_templates (department_id, template_id) VALUES ($1, $2)",
                )
                .bind(department_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn answered_question_ids(&self, question_ids: &[Uuid]) -> AppResult<HashSet<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT question_id FROM answers WHERE question_id = ANY($1)",
        )
        .bind(question_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn insert_reviews(&self, reviews: &[NewReview]) -> AppResult<Vec<Review>> {
        let mut tx = self.pool.begin().await?;
        let mut rows = Vec::with_capacity(reviews.len());
        for new in reviews {
            let review = sqlx::query_as::<_, Review>(&format!(
                r#"
                INSERT INTO reviews
                    (id, evaluated_user_id, reviewer_id, template_id, initiated_by_id, quarter_id, status)
                VALUES ($1, $2, $3, $4, $5, $6, 'PENDING')
                RETURNING {REVIEW_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(new.evaluated_user_id)
            .bind(new.reviewer_id)
            .bind(new.template_id)
            .bind(new.initiated_by_id)
            .bind(new.quarter_id)
            .fetch_one(&mut *tx)
            .await?;
            rows.push(review);
        }
        tx.commit().await?;
        Ok(rows)
    }

    async fn find_review_for_reviewer(
        &self,
        review_id: Uuid,
        reviewer_id: Uuid,
    ) -> AppResult<Option<Review>> {
        let row = sqlx::query_as::<_, Review>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1 AND reviewer_id = $2"
        ))
        .bind(review_id)
        .bind(reviewer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn reviews_by_reviewer(
        &self,
        reviewer_id: Uuid,
        statuses: &[ReviewStatus],
    ) -> AppResult<Vec<Review>> {
        let rows = sqlx::query_as::<_, Review>(&format!(
            r#"
            SELECT {REVIEW_COLUMNS} FROM reviews
            WHERE reviewer_id = $1
              AND (cardinality($2::text[]) = 0 OR status::text = ANY($2))
            ORDER BY created_at DESC
            "#
        ))
        .bind(reviewer_id)
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn reviews_of_user(
        &self,
        evaluated_user_id: Uuid,
        quarter_id: Uuid,
    ) -> AppResult<Vec<Review>> {
        let rows = sqlx::query_as::<_, Review>(&format!(
            r#"
            SELECT {REVIEW_COLUMNS} FROM reviews
            WHERE evaluated_user_id = $1 AND quarter_id = $2
            ORDER BY created_at
            "#
        ))
        .bind(evaluated_user_id)
        .bind(quarter_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn review_counts(
        &self,
        evaluated_user_id: Uuid,
        quarter_id: Uuid,
    ) -> AppResult<(i64, i64)> {
        let counts = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'COMPLETED') AS completed,
                COUNT(*) AS total
            FROM reviews
            WHERE evaluated_user_id = $1 AND quarter_id = $2
            "#,
        )
        .bind(evaluated_user_id)
        .bind(quarter_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn set_review_status(
        &self,
        review_id: Uuid,
        expected: ReviewStatus,
        status: ReviewStatus,
    ) -> AppResult<Review> {
        let row = sqlx::query_as::<_, Review>(&format!(
            r#"
            UPDATE reviews
            SET status = $3, updated_at = now()
            WHERE id = $1 AND status = $2
            RETURNING {REVIEW_COLUMNS}
            "#
        ))
        .bind(review_id)
        .bind(expected)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| AppError::conflict(STALE_REVIEW))
    }

    async fn answers_for_review(&self, review_id: Uuid) -> AppResult<Vec<Answer>> {
        let rows = sqlx::query_as::<_, Answer>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM answers WHERE review_id = $1"
        ))
        .bind(review_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn answers_for_reviews(&self, review_ids: &[Uuid]) -> AppResult<Vec<Answer>> {
        let rows = sqlx::query_as::<_, Answer>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM answers WHERE review_id = ANY($1)"
        ))
        .bind(review_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn save_answers(
        &self,
        review_id: Uuid,
        reviewer_id: Uuid,
        inputs: &[AnswerInput],
        expected: ReviewStatus,
        status: ReviewStatus,
    ) -> AppResult<Vec<Answer>> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the review serialises concurrent submissions.
        let moved = sqlx::query(
            r#"
            UPDATE reviews
            SET status = $3, updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(review_id)
        .bind(expected)
        .bind(status)
        .execute(&mut *tx)
        .await?;
        if moved.rows_affected() == 0 {
            return Err(AppError::conflict(STALE_REVIEW));
        }

        let mut saved = Vec::with_capacity(inputs.len());
        for input in inputs {
            let answer = sqlx::query_as::<_, Answer>(&format!(
                r#"
                INSERT INTO answers (id, reviewer_id, question_id, review_id, text)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (review_id, question_id) DO UPDATE SET text = EXCLUDED.text
                RETURNING {ANSWER_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(reviewer_id)
            .bind(input.question_id)
            .bind(review_id)
            .bind(&input.text)
            .fetch_one(&mut *tx)
            .await?;
            saved.push(answer);
        }

        tx.commit().await?;
        Ok(saved)
    }
}
