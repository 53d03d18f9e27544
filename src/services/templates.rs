use crate::db::{QuestionDraft, Store, TemplateChanges};
use crate::domain::models::{Template, TemplateWithQuestions};
use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateUpdate {
    pub name: String,
    #[serde(default)]
    pub is_archived: bool,
    pub questions: Vec<QuestionDraft>,
    pub department_ids: Option<Vec<Uuid>>,
}

/// Review templates and their ordered questions.
#[derive(Clone)]
pub struct TemplateCatalog {
    store: Arc<dyn Store>,
}

impl TemplateCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        name: &str,
        questions: &[QuestionDraft],
        department_ids: &[Uuid],
    ) -> AppResult<TemplateWithQuestions> {
        if name.trim().is_empty() {
            return Err(AppError::invalid("template name is required"));
        }
        let created = self
            .store
            .insert_template(name.trim(), questions, department_ids)
            .await?;
        tracing::info!(
            "Template {} created with {} questions",
            created.template.id,
            created.questions.len()
        );
        Ok(created)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<TemplateWithQuestions> {
        let template = self
            .store
            .find_template(id)
            .await?
            .ok_or(AppError::NotFound("template"))?;
        let questions = self.store.template_questions(id).await?;
        let department_ids = self.store.template_department_ids(id).await?;
        Ok(TemplateWithQuestions {
            template,
            questions,
            department_ids,
        })
    }

    pub async fn list(&self, include_archived: bool) -> AppResult<Vec<Template>> {
        self.store.list_templates(None, include_archived).await
    }

    /// Non-archived templates linked to any of the user's departments.
    pub async fn for_user(&self, user_id: Uuid) -> AppResult<Vec<Template>> {
        let departments = self.store.department_ids_for_user(user_id).await?;
        if departments.is_empty() {
            return Ok(Vec::new());
        }
        self.store.list_templates(Some(&departments), false).await
    }

    /// Rewrites the template. Questions missing from `update.questions` are
    /// deleted; that fails if any of them already has answers.
    pub async fn update(&self, id: Uuid, update: TemplateUpdate) -> AppResult<TemplateWithQuestions> {
        if update.name.trim().is_empty() {
            return Err(AppError::invalid("template name is required"));
        }
        let current = self.store.template_questions(id).await?;
        if current.is_empty() && self.store.find_template(id).await?.is_none() {
            return Err(AppError::NotFound("template"));
        }

        let kept: HashSet<Uuid> = update.questions.iter().filter_map(|q| q.id).collect();
        let delete_question_ids: Vec<Uuid> = current
            .iter()
            .map(|q| q.id)
            .filter(|id| !kept.contains(id))
            .collect();

        if !self
            .store
            .answered_question_ids(&delete_question_ids)
            .await?
            .is_empty()
        {
            return Err(AppError::conflict("question already has answers"));
        }

        let changes = TemplateChanges {
            name: update.name.trim().to_string(),
            is_archived: update.is_archived,
            questions: update.questions,
            delete_question_ids,
            department_ids: update.department_ids,
        };
        self.store.apply_template_changes(id, &changes).await?;
        tracing::info!("Template {} updated", id);
        self.get(id).await
    }
}
