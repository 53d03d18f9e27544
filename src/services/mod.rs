pub mod answers;
pub mod auth;
pub mod oauth;
pub mod quarters;
pub mod reviews;
pub mod templates;
pub mod users;

pub use answers::AnswerReconciler;
pub use auth::AuthService;
pub use quarters::QuarterRegistry;
pub use reviews::ReviewLedger;
pub use templates::TemplateCatalog;
pub use users::IdentityService;

#[cfg(test)]
pub(crate) mod testing {
    use crate::db::{QuestionDraft, Store};
    use crate::domain::models::{NewUser, Quarter, TemplateWithQuestions, User, UserRole};
    use crate::domain::quarter::Period;
    use chrono::{TimeZone, Utc};

    /// Period from the first of `from` to the first of `to`, 2026.
    pub fn period(from: u32, to: u32) -> Period {
        Period::new(
            Utc.with_ymd_and_hms(2026, from, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, to, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    pub async fn user(store: &dyn Store, name: &str, role: UserRole) -> User {
        store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password_hash: crate::crypto::hash_password("secret-password").unwrap(),
                first_name: Some(name.to_string()),
                last_name: None,
                father_name: None,
                role,
                auth_token: Some(crate::crypto::generate_token()),
            })
            .await
            .unwrap()
    }

    pub async fn template(store: &dyn Store, questions: usize) -> TemplateWithQuestions {
        let drafts: Vec<QuestionDraft> = (0..questions)
            .map(|i| QuestionDraft {
                id: None,
                text: format!("question {i}"),
                description: None,
            })
            .collect();
        store.insert_template("quarterly", &drafts, &[]).await.unwrap()
    }

    pub async fn active_quarter(store: &dyn Store) -> Quarter {
        store.insert_quarter(period(1, 4), true).await.unwrap()
    }
}
