use crate::config::Settings;
use crate::crypto::Signer;
use crate::db::tickets::TicketStore;
use crate::db::Store;
use crate::middleware::RateLimiter;
use crate::services::auth::OauthFlow;
use crate::services::oauth::GoogleProvider;
use crate::services::{
    AnswerReconciler, AuthService, IdentityService, QuarterRegistry, ReviewLedger,
    TemplateCatalog,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn Store>,
    pub auth: AuthService,
    pub users: IdentityService,
    pub quarters: QuarterRegistry,
    pub templates: TemplateCatalog,
    pub reviews: ReviewLedger,
    pub answers: AnswerReconciler,
    pub sign_in_limiter: RateLimiter,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wires every service over the given stores. Google sign-in is enabled
    /// only when `settings.oauth` is present.
    pub fn new(
        settings: Settings,
        store: Arc<dyn Store>,
        tickets: Arc<dyn TicketStore>,
    ) -> anyhow::Result<Self> {
        let oauth = match &settings.oauth {
            Some(oauth) => Some(OauthFlow {
                provider: Arc::new(GoogleProvider::new(oauth.clone())),
                signer: Signer::new(oauth.state_key.clone())?,
                redirect_after_sign_in_url: oauth.redirect_after_sign_in_url.clone(),
            }),
            None => None,
        };
        Ok(Self::with_oauth(settings, store, tickets, oauth))
    }

    pub fn with_oauth(
        settings: Settings,
        store: Arc<dyn Store>,
        tickets: Arc<dyn TicketStore>,
        oauth: Option<OauthFlow>,
    ) -> Self {
        let settings = Arc::new(settings);
        Self {
            sign_in_limiter: RateLimiter::new(
                settings.sign_in_max_attempts,
                settings.sign_in_window_secs,
            ),
            auth: AuthService::new(store.clone(), tickets, settings.clone(), oauth),
            users: IdentityService::new(store.clone()),
            quarters: QuarterRegistry::new(store.clone()),
            templates: TemplateCatalog::new(store.clone()),
            reviews: ReviewLedger::new(store.clone()),
            answers: AnswerReconciler::new(store.clone()),
            store,
            settings,
        }
    }
}
