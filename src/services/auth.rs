use crate::config::Settings;
use crate::crypto::{self, Signer};
use crate::db::tickets::{
    InvitationTicket, OauthPending, OauthTicket, TicketStore, Tickets, INVITATION_PREFIX,
    OAUTH_PREFIX, OAUTH_STATE_PREFIX,
};
use crate::db::Store;
use crate::domain::models::{NewUser, User, UserRole};
use crate::error::{AppError, AppResult};
use crate::services::oauth::{redirect_with_ticket, IdentityProvider};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lifetime of a pending Google sign-in, shared by the stored nonce, the
/// signed `state` and the browser cookie.
pub const OAUTH_STATE_TTL_SECS: u64 = 600;

#[derive(Debug, Clone, Deserialize)]
pub struct SignUp {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub father_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedIn {
    pub token: String,
    pub user: User,
}

/// Start of a Google sign-in: where to send the browser, and the nonce the
/// browser must present again on the callback.
#[derive(Debug, Clone)]
pub struct OauthStart {
    pub url: String,
    pub nonce: String,
}

/// Google sign-in wiring. Absent when the OAuth keys aren't configured.
#[derive(Clone)]
pub struct OauthFlow {
    pub provider: Arc<dyn IdentityProvider>,
    pub signer: Signer,
    pub redirect_after_sign_in_url: String,
}

/// Invitations, password sign-in and the Google hand-off. Every path ends
/// with the user holding an opaque bearer token.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    invitations: Tickets<InvitationTicket>,
    oauth_tickets: Tickets<OauthTicket>,
    oauth_states: Tickets<OauthPending>,
    settings: Arc<Settings>,
    oauth: Option<OauthFlow>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn Store>,
        tickets: Arc<dyn TicketStore>,
        settings: Arc<Settings>,
        oauth: Option<OauthFlow>,
    ) -> Self {
        Self {
            store,
            invitations: Tickets::new(tickets.clone(), INVITATION_PREFIX),
            oauth_tickets: Tickets::new(tickets.clone(), OAUTH_PREFIX),
            oauth_states: Tickets::new(tickets, OAUTH_STATE_PREFIX),
            settings,
            oauth,
        }
    }

    pub async fn create_invitation(&self, role: UserRole) -> AppResult<String> {
        let ttl = self.settings.invitation_ttl;
        let ticket = self
            .invitations
            .issue(&InvitationTicket::new(role, ttl), ttl)
            .await?;
        tracing::info!("Invitation issued for role {}", role.as_str());
        Ok(ticket)
    }

    /// Redeems an invitation. The ticket is taken atomically, so concurrent
    /// sign-ups can't share it. A sign-up that fails afterwards hands the
    /// ticket back with its original expiry so the link can be retried.
    pub async fn sign_up(&self, ticket: &str, data: SignUp) -> AppResult<SignedIn> {
        let invitation = self
            .invitations
            .take(ticket)
            .await?
            .ok_or(AppError::NotFound("ticket"))?;

        match self.register(invitation.role, data).await {
            Ok(signed) => {
                tracing::info!(
                    "User {} signed up as {}",
                    signed.user.id,
                    signed.user.role.as_str()
                );
                Ok(signed)
            }
            Err(err) => {
                self.restore_invitation(ticket, &invitation).await;
                Err(err)
            }
        }
    }

    async fn register(&self, role: UserRole, data: SignUp) -> AppResult<SignedIn> {
        let email = data.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::invalid("valid email is required"));
        }
        if data.password.is_empty() {
            return Err(AppError::invalid("password is required"));
        }
        if data.username.trim().is_empty() {
            return Err(AppError::invalid("username is required"));
        }

        let password_hash = crypto::hash_password(&data.password)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let token = crypto::generate_token();
        let user = self
            .store
            .create_user(NewUser {
                username: data.username.trim().to_string(),
                email,
                password_hash,
                first_name: data.first_name,
                last_name: data.last_name,
                father_name: data.father_name,
                role,
                auth_token: Some(token.clone()),
            })
            .await?;
        Ok(SignedIn { token, user })
    }

    async fn restore_invitation(&self, ticket: &str, invitation: &InvitationTicket) {
        let Some(ttl) = invitation.remaining() else {
            return;
        };
        if let Err(e) = self.invitations.put(ticket, invitation, ttl).await {
            tracing::warn!("Failed to restore invitation ticket: {}", e);
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<SignedIn> {
        let user = self
            .store
            .find_active_user_by_email(&email.trim().to_lowercase())
            .await?
            .ok_or(AppError::NotFound("user"))?;
        if !crypto::verify_password(password, &user.password) {
            tracing::warn!("Wrong password for user {}", user.id);
            return Err(AppError::InvalidCredentials);
        }
        let token = self.ensure_token(&user).await?;
        Ok(SignedIn { token, user })
    }

    pub async fn sign_out(&self, user_id: Uuid) -> AppResult<()> {
        self.store.set_user_token(user_id, None).await?;
        tracing::info!("User {} signed out", user_id);
        Ok(())
    }

    /// Returns the user's current token, minting one if they have none.
    async fn ensure_token(&self, user: &User) -> AppResult<String> {
        if let Some(token) = &user.auth_token {
            return Ok(token.clone());
        }
        let token = crypto::generate_token();
        self.store.set_user_token(user.id, Some(&token)).await?;
        Ok(token)
    }

    fn oauth(&self) -> AppResult<&OauthFlow> {
        self.oauth.as_ref().ok_or(AppError::NotFound("oauth provider"))
    }

    /// Starts a Google sign-in. The nonce is stored until the callback and
    /// must come back both inside the signed `state` and from the browser.
    pub async fn authorize_url(&self) -> AppResult<OauthStart> {
        let flow = self.oauth()?;
        let nonce = self
            .oauth_states
            .issue(
                &OauthPending {
                    started_at: Utc::now(),
                },
                Duration::from_secs(OAUTH_STATE_TTL_SECS),
            )
            .await?;
        let state = flow
            .signer
            .sign(&nonce, chrono::Duration::seconds(OAUTH_STATE_TTL_SECS as i64))
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let url = flow.provider.authorize_url(&state)?;
        Ok(OauthStart { url, nonce })
    }

    /// Finishes Google sign-in and returns where the browser goes next: the
    /// front-end URL with a short-lived ticket for [`Self::token_by_ticket`].
    /// `browser_nonce` is the nonce the calling browser was given by
    /// [`Self::authorize_url`]; each state is accepted once.
    pub async fn oauth_callback(
        &self,
        code: &str,
        state: &str,
        browser_nonce: Option<&str>,
    ) -> AppResult<String> {
        let flow = self.oauth()?;
        let nonce = flow.signer.verify(state).map_err(|e| {
            tracing::warn!("Rejected OAuth state: {}", e);
            AppError::Unauthorized("invalid oauth state")
        })?;
        if browser_nonce != Some(nonce.as_str()) {
            tracing::warn!("OAuth state does not belong to this browser");
            return Err(AppError::Unauthorized("invalid oauth state"));
        }
        self.oauth_states
            .take(&nonce)
            .await?
            .ok_or(AppError::Unauthorized("oauth state already used"))?;

        let info = flow.provider.exchange_code(code).await?;
        let email = info
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AppError::invalid("email is required"))?;
        let name = info
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| AppError::invalid("name is required"))?;

        let user = match self.store.find_active_user_by_email(&email).await? {
            Some(user) => user,
            None => self.create_oauth_user(&email, &name).await?,
        };

        let ticket = self
            .oauth_tickets
            .issue(&OauthTicket { user_id: user.id }, self.settings.oauth_ticket_ttl)
            .await?;
        Ok(redirect_with_ticket(&flow.redirect_after_sign_in_url, &ticket))
    }

    async fn create_oauth_user(&self, email: &str, name: &str) -> AppResult<User> {
        let mut parts = name.split_whitespace();
        let first_name = parts.next().map(str::to_string);
        let rest: Vec<&str> = parts.collect();
        let last_name = (!rest.is_empty()).then(|| rest.join(" "));

        // Google users never sign in with a password.
        let password_hash = crypto::hash_password(&crypto::generate_token())
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let user = self
            .store
            .create_user(NewUser {
                username: email.to_string(),
                email: email.to_string(),
                password_hash,
                first_name,
                last_name,
                father_name: None,
                role: UserRole::Employer,
                auth_token: None,
            })
            .await?;
        tracing::info!("User {} created from Google sign-in", user.id);
        Ok(user)
    }

    /// Trades a one-time OAuth ticket for the user's bearer token.
    pub async fn token_by_ticket(&self, ticket: &str) -> AppResult<SignedIn> {
        let ticket = self
            .oauth_tickets
            .take(ticket)
            .await?
            .ok_or(AppError::Unauthorized("oauth ticket not found"))?;
        let user = self
            .store
            .find_user_by_id(ticket.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AppError::Unauthorized("user not authorized"))?;
        let token = self.ensure_token(&user).await?;
        Ok(SignedIn { token, user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tickets::MemoryTicketStore;
    use crate::db::MemoryStore;
    use crate::services::oauth::ProviderUser;
    use async_trait::async_trait;

    struct FakeProvider {
        user: ProviderUser,
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn authorize_url(&self, state: &str) -> AppResult<String> {
            Ok(format!("https://idp.test/auth?state={state}"))
        }

        async fn exchange_code(&self, code: &str) -> AppResult<ProviderUser> {
            if code == "bad" {
                return Err(AppError::Upstream("code exchange failed".into()));
            }
            Ok(self.user.clone())
        }
    }

    fn service_with(user: Option<ProviderUser>) -> (AuthService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let oauth = user.map(|user| OauthFlow {
            provider: Arc::new(FakeProvider { user }),
            signer: Signer::new(vec![3; 32]).unwrap(),
            redirect_after_sign_in_url: "http://front.test/after".to_string(),
        });
        let service = AuthService::new(
            store.clone(),
            Arc::new(MemoryTicketStore::new()),
            Arc::new(Settings::default()),
            oauth,
        );
        (service, store)
    }

    fn sign_up_data(email: &str) -> SignUp {
        SignUp {
            username: "ann".into(),
            email: email.into(),
            password: "correct horse".into(),
            first_name: Some("Ann".into()),
            last_name: None,
            father_name: None,
        }
    }

    fn state_of(url: &str) -> String {
        url.split("state=").nth(1).unwrap().to_string()
    }

    #[tokio::test]
    async fn invitation_signs_up_once_with_its_role() {
        let (auth, _) = service_with(None);
        let ticket = auth.create_invitation(UserRole::Lead).await.unwrap();

        let signed = auth.sign_up(&ticket, sign_up_data("ann@example.com")).await.unwrap();
        assert_eq!(signed.user.role, UserRole::Lead);
        assert_eq!(signed.user.auth_token.as_deref(), Some(signed.token.as_str()));

        let err = auth
            .sign_up(&ticket, sign_up_data("other@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("ticket")));
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict_and_keeps_the_ticket() {
        let (auth, _) = service_with(None);
        let first = auth.create_invitation(UserRole::Employer).await.unwrap();
        auth.sign_up(&first, sign_up_data("ann@example.com")).await.unwrap();

        let second = auth.create_invitation(UserRole::Employer).await.unwrap();
        let err = auth
            .sign_up(&second, sign_up_data("ANN@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(auth.sign_up(&second, sign_up_data("bob@example.com")).await.is_ok());
    }

    #[tokio::test]
    async fn sign_in_reuses_token_until_sign_out() {
        let (auth, _) = service_with(None);
        let ticket = auth.create_invitation(UserRole::Employer).await.unwrap();
        let signed_up = auth.sign_up(&ticket, sign_up_data("ann@example.com")).await.unwrap();

        let signed_in = auth.sign_in("ann@example.com", "correct horse").await.unwrap();
        assert_eq!(signed_in.token, signed_up.token);

        auth.sign_out(signed_in.user.id).await.unwrap();
        let again = auth.sign_in("ann@example.com", "correct horse").await.unwrap();
        assert_ne!(again.token, signed_up.token);
    }

    #[tokio::test]
    async fn bad_credentials_are_told_apart() {
        let (auth, _) = service_with(None);
        let ticket = auth.create_invitation(UserRole::Employer).await.unwrap();
        auth.sign_up(&ticket, sign_up_data("ann@example.com")).await.unwrap();

        let err = auth.sign_in("ann@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        let err = auth.sign_in("nobody@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("user")));
    }

    #[tokio::test]
    async fn google_sign_in_creates_user_and_hands_off_a_ticket() {
        let (auth, store) = service_with(Some(ProviderUser {
            email: Some("Gina@Example.com".into()),
            name: Some("Gina Lopez".into()),
        }));
        let start = auth.authorize_url().await.unwrap();
        let redirect = auth
            .oauth_callback("code", &state_of(&start.url), Some(&start.nonce))
            .await
            .unwrap();
        assert!(redirect.starts_with("http://front.test/after?ticket="));

        let ticket = redirect.split("ticket=").nth(1).unwrap();
        let signed = auth.token_by_ticket(ticket).await.unwrap();
        assert_eq!(signed.user.email, "gina@example.com");
        assert_eq!(signed.user.role, UserRole::Employer);
        assert_eq!(signed.user.last_name.as_deref(), Some("Lopez"));

        let by_token = store.find_active_user_by_token(&signed.token).await.unwrap();
        assert_eq!(by_token.map(|u| u.id), Some(signed.user.id));

        let err = auth.token_by_ticket(ticket).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized("oauth ticket not found")));
    }

    #[tokio::test]
    async fn forged_state_is_rejected() {
        let (auth, _) = service_with(Some(ProviderUser {
            email: Some("g@example.com".into()),
            name: Some("G".into()),
        }));
        let err = auth
            .oauth_callback("code", "forged.state", Some("forged"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn provider_without_email_is_invalid() {
        let (auth, _) = service_with(Some(ProviderUser {
            email: None,
            name: Some("No Mail".into()),
        }));
        let start = auth.authorize_url().await.unwrap();
        let err = auth
            .oauth_callback("code", &state_of(&start.url), Some(&start.nonce))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn google_routes_are_absent_without_configuration() {
        let (auth, _) = service_with(None);
        assert!(matches!(auth.authorize_url().await, Err(AppError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sign_ups_share_one_invitation_once() {
        let (auth, store) = service_with(None);
        let ticket = auth.create_invitation(UserRole::Admin).await.unwrap();

        let attempts: Vec<_> = (0..4)
            .map(|i| {
                let auth = auth.clone();
                let ticket = ticket.clone();
                tokio::spawn(async move {
                    auth.sign_up(&ticket, sign_up_data(&format!("user{i}@example.com")))
                        .await
                })
            })
            .collect();

        let mut signed_up = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => signed_up += 1,
                Err(err) => assert!(matches!(err, AppError::NotFound("ticket"))),
            }
        }
        assert_eq!(signed_up, 1);
        let admins = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .filter(|u| u.role == UserRole::Admin)
            .count();
        assert_eq!(admins, 1);
    }

    #[tokio::test]
    async fn rejected_sign_up_hands_the_invitation_back() {
        let (auth, _) = service_with(None);
        let ticket = auth.create_invitation(UserRole::Mentor).await.unwrap();

        let mut bad = sign_up_data("ann@example.com");
        bad.password = String::new();
        let err = auth.sign_up(&ticket, bad).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let signed = auth.sign_up(&ticket, sign_up_data("ann@example.com")).await.unwrap();
        assert_eq!(signed.user.role, UserRole::Mentor);
    }

    #[tokio::test]
    async fn oauth_state_is_accepted_once() {
        let (auth, _) = service_with(Some(ProviderUser {
            email: Some("g@example.com".into()),
            name: Some("G".into()),
        }));
        let start = auth.authorize_url().await.unwrap();
        let state = state_of(&start.url);

        auth.oauth_callback("code-1", &state, Some(&start.nonce))
            .await
            .unwrap();
        let err = auth
            .oauth_callback("code-2", &state, Some(&start.nonce))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized("oauth state already used")));
    }

    #[tokio::test]
    async fn oauth_state_is_bound_to_the_starting_browser() {
        let (auth, _) = service_with(Some(ProviderUser {
            email: Some("g@example.com".into()),
            name: Some("G".into()),
        }));
        let attacker = auth.authorize_url().await.unwrap();
        let victim = auth.authorize_url().await.unwrap();
        let state = state_of(&attacker.url);

        let err = auth.oauth_callback("code", &state, None).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized("invalid oauth state")));
        let err = auth
            .oauth_callback("code", &state, Some(&victim.nonce))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized("invalid oauth state")));

        // A mismatch does not burn the state for its own browser.
        assert!(auth
            .oauth_callback("code", &state, Some(&attacker.nonce))
            .await
            .is_ok());
    }
}
