//! Google sign-in.
//!
//! The provider is a trait so the callback flow can be exercised without
//! talking to Google.

use crate::config::OauthSettings;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// What the provider tells us about the person who signed in. Either field
/// may be missing; the caller decides whether that is acceptable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderUser {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Consent page URL carrying `state` back to the callback.
    fn authorize_url(&self, state: &str) -> AppResult<String>;
    async fn exchange_code(&self, code: &str) -> AppResult<ProviderUser>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleProvider {
    http: reqwest::Client,
    settings: OauthSettings,
}

impl GoogleProvider {
    pub fn new(settings: OauthSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize_url(&self, state: &str) -> AppResult<String> {
        let url = Url::parse_with_params(
            AUTH_ENDPOINT,
            &[
                ("response_type", "code"),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.auth_redirect_url.as_str()),
                ("scope", self.settings.scope.as_str()),
                ("prompt", self.settings.prompt.as_str()),
                ("access_type", "online"),
                ("state", state),
            ],
        )
        .map_err(|e| AppError::Internal(format!("authorize url: {e}")))?;
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> AppResult<ProviderUser> {
        let token: TokenResponse = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("redirect_uri", self.settings.auth_redirect_url.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                tracing::warn!("OAuth code exchange failed: {}", e);
                AppError::Upstream("code exchange failed".to_string())
            })?
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("bad token response: {e}")))?;

        self.http
            .get(USERINFO_ENDPOINT)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                tracing::warn!("OAuth userinfo request failed: {}", e);
                AppError::Upstream("userinfo request failed".to_string())
            })?
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("bad userinfo response: {e}")))
    }
}

/// Appends `ticket` to the front-end redirect, respecting an existing query.
pub fn redirect_with_ticket(base: &str, ticket: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}ticket={ticket}")
}
