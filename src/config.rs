use base64::{engine::general_purpose, Engine as _};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} has an invalid value")]
    Invalid(&'static str),
    #[error("OAUTH_STATE_KEY must be base64")]
    StateKey,
}

/// Google sign-in settings. Present only when the client id, secret and
/// both redirect URLs are configured.
#[derive(Debug, Clone)]
pub struct OauthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub auth_redirect_url: String,
    pub redirect_after_sign_in_url: String,
    pub scope: String,
    pub prompt: String,
    pub state_key: Vec<u8>,
}

/// Process-wide settings, read once at startup and handed to every
/// component that needs them.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub redis_url: Option<String>,
    pub bind_addr: String,
    pub invitation_ttl: Duration,
    pub oauth_ticket_ttl: Duration,
    pub sign_in_max_attempts: usize,
    pub sign_in_window_secs: u64,
    /// Key the sign-in limiter on `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_proxy: bool,
    /// Adds `Secure` to cookies set by the API.
    pub secure_cookies: bool,
    pub oauth: Option<OauthSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            redis_url: None,
            bind_addr: "0.0.0.0:3000".to_string(),
            invitation_ttl: Duration::from_secs(3600),
            oauth_ticket_ttl: Duration::from_secs(15),
            sign_in_max_attempts: 5,
            sign_in_window_secs: 60,
            trust_proxy: false,
            secure_cookies: false,
            oauth: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = non_empty("BIND_ADDR").unwrap_or_else(|| {
            let port = non_empty("PORT").unwrap_or_else(|| "3000".to_string());
            format!("0.0.0.0:{}", port)
        });

        let oauth = match (
            non_empty("OAUTH_CLIENT_ID"),
            non_empty("OAUTH_CLIENT_SECRET_KEY"),
            non_empty("OAUTH_AUTH_REDIRECT_URL"),
            non_empty("OAUTH_REDIRECT_AFTER_SIGN_IN_URL"),
        ) {
            (Some(client_id), Some(client_secret), Some(auth_redirect_url), Some(after)) => {
                let state_key = match non_empty("OAUTH_STATE_KEY") {
                    Some(raw) => general_purpose::STANDARD
                        .decode(raw.trim())
                        .map_err(|_| ConfigError::StateKey)?,
                    None => {
                        tracing::warn!("OAUTH_STATE_KEY not set, using a per-process random key");
                        crate::crypto::generate_token().into_bytes()
                    }
                };
                Some(OauthSettings {
                    client_id,
                    client_secret,
                    auth_redirect_url,
                    redirect_after_sign_in_url: after,
                    scope: non_empty("OAUTH_SCOPE")
                        .unwrap_or_else(|| "openid email profile".to_string()),
                    prompt: non_empty("GOOGLE_OAUTH_PROMPT")
                        .unwrap_or_else(|| "select_account".to_string()),
                    state_key,
                })
            }
            _ => None,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: parse_or(&non_empty, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            redis_url: non_empty("REDIS_URL"),
            bind_addr,
            invitation_ttl: Duration::from_secs(parse_or(
                &non_empty,
                "INVITATION_TTL_SECS",
                defaults.invitation_ttl.as_secs(),
            )?),
            oauth_ticket_ttl: Duration::from_secs(parse_or(
                &non_empty,
                "OAUTH_TICKET_TTL_SECS",
                defaults.oauth_ticket_ttl.as_secs(),
            )?),
            sign_in_max_attempts: parse_or(
                &non_empty,
                "SIGN_IN_MAX_ATTEMPTS",
                defaults.sign_in_max_attempts,
            )?,
            sign_in_window_secs: parse_or(
                &non_empty,
                "SIGN_IN_WINDOW_SECS",
                defaults.sign_in_window_secs,
            )?,
            trust_proxy: parse_or(&non_empty, "TRUST_PROXY", defaults.trust_proxy)?,
            secure_cookies: parse_or(&non_empty, "SECURE_COOKIES", defaults.secure_cookies)?,
            oauth,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}
