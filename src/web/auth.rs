use crate::domain::models::UserRole;
use crate::error::{AppError, AppResult};
use crate::middleware::rate_limit::{client_ip, sign_in_key};
use crate::services::auth::{SignUp, SignedIn, OAUTH_STATE_TTL_SECS};
use crate::state::SharedState;
use crate::web::session::CurrentUser;
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

const OAUTH_STATE_COOKIE: &str = "oauth_state";

#[derive(Deserialize)]
pub struct InvitationRequest {
    pub role: Option<UserRole>,
}

#[derive(Serialize)]
pub struct InvitationResponse {
    pub ticket: String,
}

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub ticket: String,
    #[serde(flatten)]
    pub data: SignUp,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Deserialize)]
pub struct TicketRequest {
    pub ticket: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/invitation", post(create_invitation))
        .route("/sign-up", post(sign_up))
        .route("/sign-in", post(sign_in))
        .route("/sign-out", post(sign_out))
        .route("/sign-in-via-google", get(sign_in_via_google))
        .route("/auth-via-google", get(auth_via_google))
        .route("/token-by-ticket", post(token_by_ticket))
        .with_state(state)
}

async fn create_invitation(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(payload): Json<InvitationRequest>,
) -> AppResult<(StatusCode, Json<InvitationResponse>)> {
    current.require_admin()?;
    let role = payload.role.unwrap_or(UserRole::Employer);
    let ticket = state.auth.create_invitation(role).await?;
    Ok((StatusCode::CREATED, Json(InvitationResponse { ticket })))
}

async fn sign_up(
    State(state): State<SharedState>,
    Json(payload): Json<SignUpRequest>,
) -> AppResult<(StatusCode, Json<SignedIn>)> {
    let signed = state.auth.sign_up(&payload.ticket, payload.data).await?;
    Ok((StatusCode::CREATED, Json(signed)))
}

async fn sign_in(
    State(state): State<SharedState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<SignInRequest>,
) -> AppResult<Json<SignedIn>> {
    let ip = client_ip(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.settings.trust_proxy,
    );
    let key = sign_in_key(&ip, &payload.email);
    if !state.sign_in_limiter.check(&key).await {
        tracing::warn!("Sign-in rate limit exceeded for {}", key);
        return Err(AppError::TooManyRequests);
    }

    let signed = state.auth.sign_in(&payload.email, &payload.password).await?;
    state.sign_in_limiter.reset(&key).await;
    Ok(Json(signed))
}

async fn sign_out(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<StatusCode> {
    state.auth.sign_out(user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sign_in_via_google(
    State(state): State<SharedState>,
) -> AppResult<(HeaderMap, Redirect)> {
    let start = state.auth.authorize_url().await?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        state_cookie(&start.nonce, OAUTH_STATE_TTL_SECS, state.settings.secure_cookies)?,
    );
    Ok((headers, Redirect::temporary(&start.url)))
}

async fn auth_via_google(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> AppResult<(HeaderMap, Redirect)> {
    let nonce = cookie_value(&headers, OAUTH_STATE_COOKIE);
    let url = state
        .auth
        .oauth_callback(&query.code, &query.state, nonce.as_deref())
        .await?;
    let mut out = HeaderMap::new();
    out.insert(
        header::SET_COOKIE,
        state_cookie("", 0, state.settings.secure_cookies)?,
    );
    Ok((out, Redirect::temporary(&url)))
}

/// `oauth_state` cookie, scoped to the auth routes. Lax so it survives the
/// top-level redirect back from Google.
fn state_cookie(nonce: &str, max_age: u64, secure: bool) -> AppResult<HeaderValue> {
    let secure_flag = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{OAUTH_STATE_COOKIE}={nonce}; HttpOnly; SameSite=Lax; Path=/auth; Max-Age={max_age}{secure_flag}"
    ))
    .map_err(|e| AppError::Internal(format!("state cookie: {e}")))
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

async fn token_by_ticket(
    State(state): State<SharedState>,
    Json(payload): Json<TicketRequest>,
) -> AppResult<Json<SignedIn>> {
    Ok(Json(state.auth.token_by_ticket(&payload.ticket).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cookie_is_http_only_and_lax() {
        let cookie = state_cookie("abc", 600, false).unwrap();
        assert_eq!(
            cookie.to_str().unwrap(),
            "oauth_state=abc; HttpOnly; SameSite=Lax; Path=/auth; Max-Age=600"
        );
        let secure = state_cookie("", 0, true).unwrap();
        assert!(secure.to_str().unwrap().ends_with("Max-Age=0; Secure"));
    }

    #[test]
    fn cookie_value_finds_the_named_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; oauth_state=n0nce; other=1"),
        );
        assert_eq!(cookie_value(&headers, OAUTH_STATE_COOKIE).as_deref(), Some("n0nce"));
        assert!(cookie_value(&headers, "missing").is_none());
        assert!(cookie_value(&HeaderMap::new(), OAUTH_STATE_COOKIE).is_none());
    }
}
