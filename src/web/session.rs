use crate::domain::models::{User, UserRole};
use crate::error::AppError;
use crate::state::SharedState;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};

/// Bearer token from `Authorization`. The last space-separated piece is the
/// token, so both `Bearer <t>` and a bare `<t>` work.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_whitespace().last())
        .map(str::to_string)
}

/// The active user owning the request's bearer token.
///
/// ```ignore
/// async fn handler(CurrentUser(user): CurrentUser) -> AppResult<...> { ... }
/// ```
pub struct CurrentUser(pub User);

impl CurrentUser {
    /// Forbidden unless the user holds one of `roles`.
    pub fn require(&self, roles: &[UserRole]) -> Result<(), AppError> {
        if roles.contains(&self.0.role) {
            Ok(())
        } else {
            tracing::warn!(
                "User {} with role {} denied",
                self.0.id,
                self.0.role.as_str()
            );
            Err(AppError::Forbidden)
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require(&[UserRole::Admin])
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    SharedState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared = SharedState::from_ref(state);
        let token =
            extract_token(&parts.headers).ok_or(AppError::Unauthorized("user not authorized"))?;
        let user = shared
            .store
            .find_active_user_by_token(&token)
            .await?
            .ok_or(AppError::Unauthorized("user not authorized"))?;
        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn token_is_the_last_piece_of_the_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));

        headers.insert("authorization", HeaderValue::from_static("abc"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));
    }
}
