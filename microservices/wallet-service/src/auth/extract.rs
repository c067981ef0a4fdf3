//! Bearer-token extractor

use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts};
use zentra_core::Caller;

use crate::api::AppState;
use crate::error::WalletError;

/// Caller resolved from `Authorization: Bearer <jwt>`.
///
/// The role comes from the stored user, not the token, so a demoted or
/// deleted user loses access before their token expires.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedCaller(pub Caller);

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for AuthenticatedCaller {
    type Rejection = WalletError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| WalletError::Unauthorized("Missing bearer token".to_string()))?;

        let claimed = state.auth.authenticate(token)?;
        let user = state
            .identity
            .get(claimed.account_id)
            .ok_or_else(|| WalletError::Unauthorized("Account no longer exists".to_string()))?;

        Ok(Self(Caller::new(user.id, user.role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
