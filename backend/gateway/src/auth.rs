//! Gateway Authentication Module
//!
//! Bearer tokens are looked up in a static table loaded from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};

use vibestudy_core::{UserId, VibeError};
use vibestudy_logging::redact_sensitive_data;

use crate::error::ApiError;

/// Bearer token -> learner.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, UserId>,
}

impl TokenTable {
    pub fn new<I, T, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<String>,
    {
        Self {
            tokens: entries
                .into_iter()
                .map(|(token, user)| (token.into(), UserId::new(user)))
                .collect(),
        }
    }

    pub fn lookup(&self, token: &str) -> Option<&UserId> {
        self.tokens.get(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Extractor for the learner a request acts for. Rejects with `401`.
pub struct RequireAuth(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
    Arc<TokenTable>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|val| val.to_str().ok());

        let Some(token) = header.and_then(|h| h.strip_prefix("Bearer ")) else {
            warn!(path = %parts.uri.path(), "Missing or malformed Authorization header");
            return Err(VibeError::Unauthorized.into());
        };

        let table = Arc::<TokenTable>::from_ref(state);
        match table.lookup(token.trim()) {
            Some(user_id) => {
                debug!(user_id = %user_id, "Authenticated request");
                Ok(RequireAuth(user_id.clone()))
            }
            None => {
                warn!(
                    header = %redact_sensitive_data(header.unwrap_or_default()),
                    "Unknown bearer token"
                );
                Err(VibeError::Unauthorized.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(table: TokenTable, header: Option<&str>) -> Result<UserId, ApiError> {
        let mut builder = Request::builder().uri("/api/progress/1");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        RequireAuth::from_request_parts(&mut parts, &Arc::new(table))
            .await
            .map(|RequireAuth(user)| user)
    }

    #[tokio::test]
    async fn known_token_resolves_user() {
        let table = TokenTable::new([("tok-1", "learner-1")]);
        let user = extract(table, Some("Bearer tok-1")).await.unwrap();
        assert_eq!(user.as_str(), "learner-1");
    }

    #[tokio::test]
    async fn unknown_or_missing_token_is_unauthorized() {
        let table = TokenTable::new([("tok-1", "learner-1")]);
        let err = extract(table.clone(), Some("Bearer nope")).await.unwrap_err();
        assert!(matches!(err.0, VibeError::Unauthorized));

        let err = extract(table.clone(), None).await.unwrap_err();
        assert!(matches!(err.0, VibeError::Unauthorized));

        let err = extract(table, Some("Basic dG9rLTE=")).await.unwrap_err();
        assert!(matches!(err.0, VibeError::Unauthorized));
    }
}
