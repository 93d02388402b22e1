//! Session credentials for remote calls.

use crate::errors::{RaftError, RaftResult};
use reqwest::header::HeaderValue;

/// Supplies the session token sent with every remote call.
pub trait CredentialProvider: Send + Sync {
    fn session_token(&self) -> Option<String>;
}

/// A token fixed at construction time (or none at all).
#[derive(Clone, Default)]
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn from_option(token: Option<String>) -> Self {
        Self { token }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("present", &self.token.is_some())
            .finish()
    }
}

impl CredentialProvider for StaticToken {
    fn session_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Build the `Cookie` header carrying the session token.
///
/// Fails with `NotAuthenticated` when no usable token is available, so the
/// check happens before any request is sent.
pub fn session_cookie(
    provider: &dyn CredentialProvider,
    cookie_name: &str,
) -> RaftResult<HeaderValue> {
    let token = provider
        .session_token()
        .filter(|token| !token.trim().is_empty())
        .ok_or(RaftError::NotAuthenticated)?;
    HeaderValue::from_str(&format!("{}={}", cookie_name, token.trim()))
        .map_err(|_| RaftError::Config("session token is not a valid header value".into()))
}
