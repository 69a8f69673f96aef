//! Error model for the portal core.
//! `AuthError` is surfaced to the sign-in form verbatim; `RoleFetchError` and `ApiError`
//! stay inside the resolver and data client and are only logged or shown as a failed fetch.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    InvalidCredentials,
    NetworkError,
    ProviderError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
}

impl AuthError {
    pub fn code_str(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::InvalidCredentials => "invalid_credentials",
            AuthErrorKind::NetworkError => "network_error",
            AuthErrorKind::ProviderError => "provider_error",
        }
    }

    pub fn message(&self) -> &str { self.message.as_str() }

    pub fn invalid_credentials<S: Into<String>>(msg: S) -> Self { AuthError { kind: AuthErrorKind::InvalidCredentials, message: msg.into() } }
    pub fn network<S: Into<String>>(msg: S) -> Self { AuthError { kind: AuthErrorKind::NetworkError, message: msg.into() } }
    pub fn provider<S: Into<String>>(msg: S) -> Self { AuthError { kind: AuthErrorKind::ProviderError, message: msg.into() } }
}

// The sign-in form shows this text as-is.
impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AuthError {}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::provider(format!("unexpected response from identity provider: {err}"))
        } else {
            AuthError::network(format!("could not reach identity provider: {err}"))
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum RoleFetchError {
    #[error("role request failed: {0}")]
    Network(String),
    #[error("role request rejected: HTTP {0}")]
    Unauthorized(u16),
    #[error("role request failed: HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("role response not understood: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{detail} (HTTP {status})")]
    Status { status: u16, detail: String },
    #[error("response not understood: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            ApiError::NotSignedIn | ApiError::Decode(_) => None,
        }
    }
}

impl From<ApiError> for RoleFetchError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status: status @ (401 | 403), .. } => RoleFetchError::Unauthorized(status),
            ApiError::Status { status, detail } => RoleFetchError::Status { status, detail },
            ApiError::NotSignedIn => RoleFetchError::Unauthorized(401),
            ApiError::Network(e) => RoleFetchError::Network(e.to_string()),
            ApiError::Decode(m) => RoleFetchError::Decode(m),
        }
    }
}
