use crate::{store::StoreError, token::TokenError, validation::ValidationErrors};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is deactivated")]
    DeactivatedAccount,
    #[error("account has no password")]
    NoPasswordSet,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("invalid client")]
    InvalidClient,
    #[error("invalid grant")]
    InvalidGrant,
    #[error("redirect uri is not registered")]
    RedirectMismatch,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),
    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("already exists")]
    AlreadyExists,
    #[error("system is already provisioned")]
    AlreadyProvisioned,
    #[error("system is not provisioned")]
    NotProvisioned,
    #[error("store did not answer in time")]
    Unavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => Self::AlreadyExists,
            StoreError::Timeout(_) => Self::Unavailable,
            StoreError::Unexpected(err) => Self::Internal(err),
        }
    }
}
