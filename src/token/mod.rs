//! Compact signed access tokens (`header.payload.signature`, base64url).
//!
//! Every token carries the reference of the key that verifies it, so a single
//! [`TokenCodec`] serves tokens issued for any number of apps, each with its own
//! algorithm and key.

mod algorithm;
mod claims;
mod codec;

pub use self::algorithm::{KeyMaterial, SigningAlgorithm};
pub use self::claims::{Identity, TokenClaims, TokenHeader};
pub use self::codec::{IssuedToken, SigningProfile, TokenCodec};

use crate::secret::ResolverError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    MalformedToken,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("failed to parse key material")]
    KeyParse,
    #[error("untrusted key reference")]
    UntrustedKeyReference,
    #[error("token was not issued for this audience")]
    InvalidAudience,
    #[error("token lifetime must be at least one second")]
    InvalidLifetime,
    #[error("failed to encode token: {0}")]
    Encoding(String),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
}
