//! # Tessera (Identity Provider & OAuth2 Authorization Server)
//!
//! `tessera` registers users, authenticates them with email and password, and
//! lets registered client applications obtain signed access tokens for those
//! users through the OAuth2 authorization code grant.
//!
//! ## Signing keys are references
//!
//! Applications never hand their key material to the server. Each application
//! names its keys with a secret reference (`env://NAME`, `literal://value`) that
//! is resolved only when a token is signed or verified. The reference used for
//! verification is embedded in every token; bearer authentication only accepts
//! tokens that name the root application's key.
//!
//! ## Root application
//!
//! The provider is itself an OAuth client. `POST /api/v1/config/configure`
//! creates the root user and the root application exactly once; first-party
//! logins issue root application tokens, which are also the bearer tokens
//! accepted by the authenticated endpoints.
//!
//! ## Secrets at rest
//!
//! Passwords are stored as Argon2id hashes. Refresh tokens and authorization
//! codes are stored as SHA-256 digests only, and an authorization code can be
//! redeemed at most once, atomically.

pub mod api;
pub mod cli;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod lifetime;
pub mod secret;
pub mod store;
pub mod token;
pub mod validation;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
