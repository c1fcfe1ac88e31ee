//! Secret references and the scheme registry that resolves them.
//!
//! A [`SecretReference`] names where key material lives, e.g. `env://JWT_KEY` or
//! `literal://changeme`. The [`SecretResolver`] maps the scheme part to a
//! [`SchemeResolver`]; new storage backends are added by registering another scheme,
//! callers never change.
//!
//! > **Warning:** a `literal://` reference carries the secret itself. References are
//! > embedded in issued tokens, so literal references are only suitable for tests
//! > and local development.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};
use thiserror::Error;

pub const SCHEME_DELIMITER: &str = "://";
pub const ENV_SCHEME: &str = "env";
pub const LITERAL_SCHEME: &str = "literal";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("malformed secret reference")]
    MalformedReference,
    #[error("unknown secret scheme: {0}")]
    UnknownScheme(String),
    #[error("environment variable {0} is not set")]
    MissingEnvironmentValue(String),
    #[error("secret lookup failed: {0}")]
    Lookup(String),
}

/// A `<scheme>://<locator>` string naming where a secret is stored.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretReference {
    raw: String,
    scheme_len: usize,
}

impl SecretReference {
    /// Parse a reference; the string must contain exactly one `://` separator with a
    /// non-empty scheme and locator on either side.
    ///
    /// # Errors
    /// Returns [`ResolverError::MalformedReference`] for any other shape.
    pub fn parse(raw: &str) -> Result<Self, ResolverError> {
        let mut parts = raw.split(SCHEME_DELIMITER);
        let scheme = parts.next().unwrap_or_default();
        let locator = parts.next().ok_or(ResolverError::MalformedReference)?;
        if parts.next().is_some() || scheme.is_empty() || locator.is_empty() {
            return Err(ResolverError::MalformedReference);
        }
        Ok(Self {
            raw: raw.to_string(),
            scheme_len: scheme.len(),
        })
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_len]
    }

    #[must_use]
    pub fn locator(&self) -> &str {
        &self.raw[self.scheme_len + SCHEME_DELIMITER.len()..]
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for SecretReference {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Literal locators are the secret itself, keep them out of logs.
impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scheme() == LITERAL_SCHEME {
            write!(f, "{LITERAL_SCHEME}{SCHEME_DELIMITER}***")
        } else {
            f.write_str(&self.raw)
        }
    }
}

impl fmt::Debug for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretReference")
            .field(&self.to_string())
            .finish()
    }
}

impl Serialize for SecretReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for SecretReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Resolves the locator part of a reference for one scheme.
pub trait SchemeResolver: Send + Sync {
    /// # Errors
    /// Returns a [`ResolverError`] when the secret cannot be found.
    fn resolve(&self, locator: &str) -> Result<SecretString, ResolverError>;
}

impl<F> SchemeResolver for F
where
    F: Fn(&str) -> Result<SecretString, ResolverError> + Send + Sync,
{
    fn resolve(&self, locator: &str) -> Result<SecretString, ResolverError> {
        self(locator)
    }
}

/// `env://NAME` reads the environment variable `NAME`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvScheme;

impl SchemeResolver for EnvScheme {
    fn resolve(&self, locator: &str) -> Result<SecretString, ResolverError> {
        std::env::var(locator)
            .map(SecretString::from)
            .map_err(|_| ResolverError::MissingEnvironmentValue(locator.to_string()))
    }
}

/// `literal://VALUE` returns `VALUE` unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct LiteralScheme;

impl SchemeResolver for LiteralScheme {
    fn resolve(&self, locator: &str) -> Result<SecretString, ResolverError> {
        Ok(SecretString::from(locator.to_string()))
    }
}

/// Immutable scheme registry, cheap to clone and share between handlers.
#[derive(Clone)]
pub struct SecretResolver {
    schemes: Arc<HashMap<String, Arc<dyn SchemeResolver>>>,
}

impl SecretResolver {
    #[must_use]
    pub fn builder() -> SecretResolverBuilder {
        SecretResolverBuilder::default()
    }

    /// Registry with the built-in `env` and `literal` schemes.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::builder()
            .register(ENV_SCHEME, EnvScheme)
            .register(LITERAL_SCHEME, LiteralScheme)
            .build()
    }

    #[must_use]
    pub fn supports(&self, scheme: &str) -> bool {
        self.schemes.contains_key(scheme)
    }

    #[must_use]
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.schemes.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Parse `raw` and make sure its scheme is registered, without resolving it.
    ///
    /// # Errors
    /// Returns [`ResolverError::MalformedReference`] or [`ResolverError::UnknownScheme`].
    pub fn check(&self, raw: &str) -> Result<SecretReference, ResolverError> {
        let reference = SecretReference::parse(raw)?;
        if !self.supports(reference.scheme()) {
            return Err(ResolverError::UnknownScheme(reference.scheme().to_string()));
        }
        Ok(reference)
    }

    /// Resolve a reference to its secret material.
    ///
    /// # Errors
    /// Returns [`ResolverError::UnknownScheme`] for unregistered schemes, or whatever
    /// the scheme resolver reports.
    pub fn resolve(&self, reference: &SecretReference) -> Result<SecretString, ResolverError> {
        let resolver = self
            .schemes
            .get(reference.scheme())
            .ok_or_else(|| ResolverError::UnknownScheme(reference.scheme().to_string()))?;
        resolver.resolve(reference.locator())
    }
}

impl fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretResolver")
            .field("schemes", &self.schemes())
            .finish()
    }
}

#[derive(Default)]
pub struct SecretResolverBuilder {
    schemes: HashMap<String, Arc<dyn SchemeResolver>>,
}

impl SecretResolverBuilder {
    #[must_use]
    pub fn register(mut self, scheme: &str, resolver: impl SchemeResolver + 'static) -> Self {
        self.schemes.insert(scheme.to_string(), Arc::new(resolver));
        self
    }

    #[must_use]
    pub fn build(self) -> SecretResolver {
        SecretResolver {
            schemes: Arc::new(self.schemes),
        }
    }
}
