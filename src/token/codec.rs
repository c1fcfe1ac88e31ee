use super::{
    claims::{Identity, TokenClaims, TokenHeader, TOKEN_TYPE},
    KeyMaterial, SigningAlgorithm, TokenError,
};
use crate::secret::{SecretReference, SecretResolver};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, sync::Arc};
use uuid::Uuid;

/// Per-app token settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningProfile {
    pub algorithm: SigningAlgorithm,
    pub signing_ref: SecretReference,
    /// Public key for RSA profiles; HMAC profiles always verify with `signing_ref`.
    pub verifying_ref: Option<SecretReference>,
    pub lifetime: Duration,
}

impl SigningProfile {
    /// The reference embedded in issued tokens.
    #[must_use]
    pub fn verification_ref(&self) -> &SecretReference {
        if self.algorithm.is_symmetric() {
            &self.signing_ref
        } else {
            self.verifying_ref.as_ref().unwrap_or(&self.signing_ref)
        }
    }
}

pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("jti", &self.claims.jti)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|e| TokenError::Encoding(e.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::MalformedToken)
}

/// Signs and verifies tokens, resolving keys through a shared [`SecretResolver`].
#[derive(Clone, Debug)]
pub struct TokenCodec {
    resolver: SecretResolver,
    trusted: Option<Arc<HashSet<SecretReference>>>,
}

impl TokenCodec {
    #[must_use]
    pub fn new(resolver: SecretResolver) -> Self {
        Self {
            resolver,
            trusted: None,
        }
    }

    /// Only accept tokens whose embedded key reference is one of `references`.
    #[must_use]
    pub fn with_trusted_references(
        mut self,
        references: impl IntoIterator<Item = SecretReference>,
    ) -> Self {
        self.trusted = Some(Arc::new(references.into_iter().collect()));
        self
    }

    #[must_use]
    pub fn resolver(&self) -> &SecretResolver {
        &self.resolver
    }

    /// # Errors
    /// See [`TokenCodec::sign_at`].
    pub fn sign(
        &self,
        profile: &SigningProfile,
        identity: &Identity,
        audience: &str,
        issuer: &str,
    ) -> Result<IssuedToken, TokenError> {
        self.sign_at(profile, identity, audience, issuer, Utc::now())
    }

    /// Sign `identity` into a token valid from `now` until `now + profile.lifetime`.
    ///
    /// # Errors
    /// Returns [`TokenError::Resolver`] if the signing key cannot be resolved,
    /// [`TokenError::KeyParse`] if it is unusable for the algorithm and
    /// [`TokenError::InvalidLifetime`] for sub-second lifetimes.
    pub fn sign_at(
        &self,
        profile: &SigningProfile,
        identity: &Identity,
        audience: &str,
        issuer: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let lifetime = profile.lifetime.num_seconds();
        if lifetime < 1 {
            return Err(TokenError::InvalidLifetime);
        }

        let secret = self.resolver.resolve(&profile.signing_ref)?;
        let key = KeyMaterial::for_algorithm(profile.algorithm, secret)?;

        let iat = now.timestamp();
        let exp = iat
            .checked_add(lifetime)
            .ok_or(TokenError::InvalidLifetime)?;
        let expires_at = DateTime::from_timestamp(exp, 0).ok_or(TokenError::InvalidLifetime)?;

        let claims = TokenClaims {
            identity: identity.clone(),
            key_ref: profile.verification_ref().clone(),
            iss: issuer.to_string(),
            aud: vec![audience.to_string()],
            sub: identity.email.clone(),
            exp,
            nbf: iat,
            iat,
            jti: Uuid::new_v4().to_string(),
        };
        let header = TokenHeader {
            alg: profile.algorithm.as_str().to_string(),
            typ: TOKEN_TYPE.to_string(),
        };

        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(&claims)?);
        let signature = key.sign(profile.algorithm, signing_input.as_bytes())?;
        let token = format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&signature)
        );

        Ok(IssuedToken {
            token,
            claims,
            expires_at,
        })
    }

    /// # Errors
    /// See [`TokenCodec::verify_at`].
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify `token` and return its claims.
    ///
    /// The payload is read before the signature is checked to learn which key to
    /// resolve; nothing from it is trusted until the signature verifies.
    ///
    /// # Errors
    /// Returns [`TokenError::MalformedToken`], [`TokenError::UnsupportedAlgorithm`],
    /// [`TokenError::UntrustedKeyReference`], [`TokenError::InvalidSignature`],
    /// [`TokenError::Expired`] or [`TokenError::NotYetValid`].
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::MalformedToken)?;
        let claims_b64 = parts.next().ok_or(TokenError::MalformedToken)?;
        let signature_b64 = parts.next().ok_or(TokenError::MalformedToken)?;
        if parts.next().is_some() {
            return Err(TokenError::MalformedToken);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        let algorithm: SigningAlgorithm = header.alg.parse()?;
        let claims: TokenClaims = b64d_json(claims_b64)?;

        if let Some(trusted) = &self.trusted {
            if !trusted.contains(&claims.key_ref) {
                return Err(TokenError::UntrustedKeyReference);
            }
        }

        let secret = self.resolver.resolve(&claims.key_ref)?;
        let key = KeyMaterial::for_algorithm(algorithm, secret)?;
        let signature =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| TokenError::MalformedToken)?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        key.verify(algorithm, signing_input.as_bytes(), &signature)?;

        let now = now.timestamp();
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }

        Ok(claims)
    }
}
