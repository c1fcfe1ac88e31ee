use super::TokenError;
use hmac::{digest::KeyInit, Hmac, Mac};
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    signature::{SignatureEncoding, Signer, Verifier},
    RsaPrivateKey, RsaPublicKey,
};
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

const PEM_PREFIX: &str = "-----BEGIN";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum SigningAlgorithm {
    HS256,
    HS384,
    HS512,
    RS256,
    RS384,
    RS512,
}

#[derive(Clone, Copy)]
enum Digest {
    Sha256,
    Sha384,
    Sha512,
}

impl SigningAlgorithm {
    pub const ALL: [Self; 6] = [
        Self::HS256,
        Self::HS384,
        Self::HS512,
        Self::RS256,
        Self::RS384,
        Self::RS512,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
        }
    }

    /// HMAC algorithms take raw key bytes, RSA algorithms take PEM keys.
    #[must_use]
    pub const fn is_symmetric(self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }

    const fn digest(self) -> Digest {
        match self {
            Self::HS256 | Self::RS256 => Digest::Sha256,
            Self::HS384 | Self::RS384 => Digest::Sha384,
            Self::HS512 | Self::RS512 => Digest::Sha512,
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.as_str() == s)
            .ok_or_else(|| TokenError::UnsupportedAlgorithm(s.to_string()))
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved key material, shaped by the algorithm family it is used with.
pub enum KeyMaterial {
    Symmetric(SecretSlice<u8>),
    Asymmetric(SecretString),
}

impl KeyMaterial {
    /// Wrap a resolved secret for `algorithm`.
    ///
    /// # Errors
    /// Returns [`TokenError::KeyParse`] when a PEM document is offered as an HMAC key,
    /// which would let a public key double as a shared secret.
    pub fn for_algorithm(
        algorithm: SigningAlgorithm,
        secret: SecretString,
    ) -> Result<Self, TokenError> {
        if algorithm.is_symmetric() {
            let bytes = secret.expose_secret().as_bytes();
            if bytes.is_empty() || secret.expose_secret().trim_start().starts_with(PEM_PREFIX) {
                return Err(TokenError::KeyParse);
            }
            Ok(Self::Symmetric(SecretSlice::from(bytes.to_vec())))
        } else {
            Ok(Self::Asymmetric(secret))
        }
    }

    /// # Errors
    /// Returns [`TokenError::KeyParse`] if the key cannot be used for `algorithm`.
    pub fn sign(&self, algorithm: SigningAlgorithm, input: &[u8]) -> Result<Vec<u8>, TokenError> {
        match (self, algorithm.is_symmetric()) {
            (Self::Symmetric(key), true) => {
                let key = key.expose_secret();
                match algorithm.digest() {
                    Digest::Sha256 => hmac_tag::<Hmac<Sha256>>(key, input),
                    Digest::Sha384 => hmac_tag::<Hmac<Sha384>>(key, input),
                    Digest::Sha512 => hmac_tag::<Hmac<Sha512>>(key, input),
                }
            }
            (Self::Asymmetric(pem), false) => {
                let private_key = decode_private_key(pem.expose_secret())?;
                let signature = match algorithm.digest() {
                    Digest::Sha256 => SigningKey::<Sha256>::new(private_key).sign(input),
                    Digest::Sha384 => SigningKey::<Sha384>::new(private_key).sign(input),
                    Digest::Sha512 => SigningKey::<Sha512>::new(private_key).sign(input),
                };
                Ok(signature.to_vec())
            }
            _ => Err(TokenError::KeyParse),
        }
    }

    /// # Errors
    /// Returns [`TokenError::InvalidSignature`] on mismatch and [`TokenError::KeyParse`] if
    /// the key cannot be used for `algorithm`.
    pub fn verify(
        &self,
        algorithm: SigningAlgorithm,
        input: &[u8],
        signature: &[u8],
    ) -> Result<(), TokenError> {
        match (self, algorithm.is_symmetric()) {
            (Self::Symmetric(key), true) => {
                let key = key.expose_secret();
                match algorithm.digest() {
                    Digest::Sha256 => hmac_verify::<Hmac<Sha256>>(key, input, signature),
                    Digest::Sha384 => hmac_verify::<Hmac<Sha384>>(key, input, signature),
                    Digest::Sha512 => hmac_verify::<Hmac<Sha512>>(key, input, signature),
                }
            }
            (Self::Asymmetric(pem), false) => {
                let public_key = decode_public_key(pem.expose_secret())?;
                let signature =
                    Signature::try_from(signature).map_err(|_| TokenError::InvalidSignature)?;
                let verified = match algorithm.digest() {
                    Digest::Sha256 => {
                        VerifyingKey::<Sha256>::new(public_key).verify(input, &signature)
                    }
                    Digest::Sha384 => {
                        VerifyingKey::<Sha384>::new(public_key).verify(input, &signature)
                    }
                    Digest::Sha512 => {
                        VerifyingKey::<Sha512>::new(public_key).verify(input, &signature)
                    }
                };
                verified.map_err(|_| TokenError::InvalidSignature)
            }
            _ => Err(TokenError::KeyParse),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symmetric(_) => f.write_str("KeyMaterial::Symmetric(***)"),
            Self::Asymmetric(_) => f.write_str("KeyMaterial::Asymmetric(***)"),
        }
    }
}

fn hmac_tag<M: Mac + KeyInit>(key: &[u8], input: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| TokenError::KeyParse)?;
    mac.update(input);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hmac_verify<M: Mac + KeyInit>(
    key: &[u8],
    input: &[u8],
    signature: &[u8],
) -> Result<(), TokenError> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| TokenError::KeyParse)?;
    mac.update(input);
    mac.verify_slice(signature)
        .map_err(|_| TokenError::InvalidSignature)
}

fn decode_private_key(pem: &str) -> Result<RsaPrivateKey, TokenError> {
    let pem = pem.trim();
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| TokenError::KeyParse)
}

/// Accepts SPKI or PKCS#1 public keys, or a private key whose public half is used.
fn decode_public_key(pem: &str) -> Result<RsaPublicKey, TokenError> {
    let pem = pem.trim();
    if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
        return Ok(key);
    }
    if let Ok(key) = RsaPublicKey::from_pkcs1_pem(pem) {
        return Ok(key);
    }
    decode_private_key(pem).map(|key| key.to_public_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_names_only() {
        for algorithm in SigningAlgorithm::ALL {
            assert_eq!(algorithm.as_str().parse::<SigningAlgorithm>(), Ok(algorithm));
        }
        for name in ["none", "hs256", "ES256", ""] {
            assert_eq!(
                name.parse::<SigningAlgorithm>(),
                Err(TokenError::UnsupportedAlgorithm(name.to_string()))
            );
        }
    }

    #[test]
    fn families() {
        assert!(SigningAlgorithm::HS384.is_symmetric());
        assert!(!SigningAlgorithm::RS512.is_symmetric());
    }

    #[test]
    fn hmac_signs_and_verifies() -> Result<(), TokenError> {
        let key = KeyMaterial::for_algorithm(
            SigningAlgorithm::HS512,
            SecretString::from("shared-secret".to_string()),
        )?;
        let tag = key.sign(SigningAlgorithm::HS512, b"payload")?;
        assert_eq!(tag.len(), 64);
        key.verify(SigningAlgorithm::HS512, b"payload", &tag)?;
        assert_eq!(
            key.verify(SigningAlgorithm::HS512, b"tampered", &tag),
            Err(TokenError::InvalidSignature)
        );
        Ok(())
    }

    #[test]
    fn pem_is_never_an_hmac_key() {
        let result = KeyMaterial::for_algorithm(
            SigningAlgorithm::HS256,
            SecretString::from("-----BEGIN PUBLIC KEY-----\nMIIB\n-----END PUBLIC KEY-----".to_owned()),
        );
        assert!(matches!(result, Err(TokenError::KeyParse)));
    }

    #[test]
    fn family_mismatch_is_rejected() -> Result<(), TokenError> {
        let key = KeyMaterial::for_algorithm(
            SigningAlgorithm::HS256,
            SecretString::from("shared-secret".to_string()),
        )?;
        assert_eq!(
            key.sign(SigningAlgorithm::RS256, b"payload"),
            Err(TokenError::KeyParse)
        );
        Ok(())
    }

    #[test]
    fn garbage_pem_fails_to_parse() -> Result<(), TokenError> {
        let key = KeyMaterial::for_algorithm(
            SigningAlgorithm::RS256,
            SecretString::from("not a pem".to_string()),
        )?;
        assert_eq!(
            key.sign(SigningAlgorithm::RS256, b"payload"),
            Err(TokenError::KeyParse)
        );
        Ok(())
    }
}
