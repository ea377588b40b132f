//! Token value generation.
//!
//! Every value is derived from fresh OS randomness mixed with the issuance
//! context through SHA-256, then rendered as unpadded URL-safe base64. The
//! signed format wraps the access value's claims in an HS512 JWT instead.

use crate::config::AccessTokenFormat;
use crate::error::OAuthError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Context mixed into every generated value.
#[derive(Debug, Clone)]
pub struct GenerateBasic<'a> {
    pub client_id: &'a str,
    pub user_id: i64,
    pub issued_at: OffsetDateTime,
    pub access_expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: Option<String>,
}

/// Claims embedded in signed access tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl AccessClaims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// Fill `N` bytes from the OS secure random source.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], rand::Error> {
    let mut bytes = [0u8; N];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(bytes)
}

/// Random URL-safe identifier built from 32 bytes of OS randomness.
pub fn random_url_safe() -> Result<String, rand::Error> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes::<32>()?))
}

fn digest_value(kind: &[u8], basic: &GenerateBasic<'_>) -> Result<String, OAuthError> {
    let salt = random_bytes::<32>().map_err(|e| {
        tracing::error!(error = %e, "secure random source unavailable");
        OAuthError::ServerError
    })?;

    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(kind);
    hasher.update(basic.client_id.as_bytes());
    hasher.update(basic.user_id.to_be_bytes());
    hasher.update(basic.issued_at.unix_timestamp_nanos().to_be_bytes());
    Ok(URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

/// Produces access/refresh values in the configured format.
#[derive(Clone)]
pub enum CredentialGenerator {
    Opaque,
    Jwt {
        encoding: EncodingKey,
        decoding: DecodingKey,
    },
}

impl std::fmt::Debug for CredentialGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialGenerator::Opaque => f.write_str("CredentialGenerator::Opaque"),
            CredentialGenerator::Jwt { .. } => f.write_str("CredentialGenerator::Jwt"),
        }
    }
}

impl CredentialGenerator {
    pub fn new(format: AccessTokenFormat, secret: &str) -> Self {
        match format {
            AccessTokenFormat::Opaque => CredentialGenerator::Opaque,
            AccessTokenFormat::Jwt => CredentialGenerator::Jwt {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
            },
        }
    }

    pub fn format(&self) -> AccessTokenFormat {
        match self {
            CredentialGenerator::Opaque => AccessTokenFormat::Opaque,
            CredentialGenerator::Jwt { .. } => AccessTokenFormat::Jwt,
        }
    }

    /// Generate a fresh access value and, if requested, a refresh value.
    pub fn generate(
        &self,
        basic: &GenerateBasic<'_>,
        want_refresh: bool,
    ) -> Result<TokenPair, OAuthError> {
        let access = match self {
            CredentialGenerator::Opaque => digest_value(b"access", basic)?,
            CredentialGenerator::Jwt { encoding, .. } => {
                let claims = AccessClaims {
                    aud: basic.client_id.to_string(),
                    sub: basic.user_id.to_string(),
                    iat: basic.issued_at.unix_timestamp(),
                    exp: basic.access_expires_at.unix_timestamp(),
                    jti: digest_value(b"jti", basic)?,
                };
                encode(&Header::new(Algorithm::HS512), &claims, encoding).map_err(|e| {
                    tracing::error!(error = %e, "failed to sign access token");
                    OAuthError::ServerError
                })?
            }
        };

        let refresh = if want_refresh {
            Some(digest_value(b"refresh", basic)?)
        } else {
            None
        };

        Ok(TokenPair { access, refresh })
    }

    /// Verify signature and expiry of a signed access token.
    ///
    /// Always `None` for the opaque format; those are validated against the store.
    pub fn verify_signed(&self, token: &str) -> Option<AccessClaims> {
        let CredentialGenerator::Jwt { decoding, .. } = self else {
            return None;
        };
        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_aud = false;
        validation.leeway = 0;
        match decode::<AccessClaims>(token, decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "rejected signed access token");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use time::Duration;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn basic(now: OffsetDateTime) -> GenerateBasic<'static> {
        GenerateBasic {
            client_id: "default",
            user_id: 42,
            issued_at: now,
            access_expires_at: now + Duration::hours(1),
        }
    }

    fn is_url_safe(value: &str) -> bool {
        value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn opaque_values_are_url_safe_and_distinct() {
        let generator = CredentialGenerator::new(AccessTokenFormat::Opaque, SECRET);
        let pair = generator
            .generate(&basic(OffsetDateTime::now_utc()), true)
            .unwrap();
        let refresh = pair.refresh.expect("refresh requested");

        assert!(is_url_safe(&pair.access));
        assert!(is_url_safe(&refresh));
        assert!(!pair.access.contains('='));
        assert_ne!(pair.access, refresh);
        // 32 byte digest
        assert_eq!(pair.access.len(), 43);
    }

    #[test]
    fn refresh_is_omitted_when_not_requested() {
        let generator = CredentialGenerator::new(AccessTokenFormat::Opaque, SECRET);
        let pair = generator
            .generate(&basic(OffsetDateTime::now_utc()), false)
            .unwrap();
        assert!(pair.refresh.is_none());
    }

    #[test]
    fn same_context_never_collides() {
        let now = OffsetDateTime::now_utc();
        for format in [AccessTokenFormat::Opaque, AccessTokenFormat::Jwt] {
            let generator = CredentialGenerator::new(format, SECRET);
            let mut seen = HashSet::new();
            for _ in 0..200 {
                let pair = generator.generate(&basic(now), true).unwrap();
                assert!(seen.insert(pair.access));
                assert!(seen.insert(pair.refresh.unwrap()));
            }
        }
    }

    #[test]
    fn signed_token_round_trips_claims() {
        let generator = CredentialGenerator::new(AccessTokenFormat::Jwt, SECRET);
        let now = OffsetDateTime::now_utc();
        let pair = generator.generate(&basic(now), false).unwrap();

        let claims = generator.verify_signed(&pair.access).expect("valid token");
        assert_eq!(claims.user_id(), Some(42));
        assert_eq!(claims.aud, "default");
        assert_eq!(claims.iat, now.unix_timestamp());
        assert_eq!(claims.exp, (now + Duration::hours(1)).unix_timestamp());
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let generator = CredentialGenerator::new(AccessTokenFormat::Jwt, SECRET);
        let pair = generator
            .generate(&basic(OffsetDateTime::now_utc()), false)
            .unwrap();

        let mut tampered = pair.access.clone();
        tampered.push('x');
        assert!(generator.verify_signed(&tampered).is_none());

        let other = CredentialGenerator::new(
            AccessTokenFormat::Jwt,
            "another-secret-another-secret-another",
        );
        assert!(other.verify_signed(&pair.access).is_none());
    }

    #[test]
    fn expired_signed_token_is_rejected() {
        let generator = CredentialGenerator::new(AccessTokenFormat::Jwt, SECRET);
        let past = OffsetDateTime::now_utc() - Duration::hours(2);
        let pair = generator.generate(&basic(past), false).unwrap();
        assert!(generator.verify_signed(&pair.access).is_none());
    }

    #[test]
    fn opaque_generator_does_not_verify_signatures() {
        let generator = CredentialGenerator::new(AccessTokenFormat::Opaque, SECRET);
        assert!(generator.verify_signed("anything").is_none());
    }
}
