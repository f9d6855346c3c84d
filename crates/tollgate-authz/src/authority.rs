//! Token issuance.
//!
//! # Purpose
//! A [`TokenAuthority`] owns one Ed25519 key pair and a fixed issuer identity.
//! It signs compact EdDSA tokens and publishes the matching public JWK so any
//! verifier holding the JWKS can resolve what it issues.
//!
//! # Key invariants
//! - Header is always `alg = EdDSA` with `kid = kid_for(public key)`; the
//!   published JWK carries the same `kid`.
//! - `exp > iat >= nbf` for every issued token (TTL must be positive), and
//!   `jti` is a fresh UUIDv7 per call.
//! - The authority is immutable after construction and safe to share.
//!
//! # Examples
//! ```rust
//! use std::time::Duration;
//! use tollgate_authz::{AuthorityConfig, DefaultClaims, KeyPair, TokenAuthority};
//!
//! let config = AuthorityConfig::new("svc-a", Duration::from_secs(10));
//! let authority = TokenAuthority::new(config, KeyPair::generate()).expect("authority");
//! let issued = authority
//!     .issue_token("user-1", ["svc-b"], DefaultClaims::default())
//!     .expect("issue");
//! assert_eq!(issued.token.split('.').count(), 3);
//! ```
use crate::claims::{Audience, Claims, RegisteredClaims, now_epoch_seconds};
use crate::jwks::{Jwk, Jwks};
use crate::resolver::KeySet;
use crate::{AuthError, AuthResult, KeyPair};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

/// Issuer identity and token lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorityConfig {
    pub issuer: String,
    pub ttl_secs: u64,
}

impl AuthorityConfig {
    pub fn new(issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            issuer: issuer.into(),
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.issuer.trim().is_empty() {
            return Err(AuthError::InvalidConfig("issuer must not be empty".to_string()));
        }
        if self.ttl_secs == 0 {
            return Err(AuthError::InvalidConfig("token ttl must be positive".to_string()));
        }
        if i64::try_from(self.ttl_secs).is_err() {
            return Err(AuthError::InvalidConfig("token ttl is too large".to_string()));
        }
        Ok(())
    }
}

/// A signed token together with the claims that were signed.
#[derive(Debug, Clone)]
pub struct IssuedToken<C> {
    pub claims: C,
    pub token: String,
}

pub struct TokenAuthority {
    issuer: String,
    ttl_secs: i64,
    keys: KeyPair,
    kid: String,
    encoding_key: EncodingKey,
}

impl TokenAuthority {
    pub fn new(config: AuthorityConfig, keys: KeyPair) -> AuthResult<Self> {
        config.validate()?;
        let ttl_secs = i64::try_from(config.ttl_secs)
            .map_err(|_| AuthError::InvalidConfig("token ttl is too large".to_string()))?;
        let der = keys.pkcs8_der()?;
        let encoding_key = EncodingKey::from_ed_der(der.as_bytes());
        let kid = keys.kid();
        Ok(Self {
            issuer: config.issuer,
            ttl_secs,
            keys,
            kid,
            encoding_key,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs as u64)
    }

    /// Issue a token for `subject`, binding a fresh registration into
    /// `extension` and leaving its caller-defined fields untouched.
    pub fn issue_token<C, A>(
        &self,
        subject: &str,
        audience: A,
        extension: C,
    ) -> AuthResult<IssuedToken<C>>
    where
        C: Claims,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        self.issue_token_at(now_epoch_seconds(), subject, audience, extension)
    }

    pub fn issue_token_at<C, A>(
        &self,
        now: i64,
        subject: &str,
        audience: A,
        mut extension: C,
    ) -> AuthResult<IssuedToken<C>>
    where
        C: Claims,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        let exp = now
            .checked_add(self.ttl_secs)
            .ok_or_else(|| AuthError::Signing("expiry overflows".to_string()))?;
        extension.register(RegisteredClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: Audience::new(audience),
            jti: Uuid::now_v7().to_string(),
            iat: now,
            nbf: now,
            exp,
        });

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());
        let token = jsonwebtoken::encode(&header, &extension, &self.encoding_key)
            .map_err(|err| AuthError::Signing(err.to_string()))?;

        tracing::debug!(kid = %self.kid, jti = %extension.token_id(), "issued token");
        Ok(IssuedToken {
            claims: extension,
            token,
        })
    }

    /// Public half of the signing key as a JWK. Never includes `d`.
    pub fn public_jwk(&self) -> Jwk {
        Jwk::from_public_key(&self.keys.public_key())
    }

    pub fn publish_jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.public_jwk()],
        }
    }

    pub fn publish_jwks_json(&self) -> AuthResult<Vec<u8>> {
        self.publish_jwks().to_json()
    }

    /// Verification snapshot containing only this authority's key.
    pub fn key_set(&self) -> KeySet {
        KeySet::from_keys([self.keys.public_key()])
    }
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("issuer", &self.issuer)
            .field("ttl_secs", &self.ttl_secs)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{DefaultClaims, RegisteredClaimsAccess};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    const TEST_SEED: [u8; 32] = [5u8; 32];

    fn authority() -> TokenAuthority {
        TokenAuthority::new(
            AuthorityConfig::new("svc-a", Duration::from_secs(10)),
            KeyPair::from_seed(&TEST_SEED),
        )
        .expect("authority")
    }

    fn segment_json(token: &str, index: usize) -> serde_json::Value {
        let segment = token.split('.').nth(index).expect("segment");
        let bytes = URL_SAFE_NO_PAD.decode(segment).expect("base64");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[test]
    fn config_validation() {
        assert!(AuthorityConfig::new("svc-a", Duration::from_secs(1)).validate().is_ok());
        assert!(matches!(
            AuthorityConfig::new(" ", Duration::from_secs(1)).validate(),
            Err(AuthError::InvalidConfig(_))
        ));
        assert!(matches!(
            AuthorityConfig::new("svc-a", Duration::ZERO).validate(),
            Err(AuthError::InvalidConfig(_))
        ));
        let huge = AuthorityConfig {
            issuer: "svc-a".to_string(),
            ttl_secs: u64::MAX,
        };
        assert!(matches!(huge.validate(), Err(AuthError::InvalidConfig(_))));
    }

    #[test]
    fn issue_populates_registered_claims() {
        let authority = authority();
        let issued = authority
            .issue_token_at(1_700_000_000, "user-1", ["svc-b"], DefaultClaims::default())
            .expect("issue");
        let claims = &issued.claims;
        assert_eq!(claims.issuer(), "svc-a");
        assert_eq!(claims.subject(), "user-1");
        assert_eq!(claims.audience().as_slice(), ["svc-b"]);
        assert_eq!(claims.issued_at(), 1_700_000_000);
        assert_eq!(claims.not_before(), 1_700_000_000);
        assert_eq!(claims.expires_at(), 1_700_000_010);
        assert!(claims.expires_at() > claims.issued_at());
        let id = Uuid::parse_str(claims.token_id()).expect("uuid");
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn token_ids_are_unique() {
        let authority = authority();
        let a = authority
            .issue_token("user-1", ["svc-b"], DefaultClaims::default())
            .expect("a");
        let b = authority
            .issue_token("user-1", ["svc-b"], DefaultClaims::default())
            .expect("b");
        assert_ne!(a.claims.token_id(), b.claims.token_id());
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn header_pins_eddsa_and_kid() {
        let authority = authority();
        let issued = authority
            .issue_token("user-1", ["svc-b"], DefaultClaims::default())
            .expect("issue");
        let header = segment_json(&issued.token, 0);
        assert_eq!(header["alg"], "EdDSA");
        assert_eq!(header["kid"], authority.kid());
        assert_eq!(authority.public_jwk().kid, authority.kid());
    }

    #[test]
    fn payload_uses_registered_wire_names() {
        let claims = DefaultClaims::with_metadata(&serde_json::json!({"tier": "gold"}))
            .expect("metadata");
        let issued = authority()
            .issue_token("user-1", ["svc-b"], claims)
            .expect("issue");
        let payload = segment_json(&issued.token, 1);
        assert_eq!(payload["iss"], "svc-a");
        assert_eq!(payload["sub"], "user-1");
        assert_eq!(payload["aud"], serde_json::json!(["svc-b"]));
        assert_eq!(payload["metadata"]["tier"], "gold");
        for key in ["jti", "iat", "nbf", "exp"] {
            assert!(payload.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn same_key_pair_publishes_identical_jwks() {
        let a = authority();
        let b = TokenAuthority::new(
            AuthorityConfig::new("svc-other", Duration::from_secs(60)),
            KeyPair::from_seed(&TEST_SEED),
        )
        .expect("authority");
        assert_eq!(a.kid(), b.kid());
        assert_eq!(
            a.publish_jwks_json().expect("a"),
            b.publish_jwks_json().expect("b")
        );
    }

    #[test]
    fn jwks_never_contains_private_material() {
        let json = authority().publish_jwks_json().expect("jwks");
        let value: serde_json::Value = serde_json::from_slice(&json).expect("json");
        let key = &value["keys"][0];
        assert!(key.get("d").is_none());
        assert_eq!(key["kty"], "OKP");
        assert_eq!(key["use"], "sig");
    }

    #[test]
    fn key_set_contains_authority_kid() {
        let authority = authority();
        assert!(authority.key_set().contains(authority.kid()));
    }

    #[test]
    fn debug_output_omits_key_material() {
        let rendered = format!("{:?}", authority());
        assert!(rendered.contains("svc-a"));
        assert!(!rendered.contains("encoding_key"));
    }
}
