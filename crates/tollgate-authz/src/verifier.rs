//! Compact token verification.
//!
//! # Key invariants
//! - Only `alg = EdDSA` is accepted. `none`, HMAC and RSA headers are rejected
//!   before any key is looked up, whatever the payload or signature says.
//! - The signing key comes from the caller's [`KeyResolver`] by header `kid`;
//!   tokens without a `kid` are rejected.
//! - The signature covers the exact header and payload segments, so any change
//!   to either fails with `Unparseable`.
//! - Time checks have no leeway: `exp > now` and `nbf <= now`. Callers that
//!   want clock-skew tolerance shift `now` via [`TokenVerifier::validate_at`].
//!
//! # Error mapping
//! Malformed segments, algorithm mismatches, unknown kids and bad signatures
//! are `Unparseable`. Payloads that fail to decode into the requested claims
//! type, or that are outside their validity window, are `InvalidClaims`.
use crate::claims::{Claims, now_epoch_seconds};
use crate::resolver::KeyResolver;
use crate::{AuthError, AuthResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct TokenVerifier {
    issuer: Option<String>,
    audience: Option<String>,
}

impl TokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Additionally require `iss` to equal `issuer`.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Additionally require `aud` to contain `audience`.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn validate<C, R>(&self, token: &str, resolver: &R) -> AuthResult<C>
    where
        C: Claims,
        R: KeyResolver + ?Sized,
    {
        self.validate_at(token, resolver, now_epoch_seconds())
    }

    /// Decode into a caller-supplied target, replacing its contents on success
    /// and leaving it untouched on failure.
    pub fn validate_into<C, R>(&self, token: &str, resolver: &R, target: &mut C) -> AuthResult<()>
    where
        C: Claims,
        R: KeyResolver + ?Sized,
    {
        self.validate_into_at(token, resolver, now_epoch_seconds(), target)
    }

    pub fn validate_into_at<C, R>(
        &self,
        token: &str,
        resolver: &R,
        now: i64,
        target: &mut C,
    ) -> AuthResult<()>
    where
        C: Claims,
        R: KeyResolver + ?Sized,
    {
        *target = self.validate_at(token, resolver, now)?;
        Ok(())
    }

    pub fn validate_at<C, R>(&self, token: &str, resolver: &R, now: i64) -> AuthResult<C>
    where
        C: Claims,
        R: KeyResolver + ?Sized,
    {
        let result = self.verify(token, resolver, now);
        if let Err(err) = &result {
            tracing::debug!(kind = %err.kind(), error = %err, "token rejected");
        }
        result
    }

    fn verify<C, R>(&self, token: &str, resolver: &R, now: i64) -> AuthResult<C>
    where
        C: Claims,
        R: KeyResolver + ?Sized,
    {
        // Step 1: Parse the header and pin the algorithm before touching keys.
        let header = jsonwebtoken::decode_header(token)
            .map_err(|err| AuthError::Unparseable(format!("header: {err}")))?;
        if header.alg != Algorithm::EdDSA {
            return Err(AuthError::Unparseable(format!(
                "algorithm {:?} is not allowed",
                header.alg
            )));
        }
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::Unparseable("missing kid".to_string()))?;

        // Step 2: Resolve the key and verify the signature over the raw segments.
        let key = resolver.resolve(kid)?;
        let decoding_key = DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(key.as_bytes()))
            .map_err(|err| AuthError::Unparseable(format!("key {kid}: {err}")))?;
        let data = jsonwebtoken::decode::<C>(token, &decoding_key, &signature_only())
            .map_err(classify)?;
        let claims = data.claims;

        // Step 3: Time window, then optional issuer/audience expectations.
        let registered = claims.registered();
        if registered.exp <= now {
            return Err(AuthError::InvalidClaims("token expired".to_string()));
        }
        if registered.nbf > now {
            return Err(AuthError::InvalidClaims("token not yet valid".to_string()));
        }
        if let Some(issuer) = &self.issuer {
            if registered.iss != *issuer {
                return Err(AuthError::InvalidClaims("unexpected issuer".to_string()));
            }
        }
        if let Some(audience) = &self.audience {
            if !registered.aud.contains(audience) {
                return Err(AuthError::InvalidClaims("unexpected audience".to_string()));
            }
        }
        Ok(claims)
    }
}

/// `ValidateToken` against the system clock.
pub fn validate_token<C, R>(token: &str, resolver: &R) -> AuthResult<C>
where
    C: Claims,
    R: KeyResolver + ?Sized,
{
    TokenVerifier::new().validate(token, resolver)
}

pub fn validate_token_at<C, R>(token: &str, resolver: &R, now: i64) -> AuthResult<C>
where
    C: Claims,
    R: KeyResolver + ?Sized,
{
    TokenVerifier::new().validate_at(token, resolver, now)
}

// jsonwebtoken only checks the signature and algorithm; registered claim
// checks run against the injected clock above.
fn signature_only() -> Validation {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.leeway = 0;
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        JwtErrorKind::Json(_) => AuthError::InvalidClaims(format!("payload: {err}")),
        _ => AuthError::Unparseable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{DefaultClaims, RegisteredClaims, RegisteredClaimsAccess};
    use crate::resolver::KeySet;
    use crate::{AuthorityConfig, KeyPair, TokenAuthority};
    use jsonwebtoken::{EncodingKey, Header};
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn authority(seed: u8) -> TokenAuthority {
        TokenAuthority::new(
            AuthorityConfig::new("svc-a", Duration::from_secs(10)),
            KeyPair::from_seed(&[seed; 32]),
        )
        .expect("authority")
    }

    fn issue(authority: &TokenAuthority) -> String {
        authority
            .issue_token_at(NOW, "user-1", ["svc-b"], DefaultClaims::default())
            .expect("issue")
            .token
    }

    #[test]
    fn validates_fresh_token() {
        let authority = authority(1);
        let token = issue(&authority);
        let claims: DefaultClaims =
            validate_token_at(&token, &authority.key_set(), NOW).expect("valid");
        assert_eq!(claims.issuer(), "svc-a");
        assert_eq!(claims.subject(), "user-1");
    }

    #[test]
    fn expiry_has_no_grace_window() {
        let authority = authority(1);
        let token = issue(&authority);
        let keys = authority.key_set();
        assert!(validate_token_at::<DefaultClaims, _>(&token, &keys, NOW + 9).is_ok());
        for now in [NOW + 10, NOW + 11] {
            let err = validate_token_at::<DefaultClaims, _>(&token, &keys, now).expect_err("expired");
            assert!(matches!(err, AuthError::InvalidClaims(_)));
        }
    }

    #[test]
    fn not_before_is_enforced() {
        let authority = authority(1);
        let token = issue(&authority);
        let err = validate_token_at::<DefaultClaims, _>(&token, &authority.key_set(), NOW - 1)
            .expect_err("early");
        assert!(matches!(err, AuthError::InvalidClaims(_)));
    }

    #[test]
    fn unknown_kid_is_unparseable() {
        let token = issue(&authority(1));
        let err = validate_token_at::<DefaultClaims, _>(&token, &authority(2).key_set(), NOW)
            .expect_err("unknown kid");
        assert!(matches!(err, AuthError::Unparseable(_)));
    }

    #[test]
    fn signature_from_other_key_is_unparseable() {
        // Resolver maps the kid to a different key than the one that signed.
        let token = issue(&authority(1));
        let other = KeyPair::from_seed(&[2u8; 32]).public_key();
        let resolver = move |_: &str| Ok(other);
        let err = validate_token_at::<DefaultClaims, _>(&token, &resolver, NOW).expect_err("sig");
        assert!(matches!(err, AuthError::Unparseable(_)));
    }

    #[test]
    fn missing_kid_is_unparseable() {
        let pair = KeyPair::from_seed(&[1u8; 32]);
        let claims = RegisteredClaims {
            iss: "svc-a".to_string(),
            sub: "user-1".to_string(),
            jti: "id".to_string(),
            iat: NOW,
            nbf: NOW,
            exp: NOW + 10,
            ..Default::default()
        };
        let der = pair.pkcs8_der().expect("der");
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::EdDSA),
            &claims,
            &EncodingKey::from_ed_der(der.as_bytes()),
        )
        .expect("encode");
        let err = validate_token_at::<RegisteredClaims, _>(&token, &KeySet::from_keys([pair.public_key()]), NOW)
            .expect_err("no kid");
        assert!(matches!(err, AuthError::Unparseable(_)));
    }

    #[test]
    fn wrong_claims_shape_is_invalid_claims() {
        #[derive(Debug, serde::Serialize, serde::Deserialize)]
        struct NeedsTenant {
            #[serde(flatten)]
            registered: RegisteredClaims,
            tenant: String,
        }
        impl RegisteredClaimsAccess for NeedsTenant {
            fn registered(&self) -> &RegisteredClaims {
                &self.registered
            }
            fn registered_mut(&mut self) -> &mut RegisteredClaims {
                &mut self.registered
            }
        }

        let authority = authority(1);
        let token = issue(&authority);
        let err = validate_token_at::<NeedsTenant, _>(&token, &authority.key_set(), NOW)
            .expect_err("missing tenant");
        assert!(matches!(err, AuthError::InvalidClaims(_)));
    }

    #[test]
    fn issuer_and_audience_expectations() {
        let authority = authority(1);
        let token = issue(&authority);
        let keys = authority.key_set();

        let strict = TokenVerifier::new().with_issuer("svc-a").with_audience("svc-b");
        assert!(strict.validate_at::<DefaultClaims, _>(&token, &keys, NOW).is_ok());

        let other_issuer = TokenVerifier::new().with_issuer("svc-x");
        assert!(matches!(
            other_issuer.validate_at::<DefaultClaims, _>(&token, &keys, NOW),
            Err(AuthError::InvalidClaims(_))
        ));

        let other_audience = TokenVerifier::new().with_audience("svc-x");
        assert!(matches!(
            other_audience.validate_at::<DefaultClaims, _>(&token, &keys, NOW),
            Err(AuthError::InvalidClaims(_))
        ));
    }

    #[test]
    fn validate_into_leaves_target_on_failure() {
        let issuer = authority(1);
        let token = issue(&issuer);
        let mut target = DefaultClaims::default();
        target.set_subject("placeholder".to_string());

        let err = TokenVerifier::new()
            .validate_into_at(&token, &authority(2).key_set(), NOW, &mut target)
            .expect_err("wrong key");
        assert!(matches!(err, AuthError::Unparseable(_)));
        assert_eq!(target.subject(), "placeholder");

        let err = TokenVerifier::new()
            .validate_into_at(&token, &issuer.key_set(), NOW + 11, &mut target)
            .expect_err("expired");
        assert!(matches!(err, AuthError::InvalidClaims(_)));
        assert_eq!(target.subject(), "placeholder");

        TokenVerifier::new()
            .validate_into_at(&token, &issuer.key_set(), NOW, &mut target)
            .expect("valid");
        assert_eq!(target.subject(), "user-1");
    }

    #[test]
    fn garbage_is_unparseable() {
        let keys = authority(1).key_set();
        for token in ["", "abc", "a.b", "a.b.c", "..."] {
            let err = validate_token_at::<DefaultClaims, _>(token, &keys, NOW).expect_err(token);
            assert!(matches!(err, AuthError::Unparseable(_)), "{token}");
        }
    }
}
