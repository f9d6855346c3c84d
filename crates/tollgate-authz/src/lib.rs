//! Ed25519 token authority, verifier and authorization guard.
//!
//! # Purpose
//! Issue compact EdDSA tokens carrying registered plus caller-defined claims,
//! publish the verification keys as a JWKS, verify tokens against a key
//! resolver, and gate requests through a pluggable policy checker.
//!
//! # How it fits
//! ```text
//! KeyPair -> TokenAuthority --token--> TokenVerifier -> Guard -> SessionContext
//!                 |                         ^
//!                 +--- Jwks / KeySet -------+  (KeyResolver, rotated via KeyRing)
//! ```
//!
//! # Key invariants
//! - Tokens are EdDSA/Ed25519 only; `none`, HMAC and RSA headers are rejected.
//! - `kid` is the base64url SHA-256 of the public key, so the same key always
//!   publishes the same JWK.
//! - Published JWKS documents never contain private material.
//! - Core operations are synchronous and never retry; failures are typed
//!   [`AuthError`]s. Boundary adapters should expose only
//!   [`AuthError::opaque_message`].
//!
//! # Examples
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tollgate_authz::{
//!     AuthorityConfig, DefaultClaims, Guard, KeyPair, Metadata, MemoryPolicyChecker, Policy,
//!     TokenAuthority,
//! };
//!
//! let authority = TokenAuthority::new(
//!     AuthorityConfig::new("svc-a", Duration::from_secs(60)),
//!     KeyPair::generate(),
//! )
//! .expect("authority");
//! let checker = MemoryPolicyChecker::new(vec![Policy::allow(
//!     "readers",
//!     &["user-*"],
//!     &["articles:*"],
//!     &["read"],
//! )])
//! .expect("policies");
//! let guard: Guard<DefaultClaims, _, _> =
//!     Guard::new(Arc::new(authority.key_set()), Arc::new(checker));
//!
//! let token = authority
//!     .issue_token("user-1", ["svc-b"], DefaultClaims::default())
//!     .expect("issue")
//!     .token;
//! let authorized = guard
//!     .authenticate(&token)
//!     .and_then(|identity| identity.authorize(&guard, "articles:1", "read", &Metadata::new()))
//!     .expect("authorized");
//! assert_eq!(authorized.subject(), "user-1");
//! ```
//!
//! # Common pitfalls
//! - Retiring a key from a [`KeyRing`] before its tokens expire rejects them.
//! - `DefaultClaims` metadata is lossy: integers come back as floats.

mod authority;
mod claims;
mod errors;
mod guard;
mod jwks;
mod keys;
mod policy;
mod resolver;
pub mod session;
mod verifier;

pub use authority::{AuthorityConfig, IssuedToken, TokenAuthority};
pub use claims::{
    Audience, Claims, DefaultClaims, Metadata, RegisteredClaims, RegisteredClaimsAccess,
};
pub use errors::{AuthError, AuthResult, ErrorKind};
pub use guard::{Authenticated, Authenticator, Authorized, Guard};
pub use jwks::{ALG_EDDSA, CRV_ED25519, Jwk, Jwks, KTY_OKP, KeyUse, PrivateJwk};
pub use keys::{
    DEFAULT_PBKDF2_ITERATIONS, KeyBlocks, KeyPair, kid_for, load_key_file, read_key_file,
    save_key_file, write_key_file,
};
pub use policy::{
    AuthorizationRequest, CasbinPolicyChecker, Effect, GroupingRule, MemoryPolicyChecker, Policy,
    PolicyChecker, PolicyRule, wildcard_match,
};
pub use resolver::{KeyResolver, KeyRing, KeySet};
pub use session::SessionContext;
pub use verifier::{TokenVerifier, validate_token, validate_token_at};

pub use ed25519_dalek::VerifyingKey;
