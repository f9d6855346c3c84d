//! Verification key resolution and rotation.
//!
//! # Purpose
//! Map a token header `kid` to the Ed25519 public key that must have signed
//! it. Verifiers only ever see a [`KeyResolver`]; where the keys come from
//! (a published JWKS, an in-process authority, a rotating ring) is the
//! caller's choice.
//!
//! # Concurrency model
//! [`KeySet`] is an immutable snapshot. [`KeyRing`] holds the current snapshot
//! behind an `ArcSwap`: readers load it without locking and never observe a
//! half-updated set; rotation builds a new snapshot and swaps it in.
//!
//! # Rotation
//! Publish the new key alongside the old ones, start issuing with the new key,
//! and retire old kids once every token they signed has expired.
use crate::jwks::{Jwk, Jwks};
use crate::keys::kid_for;
use crate::{AuthError, AuthResult};
use arc_swap::ArcSwap;
use ed25519_dalek::VerifyingKey;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolve the public key for a `kid`. Unknown kids fail with `Unparseable`,
/// the same kind a signature mismatch produces.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, kid: &str) -> AuthResult<VerifyingKey>;
}

impl<F> KeyResolver for F
where
    F: Fn(&str) -> AuthResult<VerifyingKey> + Send + Sync,
{
    fn resolve(&self, kid: &str) -> AuthResult<VerifyingKey> {
        self(kid)
    }
}

/// Immutable set of active verification keys plus its JWKS rendering.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, VerifyingKey>,
    jwks: Jwks,
}

impl KeySet {
    /// Build a set from public keys. Duplicates collapse to one entry; JWKS
    /// order follows first appearance.
    pub fn from_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = VerifyingKey>,
    {
        let mut set = Self::default();
        for key in keys {
            set.insert(key);
        }
        set
    }

    /// Build a set from a published JWKS document. Every entry must be a
    /// well-formed Ed25519 key whose kid matches its `x`.
    pub fn from_jwks(jwks: &Jwks) -> AuthResult<Self> {
        let mut set = Self::default();
        for jwk in &jwks.keys {
            set.insert(jwk.verifying_key()?);
        }
        Ok(set)
    }

    fn insert(&mut self, key: VerifyingKey) {
        let kid = kid_for(&key);
        if self.keys.insert(kid, key).is_none() {
            self.jwks.keys.push(Jwk::from_public_key(&key));
        }
    }

    fn without(&self, kid: &str) -> Self {
        Self::from_keys(
            self.jwks
                .keys
                .iter()
                .filter(|jwk| jwk.kid != kid)
                .filter_map(|jwk| self.keys.get(&jwk.kid).copied()),
        )
    }

    fn with(&self, key: VerifyingKey) -> Self {
        let mut next = self.clone();
        next.insert(key);
        next
    }

    pub fn jwks(&self) -> &Jwks {
        &self.jwks
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.jwks.keys.iter().map(|jwk| jwk.kid.as_str())
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyResolver for KeySet {
    fn resolve(&self, kid: &str) -> AuthResult<VerifyingKey> {
        self.keys
            .get(kid)
            .copied()
            .ok_or_else(|| AuthError::Unparseable(format!("unknown signing key {kid}")))
    }
}

impl KeyResolver for Jwks {
    fn resolve(&self, kid: &str) -> AuthResult<VerifyingKey> {
        let jwk = self
            .find(kid)
            .ok_or_else(|| AuthError::Unparseable(format!("unknown signing key {kid}")))?;
        jwk.verifying_key()
            .map_err(|_| AuthError::Unparseable(format!("unusable signing key {kid}")))
    }
}

/// Atomically swappable [`KeySet`].
pub struct KeyRing {
    current: ArcSwap<KeySet>,
}

impl KeyRing {
    pub fn new(initial: KeySet) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn snapshot(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    pub fn publish(&self, set: KeySet) {
        let kids: Vec<String> = set.kids().map(str::to_string).collect();
        self.current.store(Arc::new(set));
        tracing::info!(?kids, "published verification key set");
    }

    /// Add a key while keeping every previously published one resolvable.
    pub fn rotate(&self, key: VerifyingKey) {
        self.current.rcu(|current| current.with(key));
        tracing::info!(kid = %kid_for(&key), "rotated in verification key");
    }

    /// Drop a key from the published set. Returns whether it was present.
    pub fn retire(&self, kid: &str) -> bool {
        let previous = self.current.rcu(|current| current.without(kid));
        let removed = previous.contains(kid);
        if removed {
            tracing::info!(%kid, "retired verification key");
        }
        removed
    }

    pub fn jwks(&self) -> Jwks {
        self.current.load().jwks().clone()
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::new(KeySet::default())
    }
}

impl KeyResolver for KeyRing {
    fn resolve(&self, kid: &str) -> AuthResult<VerifyingKey> {
        self.current.load().resolve(kid)
    }
}
