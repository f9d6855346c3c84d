//! Token claims model.
//!
//! Every token carries the seven registered claims (`iss`, `sub`, `aud`,
//! `jti`, `iat`, `nbf`, `exp`). Callers extend them in one of two ways:
//!
//! - [`DefaultClaims`]: registered claims plus a free-form `metadata` object.
//!   Metadata is dynamically typed and lossy on purpose: after a round trip
//!   every JSON number is a floating point value (`3` comes back as `3.0`),
//!   and map keys that were not strings at issuance (e.g. integer keys) come
//!   back as strings.
//! - A caller-defined struct that flattens [`RegisteredClaims`] next to its own
//!   strongly typed fields and implements [`RegisteredClaimsAccess`]. These
//!   round-trip exactly.
//!
//! The verifier always decodes into the concrete type the caller names, so
//! the claims shape is fixed at compile time on both sides.
use crate::{AuthError, AuthResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type Metadata = serde_json::Map<String, Value>;

/// The `aud` claim. Serialised as an array; a bare string is accepted on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Audience(Vec<String>);

impl Audience {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|entry| entry == value)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(value) => Self(vec![value]),
            Raw::Many(values) => Self(values),
        })
    }
}

impl From<Vec<String>> for Audience {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl From<&[&str]> for Audience {
    fn from(values: &[&str]) -> Self {
        Self::new(values.iter().copied())
    }
}

/// Registered claims. Everything except `aud` is required when decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Audience::is_empty")]
    pub aud: Audience,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Accessors every claims type exposes so the authority can bind a fresh
/// registration without touching caller-defined fields.
pub trait RegisteredClaimsAccess {
    fn registered(&self) -> &RegisteredClaims;
    fn registered_mut(&mut self) -> &mut RegisteredClaims;

    fn register(&mut self, registered: RegisteredClaims) {
        *self.registered_mut() = registered;
    }

    fn issuer(&self) -> &str {
        &self.registered().iss
    }

    fn set_issuer(&mut self, issuer: String) {
        self.registered_mut().iss = issuer;
    }

    fn subject(&self) -> &str {
        &self.registered().sub
    }

    fn set_subject(&mut self, subject: String) {
        self.registered_mut().sub = subject;
    }

    fn audience(&self) -> &Audience {
        &self.registered().aud
    }

    fn set_audience(&mut self, audience: Audience) {
        self.registered_mut().aud = audience;
    }

    fn token_id(&self) -> &str {
        &self.registered().jti
    }

    fn set_token_id(&mut self, id: String) {
        self.registered_mut().jti = id;
    }

    fn issued_at(&self) -> i64 {
        self.registered().iat
    }

    fn set_issued_at(&mut self, at: i64) {
        self.registered_mut().iat = at;
    }

    fn not_before(&self) -> i64 {
        self.registered().nbf
    }

    fn set_not_before(&mut self, at: i64) {
        self.registered_mut().nbf = at;
    }

    fn expires_at(&self) -> i64 {
        self.registered().exp
    }

    fn set_expires_at(&mut self, at: i64) {
        self.registered_mut().exp = at;
    }
}

/// Anything that can be signed into and decoded out of a token.
pub trait Claims:
    RegisteredClaimsAccess + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Claims for T where
    T: RegisteredClaimsAccess + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl RegisteredClaimsAccess for RegisteredClaims {
    fn registered(&self) -> &RegisteredClaims {
        self
    }

    fn registered_mut(&mut self) -> &mut RegisteredClaims {
        self
    }
}

/// Registered claims plus free-form metadata (see the module docs for the
/// lossy round-trip rules).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultClaims {
    #[serde(flatten)]
    pub registered: RegisteredClaims,
    #[serde(
        default,
        skip_serializing_if = "Metadata::is_empty",
        deserialize_with = "lossy_metadata"
    )]
    pub metadata: Metadata,
}

impl DefaultClaims {
    /// Build claims whose metadata is `value` rendered as JSON. The value must
    /// serialise to an object; non-string map keys become strings.
    pub fn with_metadata<T: Serialize + ?Sized>(value: &T) -> AuthResult<Self> {
        match serde_json::to_value(value) {
            Ok(Value::Object(metadata)) => Ok(Self {
                registered: RegisteredClaims::default(),
                metadata,
            }),
            Ok(Value::Null) => Ok(Self::default()),
            Ok(_) => Err(AuthError::InvalidClaims(
                "metadata must be a JSON object".to_string(),
            )),
            Err(err) => Err(AuthError::InvalidClaims(format!("metadata: {err}"))),
        }
    }
}

impl RegisteredClaimsAccess for DefaultClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }

    fn registered_mut(&mut self) -> &mut RegisteredClaims {
        &mut self.registered
    }
}

fn lossy_metadata<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Metadata, D::Error> {
    let metadata = Metadata::deserialize(deserializer)?;
    Ok(metadata
        .into_iter()
        .map(|(key, value)| (key, float_numbers(value)))
        .collect())
}

fn float_numbers(value: Value) -> Value {
    match value {
        Value::Number(number) => number
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(items.into_iter().map(float_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, float_numbers(value)))
                .collect(),
        ),
        other => other,
    }
}

pub(crate) fn now_epoch_seconds() -> i64 {
    // Clamp a pre-epoch clock to zero rather than panic.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
