use crate::keys::kid_for;
use crate::{AuthError, AuthResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

pub const KTY_OKP: &str = "OKP";
pub const CRV_ED25519: &str = "Ed25519";
pub const ALG_EDDSA: &str = "EdDSA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Sig,
}

/// Public Ed25519 key in JWK form. Never carries private material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub alg: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_field: KeyUse,
    pub x: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Private OKP key as minted by external identity providers; only used for
/// import.
#[derive(Clone, Deserialize)]
pub struct PrivateJwk {
    pub kty: String,
    pub crv: String,
    #[serde(default)]
    pub d: String,
    #[serde(default)]
    pub x: Option<String>,
}

impl std::fmt::Debug for PrivateJwk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateJwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("x", &self.x)
            .finish_non_exhaustive()
    }
}

impl Jwk {
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Self {
            kty: KTY_OKP.to_string(),
            crv: CRV_ED25519.to_string(),
            alg: ALG_EDDSA.to_string(),
            kid: kid_for(public_key),
            use_field: KeyUse::Sig,
            x: URL_SAFE_NO_PAD.encode(public_key.as_bytes()),
        }
    }

    /// Decode `x` back into a verifying key. The JWK must be an OKP/Ed25519
    /// EdDSA key whose `kid` is the hash of `x`.
    pub fn verifying_key(&self) -> AuthResult<VerifyingKey> {
        if self.kty != KTY_OKP || self.crv != CRV_ED25519 || self.alg != ALG_EDDSA {
            return Err(AuthError::InvalidKeyPair);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(self.x.trim_end_matches('='))
            .map_err(|_| AuthError::InvalidKeyPair)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::InvalidKeyPair)?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| AuthError::InvalidKeyPair)?;
        if kid_for(&key) != self.kid {
            return Err(AuthError::InvalidKeyPair);
        }
        Ok(key)
    }
}

impl Jwks {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|jwk| jwk.kid == kid)
    }

    pub fn to_json(&self) -> AuthResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| AuthError::InvalidConfig(err.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> AuthResult<Self> {
        serde_json::from_slice(bytes).map_err(|_| AuthError::InvalidKeyPair)
    }
}
