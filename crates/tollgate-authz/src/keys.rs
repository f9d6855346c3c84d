//! Ed25519 signing key material.
//!
//! # Purpose
//! Generate, persist, and reload the single asymmetric key pair a token
//! authority signs with, and derive the `kid` every verifier uses to find the
//! matching public key.
//!
//! # Key invariants
//! - Keys are always Ed25519; anything else is rejected as `InvalidKeyPair`.
//! - `kid` is base64url(SHA-256(public key bytes)) and depends on nothing else,
//!   so every holder of the public key computes the same value.
//! - The private key only leaves memory as an encrypted PKCS#8 document
//!   (PBES2: PBKDF2-HMAC-SHA256 + AES-256-CBC).
//! - Decoding failures never report why they failed; the passphrase and any
//!   partial plaintext stay out of errors and logs.
//!
//! # Key file layout
//! A key file holds two PEM blocks: `PUBLIC KEY` (SPKI) followed by
//! `ENCRYPTED PRIVATE KEY` (PKCS#8). [`load_key_file`] accepts them in either
//! order.
use crate::jwks::PrivateJwk;
use crate::{AuthError, AuthResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{SigningKey, VerifyingKey};
use pkcs8::pkcs5::pbes2;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use pkcs8::{PrivateKeyInfo, SecretDocument};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use zeroize::Zeroizing;

pub const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";
pub const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// PBKDF2 work factor for newly encrypted private keys.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

const ED25519_SEED_LEN: usize = 32;

/// Compute the key identifier for an Ed25519 public key.
pub fn kid_for(public_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(public_key.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// An Ed25519 key pair. The seed is zeroized on drop.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

/// PEM encodings of a key pair, ready to be written to a key file.
#[derive(Clone)]
pub struct KeyBlocks {
    pub public_pem: String,
    pub private_pem: Zeroizing<String>,
}

impl KeyPair {
    /// Draw a fresh key pair from the thread-local CSPRNG (seeded by the OS).
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; ED25519_SEED_LEN]);
        rand::thread_rng().fill_bytes(&mut *seed);
        Self::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; ED25519_SEED_LEN]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn kid(&self) -> String {
        kid_for(&self.public_key())
    }

    #[cfg(test)]
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// PKCS#8 v1 DER of the private key, as `jsonwebtoken` expects for EdDSA.
    pub(crate) fn pkcs8_der(&self) -> AuthResult<SecretDocument> {
        self.signing
            .to_pkcs8_der()
            .map_err(|_| AuthError::InvalidKeyPair)
    }

    pub fn marshal_encrypted(&self, passphrase: &[u8]) -> AuthResult<KeyBlocks> {
        self.marshal_encrypted_with_iterations(passphrase, DEFAULT_PBKDF2_ITERATIONS)
    }

    /// Encode the public key as SPKI PEM and the private key as an encrypted
    /// PKCS#8 PEM. Fails only if encoding itself fails.
    pub fn marshal_encrypted_with_iterations(
        &self,
        passphrase: &[u8],
        iterations: u32,
    ) -> AuthResult<KeyBlocks> {
        let public_pem = self
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| AuthError::InvalidKeyPair)?;

        let der = self.pkcs8_der()?;
        let info = PrivateKeyInfo::try_from(der.as_bytes()).map_err(|_| AuthError::InvalidKeyPair)?;

        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);
        let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(iterations, &salt, &iv)
            .map_err(|_| AuthError::InvalidKeyPair)?;

        let encrypted = info
            .encrypt_with_params(params, passphrase)
            .map_err(|_| AuthError::InvalidKeyPair)?;
        let private_pem = encrypted
            .to_pem(ENCRYPTED_PRIVATE_KEY_LABEL, LineEnding::LF)
            .map_err(|_| AuthError::InvalidKeyPair)?;

        Ok(KeyBlocks {
            public_pem,
            private_pem,
        })
    }

    /// Decrypt an `ENCRYPTED PRIVATE KEY` block. Wrong passphrase, corrupt
    /// data and non-Ed25519 keys all collapse into `InvalidKeyPair`.
    pub fn unmarshal_encrypted(private_pem: &str, passphrase: &[u8]) -> AuthResult<Self> {
        let signing = SigningKey::from_pkcs8_encrypted_pem(private_pem, passphrase)
            .map_err(|_| AuthError::InvalidKeyPair)?;
        Ok(Self { signing })
    }

    /// Import an externally minted OKP/Ed25519 private JWK (RFC 8037).
    pub fn import_jwk(jwk: &PrivateJwk) -> AuthResult<Self> {
        if jwk.crv != "Ed25519" || jwk.kty != "OKP" {
            return Err(AuthError::InvalidKeyPair);
        }
        let d = jwk.d.trim_end_matches('=');
        if d.is_empty() {
            return Err(AuthError::InvalidKeyPair);
        }
        let seed = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(d)
                .map_err(|_| AuthError::InvalidKeyPair)?,
        );
        let seed: &[u8; ED25519_SEED_LEN] = seed
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::InvalidKeyPair)?;
        let pair = Self::from_seed(seed);

        if let Some(x) = jwk.x.as_deref() {
            let expected = URL_SAFE_NO_PAD
                .decode(x.trim_end_matches('='))
                .map_err(|_| AuthError::InvalidKeyPair)?;
            if expected.as_slice() != pair.public_key().as_bytes() {
                return Err(AuthError::InvalidKeyPair);
            }
        }
        Ok(pair)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("kid", &self.kid()).finish()
    }
}

impl KeyBlocks {
    pub fn to_key_file(&self) -> String {
        let mut out = String::with_capacity(self.public_pem.len() + self.private_pem.len() + 1);
        out.push_str(&self.public_pem);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.private_pem);
        out
    }
}

/// Parse a key file produced by [`KeyBlocks::to_key_file`]. Both blocks must
/// be present and the public block must match the decrypted private key.
pub fn load_key_file(contents: &str, passphrase: &[u8]) -> AuthResult<KeyPair> {
    let public_pem = pem_block(contents, PUBLIC_KEY_LABEL).ok_or(AuthError::InvalidKeyPair)?;
    let private_pem = Zeroizing::new(
        pem_block(contents, ENCRYPTED_PRIVATE_KEY_LABEL).ok_or(AuthError::InvalidKeyPair)?,
    );

    let public_key =
        VerifyingKey::from_public_key_pem(&public_pem).map_err(|_| AuthError::InvalidKeyPair)?;
    let pair = KeyPair::unmarshal_encrypted(&private_pem, passphrase)?;
    if pair.public_key() != public_key {
        return Err(AuthError::InvalidKeyPair);
    }
    Ok(pair)
}

pub fn read_key_file(path: impl AsRef<Path>, passphrase: &[u8]) -> AuthResult<KeyPair> {
    let contents = Zeroizing::new(std::fs::read_to_string(path)?);
    load_key_file(&contents, passphrase)
}

/// Generate a key pair and write it to `path` (mode 0600 on unix), replacing
/// any existing file.
pub fn write_key_file(path: impl AsRef<Path>, passphrase: &[u8]) -> AuthResult<KeyPair> {
    let pair = KeyPair::generate();
    save_key_file(&pair, path, passphrase)?;
    Ok(pair)
}

pub fn save_key_file(pair: &KeyPair, path: impl AsRef<Path>, passphrase: &[u8]) -> AuthResult<()> {
    use std::io::Write;

    let blocks = pair.marshal_encrypted(passphrase)?;
    let contents = Zeroizing::new(blocks.to_key_file());

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path.as_ref())?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    tracing::info!(kid = %pair.kid(), path = %path.as_ref().display(), "key file written");
    Ok(())
}

fn pem_block(contents: &str, label: &str) -> Option<String> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let mut current: Option<String> = None;
    for line in contents.lines() {
        let line = line.trim_end();
        if let Some(buf) = current.as_mut() {
            buf.push_str(line);
            buf.push('\n');
            if line == end {
                return current;
            }
            continue;
        }
        if line == begin {
            current = Some(format!("{line}\n"));
        }
    }
    None
}
