use crate::config::KeytoolConfig;
use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use tollgate_authz::{
    DefaultClaims, Jwks, KeyPair, KeySet, PrivateJwk, TokenAuthority, TokenVerifier,
    read_key_file, save_key_file,
};

/// Generate a key pair and write it to the configured key file. Returns the kid.
pub fn generate(config: &KeytoolConfig, force: bool) -> Result<String> {
    refuse_overwrite(&config.key_path, force)?;
    let pair = KeyPair::generate();
    save_key_file(&pair, &config.key_path, config.passphrase()?)
        .with_context(|| format!("write key file {}", config.key_path.display()))?;
    Ok(pair.kid())
}

/// Import a private OKP JWK and write it to the configured key file. Returns the kid.
pub fn import_jwk(config: &KeytoolConfig, jwk_path: &Path, force: bool) -> Result<String> {
    refuse_overwrite(&config.key_path, force)?;
    let contents = std::fs::read(jwk_path)
        .with_context(|| format!("read jwk {}", jwk_path.display()))?;
    let jwk: PrivateJwk = serde_json::from_slice(&contents).with_context(|| "parse jwk")?;
    let pair = KeyPair::import_jwk(&jwk).with_context(|| "import jwk")?;
    save_key_file(&pair, &config.key_path, config.passphrase()?)
        .with_context(|| format!("write key file {}", config.key_path.display()))?;
    Ok(pair.kid())
}

pub fn jwks(config: &KeytoolConfig) -> Result<String> {
    let authority = load_authority(config)?;
    let jwks = authority.publish_jwks();
    serde_json::to_string_pretty(&jwks).with_context(|| "encode jwks")
}

pub fn issue(
    config: &KeytoolConfig,
    subject: &str,
    audience: &[String],
    metadata: Option<&str>,
) -> Result<String> {
    let claims = match metadata {
        Some(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(raw).with_context(|| "parse --metadata json")?;
            DefaultClaims::with_metadata(&value).with_context(|| "build metadata claims")?
        }
        None => DefaultClaims::default(),
    };
    let authority = load_authority(config)?;
    let issued = authority
        .issue_token(subject, audience.iter().cloned(), claims)
        .with_context(|| "issue token")?;
    tracing::info!(kid = %authority.kid(), %subject, "token issued");
    Ok(issued.token)
}

/// Verify a token and return its claims as JSON. Keys come from `jwks_path`
/// when given, otherwise from the configured key file.
///
/// Rejections only carry the opaque message; the detail goes to the debug log.
pub fn verify(config: &KeytoolConfig, token: &str, jwks_path: Option<&Path>) -> Result<String> {
    let keys = match jwks_path {
        Some(path) => {
            let contents =
                std::fs::read(path).with_context(|| format!("read jwks {}", path.display()))?;
            let jwks = Jwks::from_json(&contents).with_context(|| "parse jwks")?;
            KeySet::from_jwks(&jwks).with_context(|| "load jwks keys")?
        }
        None => load_authority(config)?.key_set(),
    };

    let claims: DefaultClaims = TokenVerifier::new()
        .with_issuer(config.issuer.clone())
        .validate(token, &keys)
        .map_err(|err| {
            tracing::debug!(error = %err, "verification failed");
            anyhow!(err.opaque_message())
        })?;
    serde_json::to_string_pretty(&claims).with_context(|| "encode claims")
}

fn load_authority(config: &KeytoolConfig) -> Result<TokenAuthority> {
    let pair = read_key_file(&config.key_path, config.passphrase()?)
        .with_context(|| format!("read key file {}", config.key_path.display()))?;
    TokenAuthority::new(config.authority_config()?, pair).with_context(|| "build authority")
}

fn refuse_overwrite(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to replace it", path.display());
    }
    Ok(())
}
