use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tollgate_authz::AuthorityConfig;

pub const DEFAULT_ISSUER: &str = "tollgate";
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 900;
pub const DEFAULT_KEY_PATH: &str = "tollgate-key.pem";

// Keytool configuration sourced from environment variables.
#[derive(Clone)]
pub struct KeytoolConfig {
    pub issuer: String,
    pub token_ttl_secs: u64,
    pub key_path: PathBuf,
    passphrase: Option<String>,
}

// No passphrase field: it is only read from the environment.
#[derive(Debug, Deserialize)]
struct KeytoolConfigOverride {
    issuer: Option<String>,
    token_ttl_secs: Option<u64>,
    key_path: Option<PathBuf>,
}

impl KeytoolConfig {
    pub fn new(issuer: impl Into<String>, token_ttl_secs: u64, key_path: impl Into<PathBuf>) -> Self {
        Self {
            issuer: issuer.into(),
            token_ttl_secs,
            key_path: key_path.into(),
            passphrase: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let issuer = std::env::var("TOLLGATE_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string());
        let token_ttl_secs = match std::env::var("TOLLGATE_TOKEN_TTL_SECS") {
            Ok(value) => value
                .parse()
                .with_context(|| "parse TOLLGATE_TOKEN_TTL_SECS")?,
            Err(_) => DEFAULT_TOKEN_TTL_SECS,
        };
        let key_path = std::env::var("TOLLGATE_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_KEY_PATH));
        let config = Self::new(issuer, token_ttl_secs, key_path);
        Ok(match std::env::var("TOLLGATE_KEY_PASSPHRASE") {
            Ok(passphrase) => config.with_passphrase(passphrase),
            Err(_) => config,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("TOLLGATE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read TOLLGATE_CONFIG: {path}"))?;
            let override_cfg: KeytoolConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse keytool config yaml")?;
            if let Some(value) = override_cfg.issuer {
                config.issuer = value;
            }
            if let Some(value) = override_cfg.token_ttl_secs {
                config.token_ttl_secs = value;
            }
            if let Some(value) = override_cfg.key_path {
                config.key_path = value;
            }
        }
        Ok(config)
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn passphrase(&self) -> Result<&[u8]> {
        match self.passphrase.as_deref() {
            Some(value) if !value.is_empty() => Ok(value.as_bytes()),
            _ => bail!("TOLLGATE_KEY_PASSPHRASE must be set for key operations"),
        }
    }

    pub fn authority_config(&self) -> Result<AuthorityConfig> {
        let config = AuthorityConfig::new(
            self.issuer.clone(),
            Duration::from_secs(self.token_ttl_secs),
        );
        config.validate().with_context(|| "validate authority config")?;
        Ok(config)
    }
}

impl std::fmt::Debug for KeytoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeytoolConfig")
            .field("issuer", &self.issuer)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("key_path", &self.key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
