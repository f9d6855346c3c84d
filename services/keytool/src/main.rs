// Operator CLI for tollgate signing keys: generate/import keys, publish JWKS,
// issue and verify tokens.
mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::KeytoolConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tollgate-keytool")]
#[command(about = "Manage tollgate signing keys and tokens")]
struct Args {
    /// Key file path (overrides TOLLGATE_KEY_PATH)
    #[arg(long, global = true)]
    key_path: Option<PathBuf>,

    /// Token issuer (overrides TOLLGATE_ISSUER)
    #[arg(long, global = true)]
    issuer: Option<String>,

    /// Token lifetime in seconds (overrides TOLLGATE_TOKEN_TTL_SECS)
    #[arg(long, global = true)]
    ttl_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new key pair and write the encrypted key file
    Generate {
        /// Replace an existing key file
        #[arg(long)]
        force: bool,
    },
    /// Print the JWKS for the current key
    Jwks,
    /// Issue a signed token
    Issue {
        #[arg(long)]
        subject: String,

        /// Intended audience; repeat for several
        #[arg(long = "audience", required = true)]
        audience: Vec<String>,

        /// JSON object stored under the `metadata` claim
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Verify a token and print its claims
    Verify {
        token: String,

        /// Verify against a JWKS document instead of the key file
        #[arg(long)]
        jwks: Option<PathBuf>,
    },
    /// Write a key file from a private OKP JWK
    ImportJwk {
        file: PathBuf,

        /// Replace an existing key file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = apply_overrides(KeytoolConfig::from_env_or_yaml()?, &args);
    tracing::debug!(?config, "keytool config loaded");

    let output = match &args.command {
        Command::Generate { force } => {
            let kid = commands::generate(&config, *force)?;
            tracing::info!(%kid, path = %config.key_path.display(), "generated signing key");
            kid
        }
        Command::Jwks => commands::jwks(&config)?,
        Command::Issue {
            subject,
            audience,
            metadata,
        } => commands::issue(&config, subject, audience, metadata.as_deref())?,
        Command::Verify { token, jwks } => commands::verify(&config, token, jwks.as_deref())?,
        Command::ImportJwk { file, force } => {
            let kid = commands::import_jwk(&config, file, *force)?;
            tracing::info!(%kid, path = %config.key_path.display(), "imported signing key");
            kid
        }
    };
    println!("{output}");
    Ok(())
}

fn apply_overrides(mut config: KeytoolConfig, args: &Args) -> KeytoolConfig {
    if let Some(path) = &args.key_path {
        config.key_path = path.clone();
    }
    if let Some(issuer) = &args.issuer {
        config.issuer = issuer.clone();
    }
    if let Some(ttl) = args.ttl_secs {
        config.token_ttl_secs = ttl;
    }
    config
}
