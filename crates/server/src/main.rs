//! hatch server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hatch_core::config::{AppConfig, PrivateKeyConfig, SigningConfig};
use hatch_server::{AppState, create_router};
use hatch_signer::{ManifestSigner, PrivateKey};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// hatch - an over-the-air update server for mobile app bundles
#[derive(Parser, Debug)]
#[command(name = "hatchd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "HATCH_CONFIG", default_value = "config/server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("hatch v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; HATCH_ environment variables override it.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(
            config_path = %args.config,
            "No config file found, using defaults and environment variables"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("HATCH_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    hatch_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let (locks, resolver) = hatch_storage::from_config(&config)
        .await
        .context("failed to open content store")?;
    locks
        .store()
        .health_check()
        .await
        .context("content store health check failed")?;
    tracing::info!(root = %locks.store().root().display(), "Content store ready");

    let signer = match &config.signing {
        Some(signing_config) => Some(load_signer(signing_config).await?),
        None => None,
    };

    let state = AppState::new(config.clone(), locks, resolver, signer);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Load the manifest signer from configuration.
async fn load_signer(config: &SigningConfig) -> Result<ManifestSigner> {
    match &config.private_key {
        PrivateKeyConfig::File { path } => {
            let pem = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read key file: {}", path.display()))?;
            let signer = ManifestSigner::from_pem(&pem, &config.key_id)
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key: {}", signer.key_id());
            Ok(signer)
        }
        PrivateKeyConfig::Env { var } => {
            let pem = std::env::var(var)
                .with_context(|| format!("signing key env var not set: {var}"))?;
            let signer = ManifestSigner::from_pem(&pem, &config.key_id)
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key from env: {}", signer.key_id());
            Ok(signer)
        }
        PrivateKeyConfig::Generate => {
            tracing::warn!("Generating ephemeral signing key (not suitable for production)");
            let key_id = config.key_id.clone();
            let key = tokio::task::spawn_blocking(PrivateKey::generate)
                .await
                .context("key generation task failed")?
                .context("failed to generate signing key")?;
            let signer = ManifestSigner::new(key, key_id);
            let public_pem = signer
                .public_key()
                .to_pem()
                .context("failed to encode public key")?;
            tracing::info!("Generated signing key: {}", signer.key_id());
            tracing::info!("Public key:\n{}", public_pem);
            Ok(signer)
        }
        PrivateKeyConfig::Value { key } => {
            tracing::warn!("Using inline signing key (not recommended for production)");
            let signer = ManifestSigner::from_pem(key, &config.key_id)
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key: {}", signer.key_id());
            Ok(signer)
        }
    }
}
