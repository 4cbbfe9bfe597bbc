//! Application state shared across handlers.

use hatch_core::config::AppConfig;
use hatch_signer::ManifestSigner;
use hatch_storage::{AssetResolver, LockCoordinator, StorageResult};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Read tokens, upload locks and publisher exclusion.
    pub locks: Arc<LockCoordinator>,
    pub resolver: AssetResolver,
    /// Manifest signer (optional).
    pub signer: Option<Arc<ManifestSigner>>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        locks: Arc<LockCoordinator>,
        resolver: AssetResolver,
        signer: Option<ManifestSigner>,
    ) -> Self {
        if signer.is_none() {
            tracing::warn!("no signing key configured; signed manifest requests will be rejected");
        }
        Self {
            config: Arc::new(config),
            locks,
            resolver,
            signer: signer.map(Arc::new),
        }
    }

    /// Open the content store named by `config` and build the state around it.
    pub async fn from_config(config: AppConfig, signer: Option<ManifestSigner>) -> StorageResult<Self> {
        let (locks, resolver) = hatch_storage::from_config(&config).await?;
        Ok(Self::new(config, locks, resolver, signer))
    }
}
