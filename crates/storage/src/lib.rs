//! On-disk bundle store for hatch.
//!
//! This crate provides:
//! - Content store addressing and the path confinement guard
//! - Lock coordination between readers and publishers
//! - The publish pipeline that stages and atomically swaps bundles
//! - Bundle loading for manifests and asset resolution

pub mod bundle;
pub mod error;
pub mod layout;
pub mod locks;
pub mod publish;
pub mod resolver;

pub use bundle::{load_contents, read_descriptor, verify_staged};
pub use error::{StorageError, StorageResult};
pub use layout::{ContentStore, confine};
pub use locks::{LockCoordinator, PublisherGuard, ReadToken, TOKEN_DIR, UPLOAD_LOCK_FILE};
pub use publish::{PublishFields, PublishReport, PublishSession, sanitize_field, upload_relative_path};
pub use resolver::{AssetResolver, ResolvedAsset};

use hatch_core::config::AppConfig;
use std::sync::Arc;

/// Open the store and build its coordinator and resolver from configuration.
pub async fn from_config(config: &AppConfig) -> StorageResult<(Arc<LockCoordinator>, AssetResolver)> {
    let store = ContentStore::open(&config.storage.root).await?;
    let locks = Arc::new(LockCoordinator::new(store.clone(), &config.publish));
    Ok((locks, AssetResolver::new(store)))
}
