//! Bundle metadata descriptors.
//!
//! Every bundle directory carries exactly one `metadata.json`, written by the
//! bundler export step and never modified afterwards. It lists, per platform,
//! the launch file and the assets that make up the update.

use crate::bundle::Platform;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// File name of the metadata descriptor inside a bundle directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Optional app configuration shipped next to the descriptor, surfaced to
/// clients as `extra.expoClient`.
pub const APP_CONFIG_FILE: &str = "expoConfig.json";

/// The parsed `metadata.json` descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDescriptor {
    /// Descriptor format version.
    #[serde(default)]
    pub version: u32,
    /// Bundler that produced the export (e.g. "metro").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundler: Option<String>,
    /// Per-platform launch file and asset lists, keyed by platform name.
    pub file_metadata: BTreeMap<String, PlatformMetadata>,
}

/// Launch file and assets for one platform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlatformMetadata {
    /// Bundle-relative path of the launch file.
    pub bundle: String,
    /// Bundle-relative asset paths with their extensions.
    #[serde(default)]
    pub assets: Vec<AssetEntry>,
}

/// One asset listed in the descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub path: String,
    pub ext: String,
}

/// How a bundle-relative path is referenced by the descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetRole<'a> {
    /// The platform's launch file.
    Launch,
    /// A regular asset with its declared extension.
    Asset(&'a AssetEntry),
}

impl MetadataDescriptor {
    /// Parse a descriptor from raw JSON bytes.
    pub fn from_json(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::Metadata(e.to_string()))
    }

    /// Entry for a platform, or an error if the bundle was not exported for it.
    pub fn platform(&self, platform: Platform) -> crate::Result<&PlatformMetadata> {
        self.file_metadata.get(platform.as_str()).ok_or_else(|| {
            crate::Error::Metadata(format!("no file metadata for platform {platform}"))
        })
    }
}

impl PlatformMetadata {
    /// Look up how `path` is referenced. Leading slashes are ignored on both
    /// sides so `/assets/x` and `assets/x` name the same file.
    pub fn lookup(&self, path: &str) -> Option<AssetRole<'_>> {
        let path = normalize(path);
        if normalize(&self.bundle) == path {
            return Some(AssetRole::Launch);
        }
        self.assets
            .iter()
            .find(|asset| normalize(&asset.path) == path)
            .map(AssetRole::Asset)
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// A file of the bundle together with its content hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashedFile {
    /// Bundle-relative path as listed in the descriptor.
    pub path: String,
    /// Declared extension (`None` for the launch file).
    pub ext: Option<String>,
    pub hash: ContentHash,
}

/// Everything the manifest builder needs to know about one platform's view of
/// a bundle, loaded fresh for every request.
#[derive(Clone, Debug)]
pub struct BundleContents {
    /// Digest over the descriptor bytes and every referenced file's hash.
    pub content_id: ContentHash,
    /// Modification time of the descriptor.
    pub created_at: OffsetDateTime,
    pub launch: HashedFile,
    pub assets: Vec<HashedFile>,
    /// Contents of `expoConfig.json`, when the bundle ships one.
    pub app_config: Option<serde_json::Value>,
}

impl BundleContents {
    /// Derive the bundle content id from the raw descriptor and the hashes of
    /// the launch file and assets, in descriptor order.
    ///
    /// Identical bundles produce identical ids; changing any referenced file
    /// changes the id even when the descriptor itself is unchanged.
    pub fn content_id(descriptor_bytes: &[u8], launch: &ContentHash, assets: &[HashedFile]) -> ContentHash {
        let mut hasher = ContentHash::hasher();
        hasher.update(descriptor_bytes);
        hasher.update(launch.as_bytes());
        for asset in assets {
            hasher.update(asset.hash.as_bytes());
        }
        hasher.finalize()
    }
}
