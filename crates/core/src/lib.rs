//! Core domain types for the hatch update server.
//!
//! This crate defines the data model shared by the storage, signer and
//! server crates:
//! - Bundle addressing (release channel, platform, runtime version)
//! - Content hashes and their manifest renderings
//! - Bundle metadata descriptors as written by the bundler
//! - Manifest and asset descriptors served to clients
//! - Server configuration

pub mod bundle;
pub mod config;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod metadata;

pub use bundle::{BundleKey, DEFAULT_RELEASE_CHANNEL, Platform, ReleaseChannel, RuntimeVersion};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use manifest::{AssetDescriptor, Manifest, ManifestExtra};
pub use metadata::{
    AssetEntry, AssetRole, BundleContents, HashedFile, MetadataDescriptor, PlatformMetadata,
};

/// Content type every launch asset is served with, whatever its extension.
pub const LAUNCH_ASSET_CONTENT_TYPE: &str = "application/javascript";
