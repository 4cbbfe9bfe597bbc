//! Manifest and asset descriptors served to update clients.

use crate::LAUNCH_ASSET_CONTENT_TYPE;
use crate::bundle::BundleKey;
use crate::metadata::{BundleContents, HashedFile};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Content type for an asset extension (with or without the leading dot).
///
/// Unknown extensions fall back to `application/octet-stream`.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "js" | "mjs" | "cjs" | "bundle" => "application/javascript",
        "hbc" => "application/javascript",
        "json" => "application/json",
        "map" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "db" | "sqlite" => "application/vnd.sqlite3",
        _ => "application/octet-stream",
    }
}

/// Build the download URL for a bundle-relative asset path.
pub fn asset_url(public_url: &str, key: &BundleKey, path: &str) -> String {
    let encode = |s: &str| utf8_percent_encode(s, NON_ALPHANUMERIC).to_string();
    format!(
        "{}/assets?asset={}&runtimeVersion={}&platform={}&releaseChannel={}",
        public_url.trim_end_matches('/'),
        encode(path.trim_start_matches('/')),
        encode(key.runtime_version.as_str()),
        key.platform.as_str(),
        encode(key.channel.as_str()),
    )
}

/// Descriptor of one downloadable file in a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    /// Base64url SHA-256 of the file.
    pub hash: String,
    /// Stable cache key derived from the content hash.
    pub key: String,
    /// Extension with a leading dot; absent for the launch asset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_extension: Option<String>,
    pub content_type: String,
    pub url: String,
    #[serde(skip)]
    pub is_launch_asset: bool,
}

impl AssetDescriptor {
    /// Describe a regular asset.
    pub fn asset(file: &HashedFile, url: String) -> Self {
        let ext = file.ext.as_deref().unwrap_or_default().trim_start_matches('.');
        Self {
            hash: file.hash.to_base64url(),
            key: file.hash.asset_key(),
            file_extension: Some(format!(".{ext}")),
            content_type: content_type_for_extension(ext).to_string(),
            url,
            is_launch_asset: false,
        }
    }

    /// Describe the launch asset. Its content type is always the executable
    /// script type, whatever its extension.
    pub fn launch(file: &HashedFile, url: String) -> Self {
        Self {
            hash: file.hash.to_base64url(),
            key: file.hash.asset_key(),
            file_extension: None,
            content_type: LAUNCH_ASSET_CONTENT_TYPE.to_string(),
            url,
            is_launch_asset: true,
        }
    }
}

/// Free-form manifest extras.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ManifestExtra {
    #[serde(rename = "expoClient", skip_serializing_if = "Option::is_none")]
    pub app_config: Option<serde_json::Value>,
}

/// The manifest served for a bundle.
///
/// Field order is part of the wire format: signatures cover the exact
/// serialized bytes, so the struct is serialized once and those bytes are
/// both signed and sent.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: Uuid,
    pub created_at: String,
    pub runtime_version: String,
    pub assets: Vec<AssetDescriptor>,
    pub launch_asset: AssetDescriptor,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub extra: ManifestExtra,
}

impl Manifest {
    /// Assemble the manifest for `key` from freshly loaded bundle contents.
    pub fn build(key: &BundleKey, contents: &BundleContents, public_url: &str) -> crate::Result<Self> {
        let created_at = contents
            .created_at
            .format(&Rfc3339)
            .map_err(|e| crate::Error::Serialization(e.to_string()))?;

        let assets = contents
            .assets
            .iter()
            .map(|file| AssetDescriptor::asset(file, asset_url(public_url, key, &file.path)))
            .collect();
        let launch_asset = AssetDescriptor::launch(
            &contents.launch,
            asset_url(public_url, key, &contents.launch.path),
        );

        Ok(Self {
            id: contents.content_id.to_uuid(),
            created_at,
            runtime_version: key.runtime_version.to_string(),
            assets,
            launch_asset,
            metadata: serde_json::Map::new(),
            extra: ManifestExtra {
                app_config: contents.app_config.clone(),
            },
        })
    }

    /// Serialize to the JSON bytes that are signed and served.
    pub fn to_json_bytes(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Every asset descriptor, launch asset last.
    pub fn all_assets(&self) -> impl Iterator<Item = &AssetDescriptor> {
        self.assets.iter().chain(std::iter::once(&self.launch_asset))
    }
}
