//! Asset lookup within the live bundle.

use crate::bundle::read_descriptor;
use crate::error::{StorageError, StorageResult, not_found_or_io};
use crate::layout::{ContentStore, confine};
use hatch_core::manifest::content_type_for_extension;
use hatch_core::{AssetRole, BundleKey, LAUNCH_ASSET_CONTENT_TYPE};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// An opened asset file and the content type to serve it with.
///
/// The file handle keeps the asset readable even if a publish retires its
/// release while the body is still streaming.
#[derive(Debug)]
pub struct ResolvedAsset {
    pub file: fs::File,
    pub len: u64,
    pub content_type: &'static str,
}

impl ResolvedAsset {
    /// Stream the file contents in chunks.
    pub fn into_stream(self) -> ReaderStream<fs::File> {
        ReaderStream::new(self.file)
    }
}

/// Resolves asset paths against the live bundle of a key.
#[derive(Clone, Debug)]
pub struct AssetResolver {
    store: ContentStore,
}

impl AssetResolver {
    pub fn new(store: ContentStore) -> Self {
        Self { store }
    }

    /// Resolve `asset_path` inside the live bundle of `key`.
    ///
    /// Errors:
    /// - [`StorageError::InvalidPath`] for anything escaping the bundle root
    /// - [`StorageError::NotFound`] when the file or bundle is absent
    /// - [`StorageError::MetadataCorrupt`] when the file exists but the
    ///   descriptor does not list it
    #[instrument(skip(self), fields(key = %key))]
    pub async fn resolve(&self, key: &BundleKey, asset_path: &str) -> StorageResult<ResolvedAsset> {
        let bundle_dir = self
            .store
            .resolve_live(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("no bundle published for {key}")))?;

        let relative = asset_path.trim_start_matches('/');
        let path = confine(&bundle_dir, relative).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, relative))?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(relative.to_string()));
        }

        let (_, descriptor) = read_descriptor(&bundle_dir).await?;
        let entry = descriptor
            .platform(key.platform)
            .map_err(|e| StorageError::MetadataCorrupt(e.to_string()))?;
        let content_type = match entry.lookup(relative) {
            Some(AssetRole::Launch) => LAUNCH_ASSET_CONTENT_TYPE,
            Some(AssetRole::Asset(asset)) => content_type_for_extension(&asset.ext),
            None => {
                return Err(StorageError::MetadataCorrupt(format!(
                    "{relative} exists in {key} but is not listed in its descriptor"
                )));
            }
        };

        Ok(ResolvedAsset {
            file,
            len: meta.len(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use hatch_core::metadata::METADATA_FILE;
    use tempfile::tempdir;

    async fn read_all(asset: ResolvedAsset) -> Vec<u8> {
        let chunks: Vec<_> = asset.into_stream().try_collect().await.unwrap();
        chunks.concat()
    }

    async fn setup() -> (tempfile::TempDir, AssetResolver, BundleKey) {
        let temp = tempdir().unwrap();
        let store = ContentStore::open(temp.path().join("root")).await.unwrap();
        let key = BundleKey::parse(None, "ios", "1.0.0").unwrap();

        let release = store.new_release_path(&key);
        fs::create_dir_all(release.join("bundles")).await.unwrap();
        fs::create_dir_all(release.join("assets")).await.unwrap();
        fs::write(
            release.join(METADATA_FILE),
            r#"{"fileMetadata": {"ios": {"bundle": "bundles/ios.hbc",
                "assets": [{"path": "assets/f1", "ext": "ttf"}]}}}"#,
        )
        .await
        .unwrap();
        fs::write(release.join("bundles/ios.hbc"), b"bytecode").await.unwrap();
        fs::write(release.join("assets/f1"), b"font").await.unwrap();
        fs::write(release.join("assets/stray"), b"?").await.unwrap();
        store.point_live_at(&key, &release).await.unwrap();

        fs::write(temp.path().join("secret"), b"top secret").await.unwrap();
        (temp, AssetResolver::new(store), key)
    }

    #[tokio::test]
    async fn test_resolve_content_types() {
        let (_temp, resolver, key) = setup().await;

        let font = resolver.resolve(&key, "assets/f1").await.unwrap();
        assert_eq!(font.content_type, "font/ttf");
        assert_eq!(font.len, 4);
        assert_eq!(read_all(font).await, b"font");

        let launch = resolver.resolve(&key, "/bundles/ios.hbc").await.unwrap();
        assert_eq!(launch.content_type, LAUNCH_ASSET_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_missing_vs_unlisted() {
        let (_temp, resolver, key) = setup().await;
        assert!(matches!(
            resolver.resolve(&key, "assets/nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            resolver.resolve(&key, "assets/stray").await,
            Err(StorageError::MetadataCorrupt(_))
        ));
        assert!(matches!(
            resolver.resolve(&key, "assets").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_asset_survives_release_removal() {
        let (_temp, resolver, key) = setup().await;
        let launch = resolver.resolve(&key, "bundles/ios.hbc").await.unwrap();

        let release = resolver.store.resolve_live(&key).await.unwrap().unwrap();
        fs::remove_dir_all(&release).await.unwrap();

        assert_eq!(read_all(launch).await, b"bytecode");
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_temp, resolver, key) = setup().await;
        for path in ["../../../../secret", "assets/../../secret", "/../secret"] {
            assert!(
                matches!(resolver.resolve(&key, path).await, Err(StorageError::InvalidPath(_))),
                "resolved {path:?}"
            );
        }
    }
}
