//! Content store layout and path confinement.
//!
//! ```text
//! <root>/<channel>/<platform>/
//!     <runtime_version>                  -> .releases/<runtime_version>/<id>
//!     .releases/<runtime_version>/<id>/  immutable bundle directories
//!     .staging/<runtime_version>/        upload in progress
//!     .publish/<runtime_version>.lock    publisher lock file
//! ```
//!
//! Key segments never start with `.`, so no runtime version can address the
//! hidden directories or the files inside them.
//!
//! The live path is a symlink to an immutable release directory. Publishing
//! renames a freshly created symlink over it, so readers resolve either the
//! old or the new release and never a mixture. A live path that is still a
//! plain directory is accepted for reads and moved under `.releases` on its
//! first replacement.

use crate::error::{StorageError, StorageResult};
use hatch_core::BundleKey;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";
const RELEASES_DIR: &str = ".releases";
const PUBLISH_LOCK_DIR: &str = ".publish";

/// Directory tree holding one live bundle per [`BundleKey`].
#[derive(Clone, Debug)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await?;
        let root = fs::canonicalize(root).await?;
        Ok(Self { root })
    }

    /// Canonical store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every bundle of the key's channel and platform.
    pub fn platform_dir(&self, key: &BundleKey) -> PathBuf {
        self.root.join(key.platform_dir())
    }

    /// Path clients are served from.
    pub fn live_path(&self, key: &BundleKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Staging directory for an upload, distinct from the live path.
    pub fn staging_path(&self, key: &BundleKey) -> PathBuf {
        self.platform_dir(key)
            .join(STAGING_DIR)
            .join(key.runtime_version.as_str())
    }

    /// File locked by the single publisher allowed per key.
    pub fn publisher_lock_path(&self, key: &BundleKey) -> PathBuf {
        self.platform_dir(key)
            .join(PUBLISH_LOCK_DIR)
            .join(format!("{}.lock", key.runtime_version))
    }

    /// Fresh immutable release directory path for a key.
    pub fn new_release_path(&self, key: &BundleKey) -> PathBuf {
        self.platform_dir(key)
            .join(RELEASES_DIR)
            .join(key.runtime_version.as_str())
            .join(Uuid::new_v4().to_string())
    }

    /// Resolve the live path to the canonical bundle directory it currently
    /// designates. `None` when nothing was ever published for the key.
    ///
    /// Callers pin the returned directory for the rest of a request, so a
    /// concurrent swap cannot change which bundle they read from.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn resolve_live(&self, key: &BundleKey) -> StorageResult<Option<PathBuf>> {
        let live = self.live_path(key);
        let dir = match fs::canonicalize(&live).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if !dir.starts_with(&self.root) {
            return Err(StorageError::InvalidPath(format!(
                "live bundle escapes storage root: {key}"
            )));
        }
        if !fs::metadata(&dir).await?.is_dir() {
            return Err(StorageError::InvalidPath(format!(
                "live bundle is not a directory: {key}"
            )));
        }
        Ok(Some(dir))
    }

    /// Atomically point the live path of `key` at `release`.
    ///
    /// Returns the directory that was live before, if any.
    #[instrument(skip(self, release), fields(key = %key))]
    pub async fn point_live_at(&self, key: &BundleKey, release: &Path) -> StorageResult<Option<PathBuf>> {
        let live = self.live_path(key);
        let platform_dir = self.platform_dir(key);
        let target = release
            .strip_prefix(&platform_dir)
            .map_err(|_| {
                StorageError::InvalidPath(format!(
                    "release {} is outside {}",
                    release.display(),
                    platform_dir.display()
                ))
            })?
            .to_path_buf();

        let mut moved_aside = None;
        let previous = match fs::symlink_metadata(&live).await {
            Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(&live).await {
                Ok(dir) => Some(dir),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %live.display(), "replacing dangling live symlink");
                    None
                }
                Err(e) => return Err(e.into()),
            },
            Ok(meta) if meta.is_dir() => {
                let aside = self.new_release_path(key);
                ensure_parent(&aside).await?;
                fs::rename(&live, &aside).await?;
                debug!(aside = %aside.display(), "moved plain live directory under releases");
                moved_aside = Some(aside.clone());
                Some(aside)
            }
            Ok(_) => {
                return Err(StorageError::InvalidPath(format!(
                    "live path is not a directory: {key}"
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let tmp = platform_dir.join(format!(".{}.{}.tmp", key.runtime_version, Uuid::new_v4()));
        let swapped = match fs::symlink(&target, &tmp).await {
            Ok(()) => fs::rename(&tmp, &live).await,
            Err(e) => Err(e),
        };
        if let Err(e) = swapped {
            let _ = fs::remove_file(&tmp).await;
            if let Some(aside) = moved_aside
                && let Err(restore) = fs::rename(&aside, &live).await
            {
                warn!(error = %restore, "failed to restore plain live directory");
            }
            return Err(e.into());
        }

        Ok(previous)
    }

    /// Verify the store root is still reachable.
    pub async fn health_check(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(StorageError::InvalidPath(format!(
                "storage root is not a directory: {}",
                self.root.display()
            )));
        }
        fs::read_dir(&self.root).await?;
        Ok(())
    }
}

pub(crate) async fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Join `relative` onto `base`, refusing anything that would land outside
/// `base`.
///
/// Async wrapper around [`confine_sync`] that keeps `canonicalize` and
/// `symlink_metadata` off the runtime threads.
pub async fn confine(base: &Path, relative: &str) -> StorageResult<PathBuf> {
    let base = base.to_path_buf();
    let relative = relative.to_string();
    tokio::task::spawn_blocking(move || confine_sync(&base, &relative))
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
}

/// Synchronous path confinement with symlink protection.
pub fn confine_sync(base: &Path, relative: &str) -> StorageResult<PathBuf> {
    if relative.is_empty() || relative.starts_with('/') || relative.contains('\\') {
        return Err(StorageError::InvalidPath(format!(
            "path must be relative: {relative}"
        )));
    }
    for component in Path::new(relative).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(StorageError::InvalidPath(format!(
                "contains unsafe path component: {relative}"
            )));
        }
    }

    let path = base.join(relative);
    let base_canonical = base.canonicalize()?;

    // Existing paths (and symlinks, even broken ones) must resolve inside base.
    match std::fs::symlink_metadata(&path) {
        Ok(meta) => {
            let canonical = path.canonicalize().map_err(|e| {
                if meta.file_type().is_symlink() {
                    StorageError::InvalidPath(format!("symlink target missing or invalid: {relative}"))
                } else {
                    StorageError::Io(e)
                }
            })?;
            if !canonical.starts_with(&base_canonical) {
                return Err(StorageError::InvalidPath(format!(
                    "resolved path escapes bundle root: {relative}"
                )));
            }
            return Ok(path);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    // New paths: the nearest existing ancestor must be inside base.
    let mut ancestor = path.as_path();
    while let Some(parent) = ancestor.parent() {
        match std::fs::symlink_metadata(parent) {
            Ok(meta) => {
                let parent_canonical = parent.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidPath(format!(
                            "ancestor symlink target missing or invalid: {relative}"
                        ))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                if !parent_canonical.starts_with(&base_canonical) {
                    return Err(StorageError::InvalidPath(format!(
                        "ancestor path escapes bundle root: {relative}"
                    )));
                }
                break;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        ancestor = parent;
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key() -> BundleKey {
        BundleKey::parse(Some("dev"), "ios", "1.0.0").unwrap()
    }

    #[tokio::test]
    async fn test_paths_are_distinct() {
        let temp = tempdir().unwrap();
        let store = ContentStore::open(temp.path().join("updates")).await.unwrap();
        let key = key();

        let live = store.live_path(&key);
        let staging = store.staging_path(&key);
        assert!(live.ends_with("dev/ios/1.0.0"));
        assert!(staging.ends_with("dev/ios/.staging/1.0.0"));
        assert_ne!(store.new_release_path(&key), store.new_release_path(&key));
        assert!(store.publisher_lock_path(&key).ends_with("dev/ios/.publish/1.0.0.lock"));
    }

    #[tokio::test]
    async fn test_lock_files_never_alias_staging() {
        let temp = tempdir().unwrap();
        let store = ContentStore::open(temp.path()).await.unwrap();
        let plain = key();
        let suffixed = BundleKey::parse(Some("dev"), "ios", "1.0.0.publish").unwrap();
        let dotted_lock = BundleKey::parse(Some("dev"), "ios", "1.0.0.lock").unwrap();

        for other in [&suffixed, &dotted_lock] {
            for path in [
                store.live_path(other),
                store.staging_path(other),
                store.publisher_lock_path(other),
            ] {
                assert_ne!(path, store.publisher_lock_path(&plain));
            }
        }
    }

    #[tokio::test]
    async fn test_point_live_at_swaps_symlink() {
        let temp = tempdir().unwrap();
        let store = ContentStore::open(temp.path()).await.unwrap();
        let key = key();
        assert!(store.resolve_live(&key).await.unwrap().is_none());

        let first = store.new_release_path(&key);
        fs::create_dir_all(&first).await.unwrap();
        assert!(store.point_live_at(&key, &first).await.unwrap().is_none());
        assert_eq!(store.resolve_live(&key).await.unwrap(), Some(first.clone()));

        let second = store.new_release_path(&key);
        fs::create_dir_all(&second).await.unwrap();
        let previous = store.point_live_at(&key, &second).await.unwrap();
        assert_eq!(previous, Some(first));
        assert_eq!(store.resolve_live(&key).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_plain_live_directory_is_moved_aside() {
        let temp = tempdir().unwrap();
        let store = ContentStore::open(temp.path()).await.unwrap();
        let key = key();
        let live = store.live_path(&key);
        fs::create_dir_all(&live).await.unwrap();
        fs::write(live.join("metadata.json"), b"{}").await.unwrap();

        let release = store.new_release_path(&key);
        fs::create_dir_all(&release).await.unwrap();
        let previous = store.point_live_at(&key, &release).await.unwrap().unwrap();

        assert!(previous.join("metadata.json").exists());
        assert_eq!(store.resolve_live(&key).await.unwrap(), Some(release));
    }

    #[test]
    fn test_confine_rejects_traversal() {
        let temp = tempdir().unwrap();
        let base = temp.path().join("bundle");
        std::fs::create_dir_all(base.join("assets")).unwrap();

        for bad in ["../secret", "assets/../../x", "/etc/passwd", "", "a\\..\\b", "./x"] {
            assert!(
                matches!(confine_sync(&base, bad), Err(StorageError::InvalidPath(_))),
                "accepted {bad:?}"
            );
        }
        assert_eq!(
            confine_sync(&base, "assets/new/file.png").unwrap(),
            base.join("assets/new/file.png")
        );
    }

    #[test]
    fn test_confine_rejects_symlink_escape() {
        let temp = tempdir().unwrap();
        let base = temp.path().join("bundle");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(&outside, base.join("link")).unwrap();

        assert!(confine_sync(&base, "link/secret").is_err());
        assert!(confine_sync(&base, "link/new/file").is_err());
    }
}
