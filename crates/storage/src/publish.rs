//! Publish ingestion: stage an uploaded bundle, then swap it in.
//!
//! A [`PublishSession`] walks these steps, each finished before the next:
//!
//! 1. remove any stale staging directory for the key
//! 2. create the staging directory and its token directory
//! 3. write the upload lock into the live bundle (if any) and staging
//! 4. stream uploaded files into staging
//! 5. drain readers of the live bundle, then swap staging in
//! 6. clear the upload lock from the new live bundle
//!
//! Failures before step 5 leave the live bundle untouched; the live upload
//! lock is removed so readers resume, and staging stays for inspection.
//! A failure at step 6 leaves the new bundle live but locked, which is
//! reported as [`StorageError::LockStranded`] and needs an operator.

use crate::bundle::verify_staged;
use crate::error::{StorageError, StorageResult};
use crate::layout::{confine, ensure_parent};
use crate::locks::{
    LockCoordinator, PublisherGuard, TOKEN_DIR, UPLOAD_LOCK_FILE, clear_upload_lock,
    write_upload_lock,
};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use hatch_core::BundleKey;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Text fields of a publish request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishFields {
    pub name: String,
    pub package_name: String,
    pub platform: String,
    pub runtime_version: String,
    pub release_channel: String,
    pub js_version: Option<String>,
}

impl PublishFields {
    /// Build from raw form fields, sanitising every value first.
    pub fn from_form(raw: &HashMap<String, String>) -> StorageResult<Self> {
        let get = |name: &str| {
            raw.get(name)
                .map(|value| sanitize_field(value))
                .filter(|value| !value.is_empty())
        };
        let required = |name: &str| get(name).ok_or_else(|| StorageError::MissingField(name.to_string()));

        Ok(Self {
            name: required("name")?,
            package_name: required("packageName")?,
            platform: required("platform")?,
            runtime_version: required("runtimeVersion")?,
            release_channel: required("releaseChannel")?,
            js_version: get("jsVersion"),
        })
    }

    /// The bundle this publish replaces.
    pub fn bundle_key(&self) -> StorageResult<BundleKey> {
        Ok(BundleKey::parse(
            Some(&self.release_channel),
            &self.platform,
            &self.runtime_version,
        )?)
    }
}

/// Strip quotes and whitespace from a form value.
pub fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\'' | '"') && !c.is_whitespace())
        .collect()
}

/// Bundle-relative path of an uploaded file part.
///
/// The field name carries the path; a field name ending in `/` names a
/// directory and the part's file name is appended.
pub fn upload_relative_path(field_name: &str, file_name: Option<&str>) -> StorageResult<String> {
    let mut path = field_name.trim_start_matches('/').to_string();
    if path.is_empty() || path.ends_with('/') {
        let file_name = file_name.filter(|f| !f.is_empty()).ok_or_else(|| {
            StorageError::InvalidBundle(format!("file part {field_name:?} has no file name"))
        })?;
        path.push_str(file_name);
    }
    Ok(path)
}

fn check_reserved(relative: &str) -> StorageResult<()> {
    let reserved = Path::new(relative).components().any(|c| match c {
        Component::Normal(name) => name == TOKEN_DIR || name == UPLOAD_LOCK_FILE,
        _ => false,
    });
    if reserved {
        return Err(StorageError::InvalidBundle(format!(
            "reserved file name in upload: {relative}"
        )));
    }
    Ok(())
}

/// Outcome of a committed publish.
#[derive(Clone, Debug)]
pub struct PublishReport {
    pub key: BundleKey,
    pub publish_id: Uuid,
    pub files: usize,
    pub bytes: u64,
    /// Whether a previously live bundle was replaced.
    pub replaced: bool,
    pub drain_wait: Duration,
    pub elapsed: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Staging,
    Swapped,
    Closed,
}

/// One in-flight publish for a bundle key.
///
/// Dropping a session that never reached the swap (e.g. the client went
/// away mid-upload) removes the upload lock from the live bundle.
pub struct PublishSession {
    locks: Arc<LockCoordinator>,
    key: BundleKey,
    publish_id: Uuid,
    staging: PathBuf,
    live: Option<PathBuf>,
    phase: Phase,
    files: usize,
    bytes: u64,
    started: Instant,
    _publisher: PublisherGuard,
}

impl PublishSession {
    /// Run steps 1 to 3.
    #[instrument(skip(locks), fields(key = %key))]
    pub async fn begin(locks: Arc<LockCoordinator>, key: BundleKey) -> StorageResult<Self> {
        let publisher = locks.acquire_publisher(&key).await?;
        let store = locks.store();
        let staging = store.staging_path(&key);
        let publish_id = Uuid::new_v4();

        match fs::remove_dir_all(&staging).await {
            Ok(()) => warn!(staging = %staging.display(), "removed stale staging directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(error = %e, step = "prepare", "failed to remove stale staging directory");
                return Err(e.into());
            }
        }
        if let Err(e) = fs::create_dir_all(staging.join(TOKEN_DIR)).await {
            error!(error = %e, step = "prepare", "failed to create staging directory");
            return Err(e.into());
        }

        let live = store.resolve_live(&key).await?;
        let mut session = Self {
            key,
            publish_id,
            staging,
            live: None,
            phase: Phase::Staging,
            files: 0,
            bytes: 0,
            started: Instant::now(),
            _publisher: publisher,
            locks,
        };

        if let Some(live) = live {
            if let Err(e) = write_upload_lock(&live, publish_id).await {
                error!(error = %e, step = "lock", "failed to lock live bundle");
                return Err(e);
            }
            session.live = Some(live);
        }
        if let Err(e) = write_upload_lock(&session.staging, publish_id).await {
            error!(error = %e, step = "lock", "failed to lock staging directory");
            session.abort().await;
            return Err(e);
        }

        info!(publish_id = %publish_id, replacing = session.live.is_some(), "publish started");
        Ok(session)
    }

    pub fn key(&self) -> &BundleKey {
        &self.key
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Step 4: stream one uploaded file into staging.
    #[instrument(skip(self, body), fields(key = %self.key))]
    pub async fn write_file<S, E>(&mut self, relative: &str, body: S) -> StorageResult<u64>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        check_reserved(relative)?;
        let path = confine(&self.staging, relative).await?;
        ensure_parent(&path).await?;

        let mut file = fs::File::create(&path).await?;
        let mut body = body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.sync_all().await?;

        self.files += 1;
        self.bytes += written;
        Ok(written)
    }

    /// Steps 5 and 6: verify the staged bundle, drain readers, swap it in and
    /// unlock it.
    #[instrument(skip(self), fields(key = %self.key, publish_id = %self.publish_id))]
    pub async fn commit(mut self) -> StorageResult<PublishReport> {
        if let Err(e) = verify_staged(&self.staging, self.key.platform).await {
            warn!(error = %e, step = "verify", "staged bundle rejected");
            self.abort().await;
            return Err(e);
        }

        let drain_wait = match &self.live {
            Some(live) => match self.locks.wait_for_drain(&self.key, live).await {
                Ok(waited) => waited,
                Err(e) => {
                    error!(error = %e, step = "drain", "aborting publish; staging kept");
                    self.abort().await;
                    return Err(e);
                }
            },
            None => Duration::ZERO,
        };

        let store = self.locks.store().clone();
        let release = store.new_release_path(&self.key);
        let moved = match ensure_parent(&release).await {
            Ok(()) => fs::rename(&self.staging, &release).await.map_err(StorageError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = moved {
            error!(error = %e, step = "swap", "failed to move staging into releases");
            self.abort().await;
            return Err(e);
        }

        let previous = match store.point_live_at(&self.key, &release).await {
            Ok(previous) => previous,
            Err(e) => {
                error!(error = %e, step = "swap", "failed to repoint live bundle");
                if let Err(restore) = fs::rename(&release, &self.staging).await {
                    warn!(error = %restore, "failed to move release back to staging");
                }
                self.abort().await;
                return Err(e);
            }
        };
        self.phase = Phase::Swapped;

        if let Some(previous) = &previous {
            retire(previous).await;
        }

        if let Err(e) = clear_upload_lock(&release).await {
            error!(
                error = %e,
                step = "unlock",
                lock = %release.join(UPLOAD_LOCK_FILE).display(),
                "upload lock stranded on live bundle; manual recovery required"
            );
            self.phase = Phase::Closed;
            return Err(StorageError::LockStranded {
                key: self.key.to_string(),
                reason: e.to_string(),
            });
        }
        self.phase = Phase::Closed;

        let report = PublishReport {
            key: self.key.clone(),
            publish_id: self.publish_id,
            files: self.files,
            bytes: self.bytes,
            replaced: previous.is_some(),
            drain_wait,
            elapsed: self.started.elapsed(),
        };
        info!(
            files = report.files,
            bytes = report.bytes,
            replaced = report.replaced,
            drain_ms = report.drain_wait.as_millis() as u64,
            "publish committed"
        );
        Ok(report)
    }

    /// Give up before the swap: unlock the live bundle, keep staging.
    pub async fn abort(&mut self) {
        if self.phase != Phase::Staging {
            return;
        }
        if let Some(live) = &self.live
            && let Err(e) = clear_upload_lock(live).await
        {
            error!(
                error = %e,
                key = %self.key,
                "failed to clear upload lock after aborted publish; manual recovery required"
            );
        }
        self.phase = Phase::Closed;
    }
}

/// Remove a replaced bundle. It is renamed first so readers that resolved it
/// just before the swap see it vanish at once rather than piecemeal.
async fn retire(previous: &Path) {
    let retired = previous.with_extension("retired");
    let target = match fs::rename(previous, &retired).await {
        Ok(()) => retired,
        Err(e) => {
            warn!(error = %e, previous = %previous.display(), "failed to retire replaced bundle");
            previous.to_path_buf()
        }
    };
    if let Err(e) = fs::remove_dir_all(&target).await {
        warn!(error = %e, previous = %target.display(), "failed to remove replaced bundle");
    }
}

impl Drop for PublishSession {
    fn drop(&mut self) {
        if self.phase != Phase::Staging {
            return;
        }
        warn!(key = %self.key, "publish abandoned before swap; unlocking live bundle");
        if let Some(live) = &self.live
            && let Err(e) = std::fs::remove_file(live.join(UPLOAD_LOCK_FILE))
            && e.kind() != std::io::ErrorKind::NotFound
        {
            error!(error = %e, key = %self.key, "failed to clear upload lock; manual recovery required");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ContentStore;
    use crate::locks::{count_tokens, has_upload_lock};
    use futures::stream;
    use hatch_core::config::PublishConfig;
    use hatch_core::metadata::METADATA_FILE;
    use std::convert::Infallible;
    use tempfile::tempdir;

    const DESCRIPTOR: &str =
        r#"{"fileMetadata": {"ios": {"bundle": "bundles/ios.js", "assets": [{"path": "assets/a", "ext": "png"}]}}}"#;

    fn body(data: &'static [u8]) -> impl Stream<Item = Result<Bytes, Infallible>> + Unpin {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    async fn coordinator(root: &Path) -> Arc<LockCoordinator> {
        let store = ContentStore::open(root).await.unwrap();
        let config = PublishConfig {
            poll_interval_secs: 1,
            drain_timeout_secs: 2,
            ..PublishConfig::default()
        };
        Arc::new(LockCoordinator::new(store, &config))
    }

    fn key() -> BundleKey {
        BundleKey::parse(Some("dev"), "ios", "1.0.0").unwrap()
    }

    async fn stage_bundle(session: &mut PublishSession, asset: &'static [u8]) {
        session.write_file(METADATA_FILE, body(DESCRIPTOR.as_bytes())).await.unwrap();
        session.write_file("bundles/ios.js", body(b"launch")).await.unwrap();
        session.write_file("assets/a", body(asset)).await.unwrap();
    }

    #[test]
    fn test_fields_are_sanitised() {
        let raw: HashMap<String, String> = [
            ("name", " 'demo' "),
            ("packageName", "demo"),
            ("platform", "ios\n"),
            ("runtimeVersion", "\"1.0.0\""),
            ("releaseChannel", "dev"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let fields = PublishFields::from_form(&raw).unwrap();
        assert_eq!(fields.name, "demo");
        assert_eq!(fields.runtime_version, "1.0.0");
        assert_eq!(fields.js_version, None);
        assert_eq!(fields.bundle_key().unwrap(), key());

        let mut missing = raw.clone();
        missing.insert("packageName".to_string(), "  ".to_string());
        assert!(matches!(
            PublishFields::from_form(&missing),
            Err(StorageError::MissingField(name)) if name == "packageName"
        ));
    }

    #[test]
    fn test_upload_relative_path() {
        assert_eq!(upload_relative_path("/metadata.json", None).unwrap(), "metadata.json");
        assert_eq!(
            upload_relative_path("/assets/", Some("abc123")).unwrap(),
            "assets/abc123"
        );
        assert_eq!(upload_relative_path("/", Some("expoConfig.json")).unwrap(), "expoConfig.json");
        assert!(upload_relative_path("/assets/", None).is_err());
    }

    #[tokio::test]
    async fn test_first_publish() {
        let temp = tempdir().unwrap();
        let locks = coordinator(temp.path()).await;

        let mut session = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();
        stage_bundle(&mut session, b"png").await;
        let report = session.commit().await.unwrap();
        assert_eq!(report.files, 3);
        assert!(!report.replaced);

        let live = locks.store().resolve_live(&key()).await.unwrap().unwrap();
        assert!(!has_upload_lock(&live).await.unwrap());
        assert_eq!(fs::read(live.join("assets/a")).await.unwrap(), b"png");
        assert!(!locks.store().staging_path(&key()).exists());
    }

    #[tokio::test]
    async fn test_republish_replaces_wholesale() {
        let temp = tempdir().unwrap();
        let locks = coordinator(temp.path()).await;

        let mut first = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();
        stage_bundle(&mut first, b"old").await;
        first.write_file("assets/only-old", body(b"x")).await.unwrap();
        first.commit().await.unwrap();
        let old_dir = locks.store().resolve_live(&key()).await.unwrap().unwrap();

        let mut second = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();
        // Readers are refused as soon as the publish begins.
        assert!(matches!(
            locks.try_acquire_read_token(&key()).await,
            Err(StorageError::UpdateInProgress(_))
        ));
        stage_bundle(&mut second, b"new").await;
        let report = second.commit().await.unwrap();
        assert!(report.replaced);

        let live = locks.store().resolve_live(&key()).await.unwrap().unwrap();
        assert_ne!(live, old_dir);
        assert!(!old_dir.exists());
        assert_eq!(fs::read(live.join("assets/a")).await.unwrap(), b"new");
        assert!(!live.join("assets/only-old").exists());
        assert!(locks.try_acquire_read_token(&key()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_descriptor_leaves_live_untouched() {
        let temp = tempdir().unwrap();
        let locks = coordinator(temp.path()).await;

        let mut first = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();
        stage_bundle(&mut first, b"png").await;
        first.commit().await.unwrap();
        let live = locks.store().resolve_live(&key()).await.unwrap().unwrap();

        let mut broken = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();
        broken.write_file("bundles/ios.js", body(b"launch")).await.unwrap();
        assert!(matches!(broken.commit().await, Err(StorageError::InvalidBundle(_))));

        assert_eq!(locks.store().resolve_live(&key()).await.unwrap(), Some(live.clone()));
        assert!(!has_upload_lock(&live).await.unwrap());
        assert!(locks.store().staging_path(&key()).exists());
    }

    #[tokio::test]
    async fn test_reserved_and_escaping_paths_rejected() {
        let temp = tempdir().unwrap();
        let locks = coordinator(temp.path()).await;
        let mut session = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();

        for bad in [".updateLock", ".lock/x", "assets/.lock", "../escape", "a/../../b"] {
            assert!(session.write_file(bad, body(b"x")).await.is_err(), "accepted {bad:?}");
        }
        assert!(!temp.path().join("dev/ios/.staging/escape").exists());
    }

    #[tokio::test]
    async fn test_dropped_session_unlocks_live() {
        let temp = tempdir().unwrap();
        let locks = coordinator(temp.path()).await;

        let mut first = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();
        stage_bundle(&mut first, b"png").await;
        first.commit().await.unwrap();
        let live = locks.store().resolve_live(&key()).await.unwrap().unwrap();

        let abandoned = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();
        assert!(has_upload_lock(&live).await.unwrap());
        drop(abandoned);
        assert!(!has_upload_lock(&live).await.unwrap());
        assert!(locks.acquire_publisher(&key()).await.is_ok());
    }

    #[tokio::test]
    async fn test_drain_timeout_aborts() {
        let temp = tempdir().unwrap();
        let locks = coordinator(temp.path()).await;

        let mut first = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();
        stage_bundle(&mut first, b"png").await;
        first.commit().await.unwrap();
        let live = locks.store().resolve_live(&key()).await.unwrap().unwrap();

        let reader = locks.try_acquire_read_token(&key()).await.unwrap();
        let mut second = PublishSession::begin(Arc::clone(&locks), key()).await.unwrap();
        stage_bundle(&mut second, b"new").await;
        assert!(matches!(
            second.commit().await,
            Err(StorageError::DrainTimeout { .. })
        ));

        assert_eq!(count_tokens(&live).await.unwrap(), 1);
        drop(reader);
        assert_eq!(locks.store().resolve_live(&key()).await.unwrap(), Some(live.clone()));
        assert!(!has_upload_lock(&live).await.unwrap());
        assert_eq!(fs::read(live.join("assets/a")).await.unwrap(), b"png");
    }
}
