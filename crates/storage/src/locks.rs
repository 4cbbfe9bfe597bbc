//! On-disk coordination between readers and publishers.
//!
//! Every bundle directory may hold:
//! - `.lock/`: one empty file per in-flight read (a read token)
//! - `.updateLock`: present while a publish is staging or swapping
//!
//! Both live on disk so replicas sharing the store observe each other. The
//! publisher waits for `.lock/` to empty before replacing a bundle; readers
//! refuse to start while `.updateLock` exists. A reader re-checks the upload
//! lock after registering its token: either the publisher's drain scan sees
//! the token, or the reader sees the lock.

use crate::error::{StorageError, StorageResult};
use crate::layout::{ContentStore, ensure_parent};
use fs4::FileExt;
use hatch_core::BundleKey;
use hatch_core::config::PublishConfig;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Read-token directory inside a bundle.
pub const TOKEN_DIR: &str = ".lock";

/// Upload lock marker inside a bundle.
pub const UPLOAD_LOCK_FILE: &str = ".updateLock";

/// Coordinates read tokens, upload locks and publisher exclusion.
pub struct LockCoordinator {
    store: ContentStore,
    released: Arc<Notify>,
    poll_interval: Duration,
    drain_timeout: Option<Duration>,
}

impl LockCoordinator {
    pub fn new(store: ContentStore, config: &PublishConfig) -> Self {
        Self {
            store,
            released: Arc::new(Notify::new()),
            poll_interval: config.poll_interval(),
            drain_timeout: config.drain_timeout(),
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Register an in-flight read of the live bundle for `key`.
    ///
    /// Refused with [`StorageError::UpdateInProgress`] while an upload lock
    /// is active, and with [`StorageError::NotFound`] when nothing is
    /// published. Token I/O failures are logged and tolerated: the read
    /// proceeds untracked.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn try_acquire_read_token(&self, key: &BundleKey) -> StorageResult<ReadToken> {
        let bundle_dir = self
            .store
            .resolve_live(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("no bundle published for {key}")))?;

        if has_upload_lock(&bundle_dir).await? {
            return Err(StorageError::UpdateInProgress(key.to_string()));
        }

        let token_path = match create_token(&bundle_dir).await {
            Ok(path) => Some(path),
            // The release was swapped out and removed after we resolved it.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::UpdateInProgress(key.to_string()));
            }
            Err(e) => {
                warn!(error = %e, bundle = %bundle_dir.display(), "failed to create read token");
                None
            }
        };

        let token = ReadToken {
            bundle_dir,
            token_path,
            released: Arc::clone(&self.released),
        };

        // A publish may have locked, or already replaced, the bundle between
        // the check and the token write. Dropping the token wakes its drain.
        match still_readable(&token.bundle_dir).await {
            Ok(true) => Ok(token),
            Ok(false) => Err(StorageError::UpdateInProgress(key.to_string())),
            Err(e) => {
                warn!(error = %e, "failed to re-check upload lock");
                Ok(token)
            }
        }
    }

    /// Take the per-key publisher lock without blocking.
    pub async fn acquire_publisher(&self, key: &BundleKey) -> StorageResult<PublisherGuard> {
        let path = self.store.publisher_lock_path(key);
        ensure_parent(&path).await?;
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<Option<std::fs::File>> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            match file.try_lock_exclusive() {
                Ok(()) => Ok(Some(file)),
                Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
                Err(err) => Err(err),
            }
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))??;

        match file {
            Some(file) => Ok(PublisherGuard { _file: file }),
            None => Err(StorageError::PublishInProgress(key.to_string())),
        }
    }

    /// Wait until no read tokens remain in `bundle_dir`.
    ///
    /// Wakes on in-process token release and otherwise rescans every poll
    /// interval, which is how tokens held by other replicas are observed.
    /// Returns how long the wait took.
    #[instrument(skip(self, bundle_dir), fields(key = %key))]
    pub async fn wait_for_drain(&self, key: &BundleKey, bundle_dir: &Path) -> StorageResult<Duration> {
        let started = Instant::now();
        let deadline = self.drain_timeout.map(|timeout| started + timeout);

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before scanning so a release during the scan is not missed.
            notified.as_mut().enable();

            let remaining = count_tokens(bundle_dir).await?;
            if remaining == 0 {
                return Ok(started.elapsed());
            }

            let mut wait = self.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(StorageError::DrainTimeout {
                        key: key.to_string(),
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
                wait = wait.min(deadline - now);
            }

            debug!(remaining, "waiting for readers to drain");
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Handle on one in-flight read. Dropping it removes the token file.
#[derive(Debug)]
pub struct ReadToken {
    bundle_dir: PathBuf,
    token_path: Option<PathBuf>,
    released: Arc<Notify>,
}

impl ReadToken {
    /// Canonical bundle directory this read is pinned to.
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// Whether the token is actually registered on disk.
    pub fn is_tracked(&self) -> bool {
        self.token_path.is_some()
    }
}

impl Drop for ReadToken {
    fn drop(&mut self) {
        if let Some(path) = self.token_path.take() {
            // Blocking on purpose: drop cannot await, and a single unlink is
            // short enough to run on the runtime thread.
            if let Err(e) = std::fs::remove_file(&path)
                && e.kind() != ErrorKind::NotFound
            {
                warn!(error = %e, token = %path.display(), "failed to release read token");
            }
            self.released.notify_waiters();
        }
    }
}

/// Exclusive right to publish one key. Released on drop.
#[derive(Debug)]
pub struct PublisherGuard {
    _file: std::fs::File,
}

async fn create_token(bundle_dir: &Path) -> std::io::Result<PathBuf> {
    let token_dir = bundle_dir.join(TOKEN_DIR);
    let token_path = token_dir.join(Uuid::new_v4().to_string());

    match create_new_file(&token_path).await {
        Ok(()) => Ok(token_path),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            // Never recreate a bundle directory that vanished; only add the
            // token directory to one that still exists.
            fs::metadata(bundle_dir).await?;
            match fs::create_dir(&token_dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
            create_new_file(&token_path).await?;
            Ok(token_path)
        }
        Err(e) => Err(e),
    }
}

async fn create_new_file(path: &Path) -> std::io::Result<()> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    Ok(())
}

/// The bundle still exists and carries no upload lock.
async fn still_readable(bundle_dir: &Path) -> StorageResult<bool> {
    if !fs::try_exists(bundle_dir).await? {
        return Ok(false);
    }
    Ok(!has_upload_lock(bundle_dir).await?)
}

/// Whether an upload lock is present in `bundle_dir`.
pub async fn has_upload_lock(bundle_dir: &Path) -> StorageResult<bool> {
    Ok(fs::try_exists(bundle_dir.join(UPLOAD_LOCK_FILE)).await?)
}

/// Write the upload lock marker into `bundle_dir`.
///
/// The marker records the publish id and start time for operators.
pub async fn write_upload_lock(bundle_dir: &Path, publish_id: Uuid) -> StorageResult<()> {
    let started = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let contents = format!("{publish_id} {started}\n");
    fs::write(bundle_dir.join(UPLOAD_LOCK_FILE), contents).await?;
    Ok(())
}

/// Remove the upload lock marker. Absent markers are not an error.
pub async fn clear_upload_lock(bundle_dir: &Path) -> StorageResult<()> {
    match fs::remove_file(bundle_dir.join(UPLOAD_LOCK_FILE)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Number of read tokens currently registered in `bundle_dir`.
pub async fn count_tokens(bundle_dir: &Path) -> StorageResult<usize> {
    let mut entries = match fs::read_dir(bundle_dir.join(TOKEN_DIR)).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}
