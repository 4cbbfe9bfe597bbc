//! Reading bundle directories: descriptor, optional app config, file hashes.

use crate::error::{StorageError, StorageResult, not_found_or_io};
use crate::layout::confine;
use hatch_core::metadata::{APP_CONFIG_FILE, METADATA_FILE};
use hatch_core::{BundleContents, ContentHash, HashedFile, MetadataDescriptor, Platform};
use std::path::Path;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::instrument;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Read and parse the descriptor of a live bundle.
///
/// Returns the raw bytes too: the content id is computed over them.
pub async fn read_descriptor(bundle_dir: &Path) -> StorageResult<(Vec<u8>, MetadataDescriptor)> {
    let bytes = fs::read(bundle_dir.join(METADATA_FILE))
        .await
        .map_err(|e| not_found_or_io(e, METADATA_FILE))?;
    let descriptor = MetadataDescriptor::from_json(&bytes)
        .map_err(|e| StorageError::MetadataCorrupt(e.to_string()))?;
    Ok((bytes, descriptor))
}

/// Load everything the manifest needs for one platform of a bundle.
///
/// Nothing is cached: the descriptor and every referenced file are read on
/// each call, from the directory the caller's read token pins.
#[instrument(skip(bundle_dir), fields(bundle = %bundle_dir.display()))]
pub async fn load_contents(bundle_dir: &Path, platform: Platform) -> StorageResult<BundleContents> {
    let (descriptor_bytes, descriptor) = read_descriptor(bundle_dir).await?;
    let entry = descriptor
        .platform(platform)
        .map_err(|e| StorageError::MetadataCorrupt(e.to_string()))?;

    let created_at: OffsetDateTime = fs::metadata(bundle_dir.join(METADATA_FILE))
        .await?
        .modified()?
        .into();

    let launch = HashedFile {
        path: entry.bundle.clone(),
        ext: None,
        hash: hash_bundle_file(bundle_dir, &entry.bundle).await?,
    };

    let mut assets = Vec::with_capacity(entry.assets.len());
    for asset in &entry.assets {
        assets.push(HashedFile {
            path: asset.path.clone(),
            ext: Some(asset.ext.clone()),
            hash: hash_bundle_file(bundle_dir, &asset.path).await?,
        });
    }

    let app_config = read_app_config(bundle_dir).await?;
    let content_id = BundleContents::content_id(&descriptor_bytes, &launch.hash, &assets);

    Ok(BundleContents {
        content_id,
        created_at,
        launch,
        assets,
        app_config,
    })
}

/// Check that a staged bundle is servable for `platform`: the descriptor
/// parses, lists the platform, and every file it names was uploaded.
pub async fn verify_staged(staging_dir: &Path, platform: Platform) -> StorageResult<()> {
    let (_, descriptor) = read_descriptor(staging_dir).await.map_err(|e| match e {
        StorageError::NotFound(_) => {
            StorageError::InvalidBundle(format!("upload is missing {METADATA_FILE}"))
        }
        StorageError::MetadataCorrupt(msg) => StorageError::InvalidBundle(msg),
        other => other,
    })?;
    let entry = descriptor
        .platform(platform)
        .map_err(|e| StorageError::InvalidBundle(e.to_string()))?;

    let listed = std::iter::once(entry.bundle.as_str()).chain(entry.assets.iter().map(|a| a.path.as_str()));
    for path in listed {
        let file = confine(staging_dir, path.trim_start_matches('/'))
            .await
            .map_err(|_| StorageError::InvalidBundle(format!("unsafe path in descriptor: {path}")))?;
        if !fs::try_exists(&file).await? {
            return Err(StorageError::InvalidBundle(format!(
                "descriptor lists {path} but it was not uploaded"
            )));
        }
    }
    Ok(())
}

async fn read_app_config(bundle_dir: &Path) -> StorageResult<Option<serde_json::Value>> {
    match fs::read(bundle_dir.join(APP_CONFIG_FILE)).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::MetadataCorrupt(format!("{APP_CONFIG_FILE}: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Stream a bundle file through SHA-256.
async fn hash_bundle_file(bundle_dir: &Path, relative: &str) -> StorageResult<ContentHash> {
    let path = confine(bundle_dir, relative.trim_start_matches('/')).await?;
    let mut file = fs::File::open(&path)
        .await
        .map_err(|e| not_found_or_io(e, relative))?;

    let mut hasher = ContentHash::hasher();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
