use bytes::Bytes;
use futures::stream;
use hatch_core::BundleKey;
use hatch_core::config::PublishConfig;
use hatch_storage::{ContentStore, LockCoordinator, PublishReport, PublishSession};
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

/// Files of a small iOS bundle whose every file starts with `tag`, so a
/// reader can tell which publish a file came from.
pub fn tagged_bundle(tag: &str) -> Vec<(String, Vec<u8>)> {
    let descriptor = r#"{
        "version": 0,
        "bundler": "metro",
        "fileMetadata": {
            "ios": {
                "bundle": "bundles/ios.js",
                "assets": [
                    {"path": "assets/a1", "ext": "png"},
                    {"path": "assets/a2", "ext": "ttf"}
                ]
            }
        }
    }"#;
    vec![
        ("metadata.json".to_string(), descriptor.as_bytes().to_vec()),
        ("bundles/ios.js".to_string(), format!("{tag}:launch").into_bytes()),
        ("assets/a1".to_string(), format!("{tag}:image").into_bytes()),
        ("assets/a2".to_string(), format!("{tag}:font").into_bytes()),
    ]
}

pub fn ios_key() -> BundleKey {
    BundleKey::parse(Some("dev"), "ios", "1.0.0").unwrap()
}

pub async fn coordinator(root: &Path, poll_interval_secs: u64, drain_timeout_secs: u64) -> Arc<LockCoordinator> {
    let store = ContentStore::open(root).await.unwrap();
    let config = PublishConfig {
        poll_interval_secs,
        drain_timeout_secs,
        ..PublishConfig::default()
    };
    Arc::new(LockCoordinator::new(store, &config))
}

pub async fn publish(
    locks: &Arc<LockCoordinator>,
    key: &BundleKey,
    files: Vec<(String, Vec<u8>)>,
) -> hatch_storage::StorageResult<PublishReport> {
    let mut session = PublishSession::begin(Arc::clone(locks), key.clone()).await?;
    for (path, data) in files {
        let body = stream::iter(vec![Ok::<_, Infallible>(Bytes::from(data))]);
        session.write_file(&path, body).await?;
    }
    session.commit().await
}
