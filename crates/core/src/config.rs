//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL, used to build asset URLs in manifests.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Content store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding `<channel>/<platform>/<runtime_version>` bundles.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/updates")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Manifest signing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Key id advertised in the `expo-signature` header.
    #[serde(default = "default_key_id")]
    pub key_id: String,
    /// Private key source.
    pub private_key: PrivateKeyConfig,
}

fn default_key_id() -> String {
    "main".to_string()
}

/// Private key source configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrivateKeyConfig {
    /// PEM key stored in a file.
    File {
        /// Path to the private key file.
        path: PathBuf,
    },
    /// PEM key stored in an environment variable.
    Env {
        /// Environment variable name.
        var: String,
    },
    /// PEM key provided directly as a value (NOT recommended for production).
    Value {
        /// The PEM-encoded private key.
        key: String,
    },
    /// Generate a new key at startup (for development only).
    Generate,
}

/// Publish and drain behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Seconds between read-token directory scans while draining.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Upper bound on the drain wait before a publish is aborted.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// Wait for readers indefinitely, ignoring `drain_timeout_secs`.
    #[serde(default)]
    pub unbounded_drain: bool,
    /// Maximum accepted publish request body in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_drain_timeout_secs() -> u64 {
    900 // 15 minutes
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            unbounded_drain: false,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl PublishConfig {
    /// Interval between filesystem polls of the read-token directory.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Drain deadline, or `None` when draining is unbounded.
    pub fn drain_timeout(&self) -> Option<Duration> {
        (!self.unbounded_drain).then(|| Duration::from_secs(self.drain_timeout_secs))
    }

    /// Validate publish configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_secs == 0 {
            return Err("publish.poll_interval_secs cannot be 0".to_string());
        }
        if !self.unbounded_drain && self.drain_timeout_secs == 0 {
            return Err(
                "publish.drain_timeout_secs cannot be 0; set publish.unbounded_drain to wait forever"
                    .to_string(),
            );
        }
        if self.max_upload_bytes == 0 {
            return Err("publish.max_upload_bytes cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Content store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Signing configuration (optional; unsigned manifests only without it).
    pub signing: Option<SigningConfig>,
    /// Publish configuration.
    #[serde(default)]
    pub publish: PublishConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `root`.
    ///
    /// **For testing only.** Uses a short poll interval so drain waits in
    /// tests resolve quickly.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig { root: root.into() },
            signing: None,
            publish: PublishConfig {
                poll_interval_secs: 1,
                drain_timeout_secs: 30,
                ..PublishConfig::default()
            },
        }
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.public_url.trim().is_empty() {
            return Err("server.public_url cannot be empty".to_string());
        }
        self.publish.validate()
    }
}
