//! Bundle addressing: release channel, platform and runtime version.
//!
//! A [`BundleKey`] names one logical update stream and maps deterministically
//! onto a directory under the store root
//! (`<release_channel>/<platform>/<runtime_version>`). Every component is
//! validated as a single safe path segment so a key can never address
//! anything outside its own directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Release channel used when a request does not name one.
pub const DEFAULT_RELEASE_CHANNEL: &str = "dev";

/// Maximum length of a channel or runtime version segment.
const MAX_SEGMENT_LEN: usize = 128;

/// Validate a single path segment (channel or runtime version).
///
/// Segments may not be empty, may not start with `.` (dot-prefixed names are
/// reserved for store bookkeeping such as `.staging`), and are restricted to
/// ASCII alphanumerics plus `-`, `_`, `.`, `+` and `:`.
fn validate_segment(kind: &str, value: &str) -> crate::Result<()> {
    if value.is_empty() {
        return Err(crate::Error::InvalidBundleKey(format!(
            "{kind} cannot be empty"
        )));
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(crate::Error::InvalidBundleKey(format!(
            "{kind} exceeds {MAX_SEGMENT_LEN} characters"
        )));
    }
    if value.starts_with('.') {
        return Err(crate::Error::InvalidBundleKey(format!(
            "{kind} cannot start with '.'"
        )));
    }
    for c in value.chars() {
        if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '+' | ':') {
            return Err(crate::Error::InvalidBundleKey(format!(
                "invalid character in {kind}: {c:?}"
            )));
        }
    }
    Ok(())
}

/// Target platform of a bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    /// Parse a platform name (`ios` or `android`).
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            other => Err(crate::Error::InvalidPlatform(other.to_string())),
        }
    }

    /// Lowercase name, as used on disk and in metadata descriptors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

impl FromStr for Platform {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named update track (e.g. `dev`, `production`).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseChannel(String);

impl ReleaseChannel {
    /// Create from a string, validating format.
    pub fn new(channel: impl Into<String>) -> crate::Result<Self> {
        let channel = channel.into();
        validate_segment("release channel", &channel)?;
        Ok(Self(channel))
    }

    /// Get the channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ReleaseChannel {
    fn default() -> Self {
        Self(DEFAULT_RELEASE_CHANNEL.to_string())
    }
}

impl TryFrom<String> for ReleaseChannel {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<ReleaseChannel> for String {
    fn from(value: ReleaseChannel) -> Self {
        value.0
    }
}

impl fmt::Debug for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReleaseChannel({})", self.0)
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compatibility tag pinning a bundle to a native app build.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuntimeVersion(String);

impl RuntimeVersion {
    /// Create from a string, validating format.
    pub fn new(version: impl Into<String>) -> crate::Result<Self> {
        let version = version.into();
        validate_segment("runtime version", &version)?;
        Ok(Self(version))
    }

    /// Get the version string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RuntimeVersion {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<RuntimeVersion> for String {
    fn from(value: RuntimeVersion) -> Self {
        value.0
    }
}

impl fmt::Debug for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeVersion({})", self.0)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one logical update stream.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleKey {
    pub channel: ReleaseChannel,
    pub platform: Platform,
    pub runtime_version: RuntimeVersion,
}

impl BundleKey {
    /// Create from already validated components.
    pub fn new(channel: ReleaseChannel, platform: Platform, runtime_version: RuntimeVersion) -> Self {
        Self {
            channel,
            platform,
            runtime_version,
        }
    }

    /// Parse raw request values. A missing channel falls back to
    /// [`DEFAULT_RELEASE_CHANNEL`].
    pub fn parse(channel: Option<&str>, platform: &str, runtime_version: &str) -> crate::Result<Self> {
        let channel = match channel {
            Some(c) => ReleaseChannel::new(c)?,
            None => ReleaseChannel::default(),
        };
        Ok(Self {
            channel,
            platform: Platform::parse(platform)?,
            runtime_version: RuntimeVersion::new(runtime_version)?,
        })
    }

    /// Directory of the platform that holds this key's bundle, relative to
    /// the store root.
    pub fn platform_dir(&self) -> PathBuf {
        PathBuf::from(self.channel.as_str()).join(self.platform.as_str())
    }

    /// Live bundle path relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        self.platform_dir().join(self.runtime_version.as_str())
    }
}

impl fmt::Debug for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleKey({self})")
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.channel, self.platform, self.runtime_version
        )
    }
}
