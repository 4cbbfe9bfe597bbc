//! Manifest endpoint (read path).

use crate::error::{ApiError, ApiResult};
use crate::metrics::{LOCK_CONFLICTS, record_manifest_served};
use crate::state::AppState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hatch_core::{BundleKey, Manifest, Platform, ReleaseChannel, RuntimeVersion};
use hatch_signer::ManifestSignature;
use hatch_storage::{StorageError, load_contents};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

pub const UNSUPPORTED_PLATFORM: &str = "Unsupported platform. Expected either ios or android.";
pub const NO_RUNTIME_VERSION: &str = "No runtimeVersion provided.";
pub const NO_SIGNING_KEY: &str = "Code signing requested but no key supplied when starting server.";

/// Query form of the manifest request. Protocol headers take precedence.
#[derive(Debug, Default, Deserialize)]
pub struct ManifestQuery {
    platform: Option<String>,
    #[serde(rename = "runtimeVersion", alias = "runtime-version")]
    runtime_version: Option<String>,
    #[serde(rename = "releaseChannel", alias = "expo-release-channel")]
    release_channel: Option<String>,
    #[serde(rename = "expectSignature")]
    expect_signature: Option<String>,
}

/// A validated manifest request.
#[derive(Debug, PartialEq, Eq)]
pub struct ManifestRequest {
    pub key: BundleKey,
    pub expect_signature: bool,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl ManifestRequest {
    pub fn from_parts(headers: &HeaderMap, query: &ManifestQuery) -> ApiResult<Self> {
        let platform = header(headers, "expo-platform")
            .or_else(|| non_empty(query.platform.as_ref()))
            .and_then(|p| Platform::parse(p).ok())
            .ok_or_else(|| ApiError::BadRequest(UNSUPPORTED_PLATFORM.to_string()))?;

        let runtime_version = header(headers, "expo-runtime-version")
            .or_else(|| non_empty(query.runtime_version.as_ref()))
            .ok_or_else(|| ApiError::BadRequest(NO_RUNTIME_VERSION.to_string()))?;
        let runtime_version = RuntimeVersion::new(runtime_version)?;

        let channel = match header(headers, "expo-release-channel")
            .or_else(|| non_empty(query.release_channel.as_ref()))
        {
            Some(channel) => ReleaseChannel::new(channel)?,
            None => ReleaseChannel::default(),
        };

        let expect_signature = header(headers, "expo-expect-signature").is_some()
            || non_empty(query.expect_signature.as_ref()) == Some("true");

        Ok(Self {
            key: BundleKey::new(channel, platform, runtime_version),
            expect_signature,
        })
    }
}

/// Builder for a `multipart/mixed` response body.
struct MixedBody {
    boundary: String,
    body: Vec<u8>,
}

impl MixedBody {
    fn new() -> Self {
        Self {
            boundary: format!("hatch-{}", Uuid::new_v4().simple()),
            body: Vec::new(),
        }
    }

    fn part(mut self, name: &str, headers: &[(&str, &str)], content: &[u8]) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!("content-disposition: form-data; name=\"{name}\"\r\n").as_bytes(),
        );
        for (header, value) in headers {
            self.body
                .extend_from_slice(format!("{header}: {value}\r\n").as_bytes());
        }
        self.body.extend_from_slice(b"\r\n");
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (format!("multipart/mixed; boundary={}", self.boundary), self.body)
    }
}

/// The `extensions` part: request headers clients attach to each asset fetch.
fn extensions(manifest: &Manifest) -> Value {
    let headers: Map<String, Value> = manifest
        .all_assets()
        .map(|asset| (asset.key.clone(), json!({})))
        .collect();
    json!({ "assetRequestHeaders": headers })
}

/// GET /manifest
pub async fn get_manifest(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ManifestQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let request = ManifestRequest::from_parts(&headers, &query)?;
    let key = request.key;

    let signer = match (&state.signer, request.expect_signature) {
        (Some(signer), true) => Some(signer),
        (None, true) => return Err(ApiError::BadRequest(NO_SIGNING_KEY.to_string())),
        (_, false) => None,
    };

    let token = match state.locks.try_acquire_read_token(&key).await {
        Ok(token) => token,
        Err(StorageError::UpdateInProgress(_)) => {
            LOCK_CONFLICTS.inc();
            tracing::debug!(key = %key, "manifest refused: update in progress");
            return Err(ApiError::UpdateInProgress);
        }
        Err(StorageError::NotFound(_)) => {
            return Err(ApiError::NotFound(format!("No update published for {key}.")));
        }
        Err(e) => return Err(e.into()),
    };

    let contents = load_contents(token.bundle_dir(), key.platform).await?;
    let manifest = Manifest::build(&key, &contents, &state.config.server.public_url)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let manifest_bytes = manifest
        .to_json_bytes()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    drop(token);

    let signature: Option<ManifestSignature> = match signer {
        Some(signer) => Some(signer.sign(&manifest_bytes)?),
        None => None,
    };
    let signature_header = signature.as_ref().map(ManifestSignature::to_header_value);

    let mut manifest_headers = vec![("content-type", "application/json; charset=utf-8")];
    if let Some(value) = &signature_header {
        manifest_headers.push(("expo-signature", value.as_str()));
    }
    let extensions_json = serde_json::to_vec(&extensions(&manifest))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let (content_type, body) = MixedBody::new()
        .part("manifest", &manifest_headers, &manifest_bytes)
        .part(
            "extensions",
            &[("content-type", "application/json")],
            &extensions_json,
        )
        .finish();

    record_manifest_served(signature.is_some());
    tracing::debug!(
        key = %key,
        manifest_id = %manifest.id,
        signed = signature.is_some(),
        "manifest served"
    );

    Ok((
        StatusCode::OK,
        [
            ("expo-protocol-version", "0".to_string()),
            ("expo-sfv-version", "0".to_string()),
            (CACHE_CONTROL.as_str(), "private, max-age=0".to_string()),
            (CONTENT_TYPE.as_str(), content_type),
        ],
        body,
    )
        .into_response())
}
