//! Asset endpoint.
//!
//! Asset fetches take no read token, so a publish does not wait for them.

use crate::error::{ApiError, ApiResult};
use crate::handlers::manifest::{NO_RUNTIME_VERSION, UNSUPPORTED_PLATFORM};
use crate::metrics::{ASSETS_NOT_FOUND, ASSETS_SERVED};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use hatch_core::{BundleKey, Platform, ReleaseChannel, RuntimeVersion};
use hatch_storage::StorageError;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct AssetQuery {
    asset: Option<String>,
    #[serde(rename = "runtimeVersion")]
    runtime_version: Option<String>,
    platform: Option<String>,
    #[serde(rename = "releaseChannel")]
    release_channel: Option<String>,
}

fn required<'a>(value: &'a Option<String>, message: &str) -> ApiResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(message.to_string()))
}

impl AssetQuery {
    fn bundle_key(&self) -> ApiResult<BundleKey> {
        let platform = required(&self.platform, UNSUPPORTED_PLATFORM)?;
        let platform = Platform::parse(platform)
            .map_err(|_| ApiError::BadRequest(UNSUPPORTED_PLATFORM.to_string()))?;
        let runtime_version = RuntimeVersion::new(required(&self.runtime_version, NO_RUNTIME_VERSION)?)?;
        let channel = match self.release_channel.as_deref().filter(|c| !c.is_empty()) {
            Some(channel) => ReleaseChannel::new(channel)?,
            None => ReleaseChannel::default(),
        };
        Ok(BundleKey::new(channel, platform, runtime_version))
    }
}

/// GET /assets
pub async fn get_asset(
    State(state): State<AppState>,
    query: Result<Query<AssetQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let asset = required(&query.asset, "No asset name provided.")?;
    let key = query.bundle_key()?;

    let not_found = || ApiError::NotFound(format!("Asset \"{asset}\" does not exist."));
    match state.resolver.resolve(&key, asset).await {
        Ok(resolved) => {
            ASSETS_SERVED.inc();
            let content_type = resolved.content_type;
            let len = resolved.len.to_string();
            Ok((
                StatusCode::OK,
                [(CONTENT_TYPE, content_type), (CONTENT_LENGTH, len.as_str())],
                Body::from_stream(resolved.into_stream()),
            )
                .into_response())
        }
        Err(StorageError::NotFound(detail)) => {
            ASSETS_NOT_FOUND.inc();
            tracing::warn!(key = %key, asset, detail = %detail, "asset not found");
            Err(not_found())
        }
        Err(StorageError::InvalidPath(detail)) => {
            ASSETS_NOT_FOUND.inc();
            tracing::warn!(key = %key, asset, detail = %detail, "rejected asset path outside bundle");
            Err(not_found())
        }
        Err(StorageError::MetadataCorrupt(detail)) => {
            ASSETS_NOT_FOUND.inc();
            tracing::error!(key = %key, asset, detail = %detail, "asset missing from bundle metadata");
            Err(not_found())
        }
        Err(e) => Err(e.into()),
    }
}
