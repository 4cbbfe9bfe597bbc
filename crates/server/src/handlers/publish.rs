//! Publish endpoint (write path).
//!
//! The multipart body carries the text fields first, then one file part per
//! bundle file. The first file part opens the publish session; later parts
//! stream straight into staging.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{UPLOAD_LOCKS_STRANDED, record_publish_committed, record_publish_failure};
use crate::state::AppState;
use axum::Json;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::http::StatusCode;
use hatch_storage::{PublishFields, PublishSession, StorageError, upload_relative_path};
use serde::Serialize;
use std::collections::HashMap;

/// Response of a committed publish.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub release_channel: String,
    pub platform: String,
    pub runtime_version: String,
    pub files: usize,
    pub bytes: u64,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(format!("malformed multipart body: {}", err.body_text()))
    }
}

/// Label for the publish failure metric.
fn failure_step(step: &'static str, err: &ApiError) -> &'static str {
    match err {
        ApiError::Storage(StorageError::LockStranded { .. }) => "unlock",
        ApiError::Storage(StorageError::DrainTimeout { .. }) => "drain",
        ApiError::Storage(
            StorageError::InvalidBundle(_)
            | StorageError::MissingField(_)
            | StorageError::InvalidPath(_)
            | StorageError::Core(_),
        )
        | ApiError::BadRequest(_)
        | ApiError::Core(_) => "validate",
        _ => step,
    }
}

/// An upload path escaping the bundle is a client error here, not a 404.
fn publish_error(err: StorageError) -> ApiError {
    match err {
        StorageError::InvalidPath(path) => ApiError::BadRequest(format!("invalid upload path: {path}")),
        other => other.into(),
    }
}

/// Read the form and stream files into a session. `session` stays `None`
/// when the form carried no files.
async fn ingest(
    state: &AppState,
    multipart: &mut Multipart,
    session: &mut Option<PublishSession>,
) -> ApiResult<()> {
    let mut form = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            if session.is_some() {
                return Err(ApiError::BadRequest(format!(
                    "text field {name:?} must precede all file parts"
                )));
            }
            let value = field.text().await.map_err(multipart_error)?;
            form.insert(name, value);
            continue;
        };

        if session.is_none() {
            let fields = PublishFields::from_form(&form)?;
            let key = fields.bundle_key()?;
            tracing::info!(
                key = %key,
                name = %fields.name,
                package_name = %fields.package_name,
                js_version = fields.js_version.as_deref().unwrap_or("-"),
                "publish requested"
            );
            *session = Some(PublishSession::begin(state.locks.clone(), key).await?);
        }

        let relative = upload_relative_path(&name, Some(&file_name))?;
        if let Some(session) = session.as_mut() {
            session
                .write_file(&relative, Box::pin(field))
                .await
                .map_err(publish_error)?;
        }
    }

    Ok(())
}

/// POST /publish-update
pub async fn publish_update(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<PublishResponse>> {
    let mut multipart = multipart.inspect_err(|_| record_publish_failure("prepare"))?;
    let mut session = None;
    if let Err(e) = ingest(&state, &mut multipart, &mut session).await {
        let step = if session.is_some() { "write" } else { "prepare" };
        record_publish_failure(failure_step(step, &e));
        if let Some(session) = session.as_mut() {
            tracing::warn!(key = %session.key(), error = %e, "publish upload failed");
            session.abort().await;
        }
        return Err(e);
    }

    let Some(session) = session else {
        record_publish_failure("validate");
        return Err(ApiError::BadRequest("upload contains no files".to_string()));
    };

    // Detached so a client disconnect cannot stop a swap halfway.
    let result = tokio::spawn(session.commit())
        .await
        .map_err(|e| ApiError::Internal(format!("publish task failed: {e}")))?;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if matches!(e, StorageError::LockStranded { .. }) {
                UPLOAD_LOCKS_STRANDED.inc();
            }
            let err = ApiError::from(e);
            record_publish_failure(failure_step("swap", &err));
            return Err(err);
        }
    };

    record_publish_committed(report.elapsed, report.drain_wait);
    Ok(Json(PublishResponse {
        release_channel: report.key.channel.to_string(),
        platform: report.key.platform.to_string(),
        runtime_version: report.key.runtime_version.to_string(),
        files: report.files,
        bytes: report.bytes,
    }))
}
