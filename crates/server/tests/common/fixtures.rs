//! Test fixtures: bundles, multipart request bodies and response parsing.

use axum::body::Body;
use axum::http::Request;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const METADATA_JSON: &str = r#"{
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

/// One uploaded file: multipart field name, part file name, bundle path and
/// contents.
#[derive(Clone, Debug)]
pub struct BundleFile {
    pub field: &'static str,
    pub file_name: &'static str,
    pub path: &'static str,
    pub data: Vec<u8>,
}

/// An iOS bundle whose every file starts with `tag`. Field names mix plain
/// paths, directory keys and a leading slash.
#[allow(dead_code)]
pub fn bundle(tag: &str) -> Vec<BundleFile> {
    vec![
        BundleFile {
            field: "metadata.json",
            file_name: "metadata.json",
            path: "metadata.json",
            data: METADATA_JSON.as_bytes().to_vec(),
        },
        BundleFile {
            field: "bundles/",
            file_name: "ios.js",
            path: "bundles/ios.js",
            data: format!("{tag}:launch").into_bytes(),
        },
        BundleFile {
            field: "assets/",
            file_name: "a1",
            path: "assets/a1",
            data: format!("{tag}:image").into_bytes(),
        },
        BundleFile {
            field: "/assets/a2",
            file_name: "a2",
            path: "assets/a2",
            data: b"shared:font".to_vec(),
        },
    ]
}

/// Text fields of a publish to `dev/ios/1.0.0`.
#[allow(dead_code)]
pub fn publish_fields() -> Vec<(&'static str, &'static str)> {
    vec![
        ("name", "demo"),
        ("packageName", "'com.example.demo'"),
        ("platform", "ios"),
        ("runtimeVersion", " 1.0.0 "),
        ("releaseChannel", "\"dev\""),
        ("jsVersion", "42"),
    ]
}

#[allow(dead_code)]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Manifest rendering of a file hash.
#[allow(dead_code)]
pub fn manifest_hash(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(sha256(data))
}

/// Manifest id the server must derive for `files`.
#[allow(dead_code)]
pub fn expected_manifest_id(files: &[BundleFile]) -> String {
    let find = |path: &str| &files.iter().find(|f| f.path == path).unwrap().data;
    let mut hasher = Sha256::new();
    hasher.update(find("metadata.json"));
    for path in ["bundles/ios.js", "assets/a1", "assets/a2"] {
        hasher.update(sha256(find(path)));
    }
    let digest: [u8; 32] = hasher.finalize().into();
    let mut id = [0u8; 16];
    id.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(id).to_string()
}

/// Builder for `multipart/form-data` request bodies.
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

#[allow(dead_code)]
impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: "----hatch-test-boundary".to_string(),
            body: Vec::new(),
        }
    }

    /// A publish form: the standard fields followed by `files`.
    pub fn publish(files: &[BundleFile]) -> Self {
        let mut form = Self::new();
        for (name, value) in publish_fields() {
            form = form.text(name, value);
        }
        for file in files {
            form = form.file(file.field, file.file_name, &file.data);
        }
        form
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn into_request(mut self) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Request::builder()
            .method("POST")
            .uri("/publish-update")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", self.boundary),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}

/// One part of a `multipart/mixed` response.
#[derive(Debug)]
pub struct MixedPart {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl MixedPart {
    #[allow(dead_code)]
    pub fn name(&self) -> Option<&str> {
        let disposition = self.headers.get("content-disposition")?;
        disposition
            .split(';')
            .filter_map(|p| p.trim().strip_prefix("name="))
            .map(|n| n.trim_matches('"'))
            .next()
    }
}

/// Split a `multipart/mixed` body into its parts.
#[allow(dead_code)]
pub fn parse_mixed(content_type: &str, body: &[u8]) -> Vec<MixedPart> {
    let boundary = content_type
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("boundary="))
        .next()
        .expect("content type has no boundary");
    let text = std::str::from_utf8(body).expect("manifest body is UTF-8");
    let delimiter = format!("--{boundary}");

    let mut parts = Vec::new();
    for segment in text.split(delimiter.as_str()).skip(1) {
        if segment.starts_with("--") {
            break;
        }
        let segment = segment.strip_prefix("\r\n").unwrap_or(segment);
        let (head, content) = segment.split_once("\r\n\r\n").expect("part has no header block");
        let content = content.strip_suffix("\r\n").unwrap_or(content);
        let headers = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        parts.push(MixedPart {
            headers,
            body: content.as_bytes().to_vec(),
        });
    }
    parts
}
