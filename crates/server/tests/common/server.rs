//! Server test utilities.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use hatch_core::config::AppConfig;
use hatch_server::{AppState, create_router};
use hatch_signer::ManifestSigner;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Test signing key, shared with the signer crate's tests.
#[allow(dead_code)]
pub const TEST_PRIVATE_KEY: &str = include_str!("../../../signer/testdata/private-key.pem");

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

/// A buffered response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with a temporary content store and no
    /// signing key.
    pub async fn new() -> Self {
        Self::build(|_| {}, None).await
    }

    /// Create a test server that signs manifests with the test key.
    pub async fn with_signer() -> Self {
        let signer = ManifestSigner::from_pem(TEST_PRIVATE_KEY, "main").expect("Failed to load test key");
        Self::build(|_| {}, Some(signer)).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, None).await
    }

    async fn build<F>(modifier: F, signer: Option<ManifestSigner>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing(temp_dir.path().join("updates"));
        config.server.public_url = "http://updates.test".to_string();
        modifier(&mut config);

        hatch_server::metrics::register_metrics();
        let state = AppState::from_config(config, signer)
            .await
            .expect("Failed to open content store");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// GET `uri` with optional extra headers.
    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}
