//! HTTP server for hatch update bundles.
//!
//! This crate provides the HTTP surface:
//! - Manifest serving with optional RSA signatures
//! - Asset downloads from the live bundle
//! - Bundle publishing with atomic replacement
//! - Health and Prometheus metrics endpoints

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
