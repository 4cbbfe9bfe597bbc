//! Manifest signing for hatch.
//!
//! This crate provides:
//! - RSA key loading (PKCS#8 / PKCS#1 PEM) and generation
//! - RSA-SHA256 signing of exact manifest bytes
//! - Signature verification and the `expo-signature` header value

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{PrivateKey, PublicKey};
pub use signer::{ManifestSignature, ManifestSigner, verify_signature};
