//! Signer error types.

use thiserror::Error;

/// Key handling and manifest signing errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("failed to generate RSA key: {0}")]
    KeyGeneration(String),

    /// The PEM input is not an RSA key in a supported encoding.
    #[error("invalid RSA key: {0}")]
    InvalidKey(String),

    #[error("failed to sign manifest: {0}")]
    Signing(String),

    /// The signature is well formed but does not match the bytes and key.
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("malformed signature: {0}")]
    InvalidSignature(String),

    /// Reading a key file failed.
    #[error("failed to read key: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
