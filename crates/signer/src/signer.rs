//! Manifest signing and verification.

use crate::error::{SignerError, SignerResult};
use crate::key::{PrivateKey, PublicKey};
use base64::Engine;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::Sha256;

/// A detached manifest signature with the id of the key that made it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestSignature {
    /// Base64 RSA-SHA256 signature.
    pub sig: String,
    pub key_id: String,
}

impl ManifestSignature {
    /// Render as a structured-header dictionary: `sig="...", keyid="..."`.
    pub fn to_header_value(&self) -> String {
        format!("sig=\"{}\", keyid=\"{}\"", self.sig, self.key_id)
    }

    /// Parse a structured-header dictionary carrying `sig` and `keyid`.
    ///
    /// Members other than these two are ignored.
    pub fn parse_header(value: &str) -> SignerResult<Self> {
        let mut sig = None;
        let mut key_id = None;
        for member in value.split(',') {
            let (name, raw) = member.trim().split_once('=').ok_or_else(|| {
                SignerError::InvalidSignature(format!("malformed dictionary member: {member:?}"))
            })?;
            let unquoted = raw
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or_else(|| SignerError::InvalidSignature(format!("{name} is not a string")))?;
            match name {
                "sig" => sig = Some(unquoted.to_string()),
                "keyid" => key_id = Some(unquoted.to_string()),
                _ => {}
            }
        }
        Ok(Self {
            sig: sig.ok_or_else(|| SignerError::InvalidSignature("missing sig".to_string()))?,
            key_id: key_id.ok_or_else(|| SignerError::InvalidSignature("missing keyid".to_string()))?,
        })
    }
}

/// Signs serialized manifests with RSA-SHA256 (PKCS#1 v1.5).
pub struct ManifestSigner {
    key_id: String,
    public_key: PublicKey,
    signing_key: SigningKey<Sha256>,
}

impl ManifestSigner {
    /// Create a signer from a private key.
    pub fn new(key: PrivateKey, key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            public_key: key.public_key(),
            signing_key: SigningKey::<Sha256>::new(key.rsa_key().clone()),
        }
    }

    /// Create from a PEM private key.
    pub fn from_pem(pem: &str, key_id: impl Into<String>) -> SignerResult<Self> {
        Ok(Self::new(PrivateKey::from_pem(pem)?, key_id))
    }

    /// Generate a signer with a random key.
    pub fn generate(key_id: impl Into<String>) -> SignerResult<Self> {
        Ok(Self::new(PrivateKey::generate()?, key_id))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Sign exactly `bytes`. Any re-serialization of the manifest afterwards
    /// invalidates the signature.
    pub fn sign(&self, bytes: &[u8]) -> SignerResult<ManifestSignature> {
        let signature: Signature = self
            .signing_key
            .try_sign(bytes)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        Ok(ManifestSignature {
            sig: base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
            key_id: self.key_id.clone(),
        })
    }
}

impl std::fmt::Debug for ManifestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestSigner")
            .field("key_id", &self.key_id)
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Verify a manifest signature against the exact signed bytes.
pub fn verify_signature(
    bytes: &[u8],
    signature: &ManifestSignature,
    public_key: &PublicKey,
) -> SignerResult<()> {
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(&signature.sig)
        .map_err(|e| SignerError::InvalidSignature(format!("invalid base64: {e}")))?;
    let sig = Signature::try_from(sig_bytes.as_slice())
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;

    VerifyingKey::<Sha256>::new(public_key.rsa_key().clone())
        .verify(bytes, &sig)
        .map_err(|_| SignerError::VerificationFailed)
}
