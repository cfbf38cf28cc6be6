//! Producing signed metadata sidecars.
//!
//! The counterpart of the verifier: hashes a plugin binary, signs the raw
//! SHA-256 digest with an Ed25519 key and records the base64 public key as
//! the certificate. Release tooling calls [`sign_plugin`] and then
//! [`write_metadata`](crate::metadata::write_metadata).

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use strata_accel_core::{AccelError, AccelResult};

use crate::metadata::{PluginMetadata, PluginSignature, SIGNATURE_ALGORITHM};
use crate::verifier::hash_file;

/// Who signs, and for whom.
#[derive(Debug, Clone, Default)]
pub struct SignerIdentity {
    /// Issuer distinguished name, matched against `trusted_issuers`
    pub issuer: String,
    /// Subject distinguished name
    pub subject: String,
}

impl SignerIdentity {
    /// Identity with the given issuer and subject.
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
        }
    }
}

/// Base64 public key of `key`, as pinned in `trusted_certificates`.
pub fn certificate_for(key: &SigningKey) -> String {
    BASE64.encode(key.verifying_key().as_bytes())
}

/// Sign the plugin at `path`.
///
/// `base` supplies the descriptive fields (name, version, permissions); its
/// signature block is replaced.
pub fn sign_plugin(
    path: &Path,
    key: &SigningKey,
    identity: &SignerIdentity,
    base: PluginMetadata,
) -> AccelResult<PluginMetadata> {
    let hash = hash_file(path)?;
    let digest = hex::decode(&hash).map_err(|e| AccelError::Serialization(e.to_string()))?;
    let signature = key.sign(&digest);

    tracing::debug!(
        target: "strata::accel::security",
        path = %path.display(),
        hash = %hash,
        issuer = %identity.issuer,
        "Signed plugin"
    );

    Ok(PluginMetadata {
        signature: PluginSignature {
            sha256: hash,
            signature: BASE64.encode(signature.to_bytes()),
            certificate: certificate_for(key),
            issuer: identity.issuer.clone(),
            subject: identity.subject.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            algorithm: SIGNATURE_ALGORITHM.to_string(),
        },
        ..base
    })
}
