//! Verification gate run on every plugin file before it is loaded.
//!
//! Pipeline, in order; each failing step records a distinct audit event and
//! stops:
//!
//! 1. the file exists
//! 2. SHA-256 of the whole file
//! 3. blacklist (always wins)
//! 4. whitelist, which accepts immediately when
//!    `whitelist_bypasses_signature` is set
//! 5. metadata sidecar, required unless `allow_unsigned`
//! 6. declared hash equals the computed hash
//! 7. Ed25519 signature over the digest, with certificate pinning, expiry
//!    and revocation
//! 8. trust level against `min_trust_level`
//!
//! Every call records at least one event, whatever the outcome.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, VerifyingKey};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::audit::{PluginSecurityAuditor, PluginSecurityEvent, SecurityEventKind, Severity};
use crate::metadata::{PluginMetadata, PluginSignature, SIGNATURE_ALGORITHM};
use crate::policy::{PluginSecurityPolicy, PluginTrustLevel};

/// Signatures dated further than this in the future are rejected.
const MAX_CLOCK_SKEW_SECS: i64 = 300;
const SECS_PER_DAY: i64 = 86_400;

/// Lowercase hex SHA-256 of the file at `path`.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Result of one verification pass.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    /// Whether the plugin may be loaded
    pub accepted: bool,
    /// Derived trust level
    pub trust_level: PluginTrustLevel,
    /// Hex SHA-256 of the file, empty when it could not be read
    pub hash: String,
    /// Human-readable reason for the decision
    pub reason: String,
    /// Sidecar metadata, when one was read
    pub metadata: Option<PluginMetadata>,
}

impl VerificationOutcome {
    fn new(
        accepted: bool,
        trust_level: PluginTrustLevel,
        hash: &str,
        reason: impl Into<String>,
        metadata: Option<PluginMetadata>,
    ) -> Self {
        Self {
            accepted,
            trust_level,
            hash: hash.to_string(),
            reason: reason.into(),
            metadata,
        }
    }
}

/// Why a signature did not verify.
#[derive(Debug)]
struct SignatureFailure {
    kind: SecurityEventKind,
    severity: Severity,
    message: String,
    /// Rejects the plugin even when signatures are optional
    fatal: bool,
}

impl SignatureFailure {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: SecurityEventKind::SignatureVerificationFailed,
            severity: Severity::Error,
            message: message.into(),
            fatal: false,
        }
    }
}

/// Applies a [`PluginSecurityPolicy`] and records decisions in an auditor.
#[derive(Debug)]
pub struct PluginSecurityVerifier {
    policy: RwLock<PluginSecurityPolicy>,
    auditor: Arc<PluginSecurityAuditor>,
}

impl Default for PluginSecurityVerifier {
    fn default() -> Self {
        Self::new(PluginSecurityPolicy::default(), PluginSecurityAuditor::global())
    }
}

impl PluginSecurityVerifier {
    /// Verifier recording into `auditor`.
    ///
    /// The auditor's retention follows `policy.max_audit_events`, here and
    /// on every [`set_policy`](Self::set_policy).
    pub fn new(policy: PluginSecurityPolicy, auditor: Arc<PluginSecurityAuditor>) -> Self {
        auditor.set_max_events(policy.max_audit_events);
        Self {
            policy: RwLock::new(policy),
            auditor,
        }
    }

    /// The auditor this verifier records into
    pub fn auditor(&self) -> &Arc<PluginSecurityAuditor> {
        &self.auditor
    }

    /// Snapshot of the current policy
    pub fn policy(&self) -> PluginSecurityPolicy {
        self.policy.read().clone()
    }

    /// Replace the policy. Audit history is kept.
    pub fn set_policy(&self, policy: PluginSecurityPolicy) {
        self.auditor.set_max_events(policy.max_audit_events);
        *self.policy.write() = policy;
        tracing::info!(target: "strata::accel::security", "Security policy updated");
    }

    /// Blacklist `hash`.
    pub fn add_to_blacklist(&self, hash: &str) {
        self.policy.write().blacklist(hash);
    }

    /// Whitelist `hash`.
    pub fn add_to_whitelist(&self, hash: &str) {
        self.policy.write().whitelist(hash);
    }

    /// Remove `hash` from the blacklist.
    pub fn remove_from_blacklist(&self, hash: &str) {
        self.policy.write().remove_from_blacklist(hash);
    }

    /// Remove `hash` from the whitelist.
    pub fn remove_from_whitelist(&self, hash: &str) {
        self.policy.write().remove_from_whitelist(hash);
    }

    /// Run the verification pipeline on `path`.
    ///
    /// The policy is snapshotted on entry, so a concurrent `set_policy` never
    /// produces a decision mixing two policies.
    pub fn verify_plugin(&self, path: &Path) -> VerificationOutcome {
        let policy = self.policy();
        let shown = path.display().to_string();

        if !path.is_file() {
            return self.reject(
                SecurityEventKind::PluginLoadFailed,
                Severity::Error,
                &shown,
                "",
                PluginTrustLevel::Untrusted,
                "plugin file not found",
                None,
            );
        }

        let hash = match hash_file(path) {
            Ok(hash) => hash,
            Err(e) => {
                return self.reject(
                    SecurityEventKind::PluginLoadFailed,
                    Severity::Error,
                    &shown,
                    "",
                    PluginTrustLevel::Untrusted,
                    format!("cannot hash plugin file: {}", e),
                    None,
                )
            }
        };

        if policy.is_blacklisted(&hash) {
            return self.reject(
                SecurityEventKind::Blacklisted,
                Severity::Critical,
                &shown,
                &hash,
                PluginTrustLevel::Blocked,
                "plugin hash is blacklisted",
                None,
            );
        }

        let whitelisted = policy.is_whitelisted(&hash);
        if whitelisted && policy.whitelist_bypasses_signature {
            return self.accept(&shown, &hash, PluginTrustLevel::Trusted, "Plugin loaded (whitelisted)", None);
        }

        let metadata = match PluginMetadata::load_for(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(
                    target: "strata::accel::security",
                    path = %shown,
                    error = %e,
                    "Unreadable plugin metadata treated as absent"
                );
                None
            }
        };

        let Some(metadata) = metadata else {
            return self.verify_unsigned(&policy, &shown, &hash, whitelisted);
        };

        if policy.verify_file_hash
            && !metadata.signature.sha256.is_empty()
            && !metadata.signature.sha256.eq_ignore_ascii_case(&hash)
        {
            let message = format!(
                "file hash does not match metadata (declared {})",
                metadata.signature.sha256
            );
            return self.reject(
                SecurityEventKind::HashMismatch,
                Severity::Critical,
                &shown,
                &hash,
                PluginTrustLevel::Blocked,
                message,
                Some(metadata),
            );
        }

        let mut verified = false;
        if metadata.signature.is_signed() {
            match check_signature(&policy, &hash, &metadata.signature) {
                Ok(()) => {
                    self.record(
                        SecurityEventKind::SignatureVerified,
                        Severity::Info,
                        &shown,
                        &hash,
                        format!("signature verified (issuer: {})", metadata.signature.issuer),
                    );
                    verified = true;
                }
                Err(failure) => {
                    self.record(failure.kind, failure.severity, &shown, &hash, failure.message.clone());
                    if failure.fatal || policy.require_signature {
                        let trust = if failure.fatal {
                            PluginTrustLevel::Blocked
                        } else {
                            PluginTrustLevel::Untrusted
                        };
                        return VerificationOutcome::new(false, trust, &hash, failure.message, Some(metadata));
                    }
                }
            }
        } else if policy.require_signature && !policy.allow_unsigned {
            return self.reject(
                SecurityEventKind::SignatureVerificationFailed,
                Severity::Error,
                &shown,
                &hash,
                PluginTrustLevel::Untrusted,
                "plugin metadata carries no signature",
                Some(metadata),
            );
        }

        let trust = derive_trust(&policy, &metadata.signature, whitelisted, verified);
        if trust < policy.min_trust_level {
            let message = format!(
                "trust level {} below required {}",
                trust, policy.min_trust_level
            );
            return self.reject(
                SecurityEventKind::PolicyViolation,
                Severity::Warning,
                &shown,
                &hash,
                trust,
                message,
                Some(metadata),
            );
        }

        self.accept(&shown, &hash, trust, "Plugin loaded successfully", Some(metadata))
    }

    fn verify_unsigned(
        &self,
        policy: &PluginSecurityPolicy,
        shown: &str,
        hash: &str,
        whitelisted: bool,
    ) -> VerificationOutcome {
        let trust = if whitelisted {
            PluginTrustLevel::Trusted
        } else {
            PluginTrustLevel::Untrusted
        };
        if policy.allow_unsigned {
            self.record(
                SecurityEventKind::PluginLoaded,
                Severity::Warning,
                shown,
                hash,
                "unsigned plugin accepted by policy".to_string(),
            );
            return VerificationOutcome::new(true, trust, hash, "unsigned plugin allowed", None);
        }
        if policy.require_signature {
            return self.reject(
                SecurityEventKind::SignatureVerificationFailed,
                Severity::Error,
                shown,
                hash,
                trust,
                "plugin metadata not found and a signature is required",
                None,
            );
        }
        if trust < policy.min_trust_level {
            let message = format!(
                "unsigned plugin has trust level {}, {} required",
                trust, policy.min_trust_level
            );
            return self.reject(
                SecurityEventKind::PolicyViolation,
                Severity::Warning,
                shown,
                hash,
                trust,
                message,
                None,
            );
        }
        self.accept(shown, hash, trust, "Plugin loaded without metadata", None)
    }

    fn record(&self, kind: SecurityEventKind, severity: Severity, path: &str, hash: &str, message: String) {
        self.auditor
            .log_event(PluginSecurityEvent::new(kind, path, hash, message, severity));
    }

    #[allow(clippy::too_many_arguments)]
    fn reject(
        &self,
        kind: SecurityEventKind,
        severity: Severity,
        path: &str,
        hash: &str,
        trust: PluginTrustLevel,
        reason: impl Into<String>,
        metadata: Option<PluginMetadata>,
    ) -> VerificationOutcome {
        let reason = reason.into();
        self.record(kind, severity, path, hash, reason.clone());
        VerificationOutcome::new(false, trust, hash, reason, metadata)
    }

    fn accept(
        &self,
        path: &str,
        hash: &str,
        trust: PluginTrustLevel,
        reason: &str,
        metadata: Option<PluginMetadata>,
    ) -> VerificationOutcome {
        self.record(
            SecurityEventKind::PluginLoaded,
            Severity::Info,
            path,
            hash,
            format!("{} (trust: {})", reason, trust),
        );
        VerificationOutcome::new(true, trust, hash, reason, metadata)
    }
}

/// Trust derivation for a plugin that passed the blacklist and hash checks.
fn derive_trust(
    policy: &PluginSecurityPolicy,
    signature: &PluginSignature,
    whitelisted: bool,
    verified: bool,
) -> PluginTrustLevel {
    if whitelisted || (verified && policy.is_trusted_issuer(&signature.issuer)) {
        PluginTrustLevel::Trusted
    } else {
        PluginTrustLevel::Untrusted
    }
}

fn check_signature(
    policy: &PluginSecurityPolicy,
    hash: &str,
    signature: &PluginSignature,
) -> Result<(), SignatureFailure> {
    if !signature.algorithm.eq_ignore_ascii_case(SIGNATURE_ALGORITHM) {
        return Err(SignatureFailure::invalid(format!(
            "unsupported signature algorithm {:?}",
            signature.algorithm
        )));
    }

    let certificate = signature.certificate.trim();
    if certificate.is_empty() {
        return Err(SignatureFailure::invalid("signature has no certificate"));
    }

    if policy.check_revocation && policy.revoked_certificates.iter().any(|c| c.trim() == certificate) {
        return Err(SignatureFailure {
            kind: SecurityEventKind::CertificateRevoked,
            severity: Severity::Critical,
            message: format!("signing certificate revoked (subject: {})", signature.subject),
            fatal: true,
        });
    }

    if !policy.trusted_certificates.iter().any(|c| c.trim() == certificate) {
        return Err(SignatureFailure::invalid("signing certificate is not pinned as trusted"));
    }

    let now = chrono::Utc::now().timestamp();
    if signature.timestamp > now + MAX_CLOCK_SKEW_SECS {
        return Err(SignatureFailure::invalid("signature timestamp is in the future"));
    }
    if policy.signature_validity_days > 0 {
        let expires = signature
            .timestamp
            .saturating_add(i64::from(policy.signature_validity_days) * SECS_PER_DAY);
        if expires < now {
            return Err(SignatureFailure {
                kind: SecurityEventKind::CertificateExpired,
                severity: Severity::Error,
                message: format!(
                    "signature expired {} day(s) ago",
                    (now - expires) / SECS_PER_DAY
                ),
                fatal: false,
            });
        }
    }

    let key_bytes: [u8; 32] = BASE64
        .decode(certificate)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| SignatureFailure::invalid("certificate is not a base64 Ed25519 public key"))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| SignatureFailure::invalid(format!("invalid public key: {}", e)))?;

    let sig_bytes: [u8; 64] = BASE64
        .decode(signature.signature.trim())
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| SignatureFailure::invalid("signature is not a base64 Ed25519 signature"))?;
    let digest =
        hex::decode(hash).map_err(|e| SignatureFailure::invalid(format!("bad digest: {}", e)))?;

    key.verify_strict(&digest, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| SignatureFailure::invalid("signature does not match plugin contents"))
}
