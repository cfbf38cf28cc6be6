//! Plugin trust levels and the security policy applied at verification.

use serde::{Deserialize, Serialize};

/// Outcome of verification, ordered `Blocked < Untrusted < Trusted`.
///
/// Derived on every verification pass and never stored, so revoking an
/// issuer or certificate takes effect on the next load of every plugin it
/// signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginTrustLevel {
    /// Explicitly blocked (blacklisted or tampered)
    Blocked,
    /// No verified signature from a trusted issuer
    Untrusted,
    /// Whitelisted, or signed by a trusted issuer with a pinned certificate
    Trusted,
}

impl std::fmt::Display for PluginTrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PluginTrustLevel::Blocked => "blocked",
            PluginTrustLevel::Untrusted => "untrusted",
            PluginTrustLevel::Trusted => "trusted",
        })
    }
}

/// Issuer accepted by the default policy.
pub const DEFAULT_TRUSTED_ISSUER: &str = "CN=Strata Official Plugins, O=Strata";

/// Verification policy. Loaded from the `[security]` section of the
/// acceleration config; absent fields take the defaults below.
///
/// Hash lists hold lowercase hex SHA-256 digests. Certificates are the
/// base64 Ed25519 public keys found in the metadata `certificate` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSecurityPolicy {
    /// Reject plugins without a valid signature
    pub require_signature: bool,
    /// Accept plugins without metadata even when a signature is required
    pub allow_unsigned: bool,
    /// Compare the file hash with the hash declared in metadata
    pub verify_file_hash: bool,
    /// Consult `revoked_certificates`
    pub check_revocation: bool,
    /// Minimum trust level for acceptance
    pub min_trust_level: PluginTrustLevel,
    /// Issuer substrings considered trusted
    pub trusted_issuers: Vec<String>,
    /// Pinned signing certificates
    pub trusted_certificates: Vec<String>,
    /// Revoked signing certificates
    pub revoked_certificates: Vec<String>,
    /// Hashes that are always rejected
    pub blacklisted_hashes: Vec<String>,
    /// Hashes that are administratively approved
    pub whitelisted_hashes: Vec<String>,
    /// Days a signature stays valid after its timestamp; 0 disables expiry
    pub signature_validity_days: u32,
    /// Whitelisted hashes skip metadata, signature and trust checks
    pub whitelist_bypasses_signature: bool,
    /// Events the audit log retains before evicting the oldest; 0 keeps all
    pub max_audit_events: usize,
}

impl Default for PluginSecurityPolicy {
    fn default() -> Self {
        Self {
            require_signature: true,
            allow_unsigned: false,
            verify_file_hash: true,
            check_revocation: true,
            min_trust_level: PluginTrustLevel::Trusted,
            trusted_issuers: vec![DEFAULT_TRUSTED_ISSUER.to_string()],
            trusted_certificates: Vec::new(),
            revoked_certificates: Vec::new(),
            blacklisted_hashes: Vec::new(),
            whitelisted_hashes: Vec::new(),
            signature_validity_days: 365,
            whitelist_bypasses_signature: true,
            max_audit_events: 0,
        }
    }
}

impl PluginSecurityPolicy {
    /// Development policy: unsigned plugins load, blacklist still applies.
    pub fn permissive() -> Self {
        Self {
            require_signature: false,
            allow_unsigned: true,
            min_trust_level: PluginTrustLevel::Untrusted,
            ..Self::default()
        }
    }

    /// True when `hash` is blacklisted (case-insensitive).
    pub fn is_blacklisted(&self, hash: &str) -> bool {
        contains_hash(&self.blacklisted_hashes, hash)
    }

    /// True when `hash` is whitelisted (case-insensitive).
    pub fn is_whitelisted(&self, hash: &str) -> bool {
        contains_hash(&self.whitelisted_hashes, hash)
    }

    /// True when `issuer` contains any trusted issuer string.
    pub fn is_trusted_issuer(&self, issuer: &str) -> bool {
        !issuer.is_empty()
            && self
                .trusted_issuers
                .iter()
                .any(|trusted| !trusted.is_empty() && issuer.contains(trusted.as_str()))
    }

    /// Add `hash` to the blacklist.
    pub fn blacklist(&mut self, hash: &str) {
        push_unique(&mut self.blacklisted_hashes, hash);
    }

    /// Add `hash` to the whitelist.
    pub fn whitelist(&mut self, hash: &str) {
        push_unique(&mut self.whitelisted_hashes, hash);
    }

    /// Remove `hash` from the blacklist.
    pub fn remove_from_blacklist(&mut self, hash: &str) {
        self.blacklisted_hashes.retain(|h| !h.eq_ignore_ascii_case(hash));
    }

    /// Remove `hash` from the whitelist.
    pub fn remove_from_whitelist(&mut self, hash: &str) {
        self.whitelisted_hashes.retain(|h| !h.eq_ignore_ascii_case(hash));
    }
}

fn contains_hash(list: &[String], hash: &str) -> bool {
    !hash.is_empty() && list.iter().any(|h| h.eq_ignore_ascii_case(hash))
}

fn push_unique(list: &mut Vec<String>, hash: &str) {
    if !contains_hash(list, hash) {
        list.push(hash.to_ascii_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = PluginSecurityPolicy::default();
        assert!(policy.require_signature);
        assert!(!policy.allow_unsigned);
        assert!(policy.verify_file_hash);
        assert_eq!(policy.min_trust_level, PluginTrustLevel::Trusted);
        assert!(policy.is_trusted_issuer("CN=Strata Official Plugins, O=Strata, C=US"));
        assert!(!policy.is_trusted_issuer(""));
    }

    #[test]
    fn test_trust_ordering() {
        assert!(PluginTrustLevel::Blocked < PluginTrustLevel::Untrusted);
        assert!(PluginTrustLevel::Untrusted < PluginTrustLevel::Trusted);
    }

    #[test]
    fn test_hash_lists_are_case_insensitive_and_unique() {
        let mut policy = PluginSecurityPolicy::default();
        policy.blacklist("ABCD");
        policy.blacklist("abcd");
        assert_eq!(policy.blacklisted_hashes, vec!["abcd".to_string()]);
        assert!(policy.is_blacklisted("AbCd"));
        policy.remove_from_blacklist("ABCD");
        assert!(!policy.is_blacklisted("abcd"));
        assert!(!policy.is_whitelisted(""));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let policy: PluginSecurityPolicy =
            serde_json::from_str(r#"{"allow_unsigned": true, "min_trust_level": "untrusted"}"#)
                .unwrap();
        assert!(policy.allow_unsigned);
        assert!(policy.require_signature);
        assert_eq!(policy.min_trust_level, PluginTrustLevel::Untrusted);
        assert_eq!(policy.signature_validity_days, 365);
    }
}
