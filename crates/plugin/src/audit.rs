//! Append-only audit trail of plugin security decisions.
//!
//! The auditor is independent of any verifier so history survives policy
//! changes. Events are mirrored to `tracing` under `strata::accel::security`
//! and can be exported as JSON for SIEM ingestion.
//!
//! The log is unbounded unless a retention limit is set, in which case the
//! oldest events are evicted first. Long-running hosts that rescan plugin
//! directories should set one and export before it is reached.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strata_accel_core::{AccelError, AccelResult};

/// Kind of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    /// Plugin passed verification (or was loaded)
    PluginLoaded,
    /// Plugin could not be read, loaded or instantiated
    PluginLoadFailed,
    /// Plugin was unloaded from the process
    PluginUnloaded,
    /// Signature checked successfully
    SignatureVerified,
    /// Signature missing, malformed or invalid
    SignatureVerificationFailed,
    /// File hash differs from the hash declared in metadata
    HashMismatch,
    /// File hash is blacklisted
    Blacklisted,
    /// Signing certificate is on the revocation list
    CertificateRevoked,
    /// Signature is older than the policy's validity window
    CertificateExpired,
    /// Trust level below the policy minimum
    PolicyViolation,
}

impl SecurityEventKind {
    /// Wire name, as written by [`PluginSecurityAuditor::export_events`]
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::PluginLoaded => "PLUGIN_LOADED",
            SecurityEventKind::PluginLoadFailed => "PLUGIN_LOAD_FAILED",
            SecurityEventKind::PluginUnloaded => "PLUGIN_UNLOADED",
            SecurityEventKind::SignatureVerified => "SIGNATURE_VERIFIED",
            SecurityEventKind::SignatureVerificationFailed => "SIGNATURE_VERIFICATION_FAILED",
            SecurityEventKind::HashMismatch => "HASH_MISMATCH",
            SecurityEventKind::Blacklisted => "BLACKLISTED",
            SecurityEventKind::CertificateRevoked => "CERTIFICATE_REVOKED",
            SecurityEventKind::CertificateExpired => "CERTIFICATE_EXPIRED",
            SecurityEventKind::PolicyViolation => "POLICY_VIOLATION",
        }
    }
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a security event, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational
    Info,
    /// Suspicious but not blocking on its own
    Warning,
    /// Verification or load failure
    Error,
    /// Tampering indicator or explicit block
    Critical,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSecurityEvent {
    /// Event kind
    #[serde(rename = "type")]
    pub kind: SecurityEventKind,
    /// Plugin file path as given to the verifier or loader
    pub plugin_path: String,
    /// Hex SHA-256 of the file, empty when not computed
    pub plugin_hash: String,
    /// Human-readable description
    pub message: String,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    /// Severity
    pub severity: Severity,
}

impl PluginSecurityEvent {
    /// Event stamped with the current time.
    pub fn new(
        kind: SecurityEventKind,
        plugin_path: impl Into<String>,
        plugin_hash: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            kind,
            plugin_path: plugin_path.into(),
            plugin_hash: plugin_hash.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp(),
            severity,
        }
    }
}

#[derive(Serialize)]
struct Export<'a> {
    events: &'a VecDeque<PluginSecurityEvent>,
}

static GLOBAL: Lazy<Arc<PluginSecurityAuditor>> =
    Lazy::new(|| Arc::new(PluginSecurityAuditor::new()));

/// In-memory, append-only event log.
#[derive(Debug, Default)]
pub struct PluginSecurityAuditor {
    events: RwLock<VecDeque<PluginSecurityEvent>>,
    // 0 = unbounded
    max_events: AtomicUsize,
    evicted: AtomicU64,
}

impl PluginSecurityAuditor {
    /// Empty, unbounded auditor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty auditor retaining at most `max_events` events (0 = unbounded).
    pub fn with_max_events(max_events: usize) -> Self {
        let auditor = Self::new();
        auditor.set_max_events(max_events);
        auditor
    }

    /// Change the retention limit, evicting the oldest events right away if
    /// the log is already longer. 0 makes the log unbounded.
    pub fn set_max_events(&self, max_events: usize) {
        self.max_events.store(max_events, Ordering::Relaxed);
        let mut events = self.events.write();
        self.evict(&mut events, max_events);
    }

    /// Current retention limit, 0 when unbounded
    pub fn max_events(&self) -> usize {
        self.max_events.load(Ordering::Relaxed)
    }

    /// Events dropped so far to stay within the retention limit
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn evict(&self, events: &mut VecDeque<PluginSecurityEvent>, max_events: usize) {
        if max_events == 0 || events.len() <= max_events {
            return;
        }
        let excess = events.len() - max_events;
        events.drain(..excess);
        self.evicted.fetch_add(excess as u64, Ordering::Relaxed);
        tracing::debug!(
            target: "strata::accel::security",
            evicted = excess,
            retained = max_events,
            "Evicted oldest security events"
        );
    }

    /// Process-wide auditor, for call sites without an injected one.
    pub fn global() -> Arc<PluginSecurityAuditor> {
        Arc::clone(&GLOBAL)
    }

    /// Append `event` and mirror it to the process log.
    pub fn log_event(&self, event: PluginSecurityEvent) {
        match event.severity {
            Severity::Info => tracing::info!(
                target: "strata::accel::security",
                kind = %event.kind,
                path = %event.plugin_path,
                hash = %event.plugin_hash,
                "{}",
                event.message
            ),
            Severity::Warning => tracing::warn!(
                target: "strata::accel::security",
                kind = %event.kind,
                path = %event.plugin_path,
                hash = %event.plugin_hash,
                "{}",
                event.message
            ),
            Severity::Error | Severity::Critical => tracing::error!(
                target: "strata::accel::security",
                kind = %event.kind,
                severity = ?event.severity,
                path = %event.plugin_path,
                hash = %event.plugin_hash,
                "{}",
                event.message
            ),
        }
        let mut events = self.events.write();
        events.push_back(event);
        self.evict(&mut events, self.max_events());
    }

    /// Snapshot of every event, oldest first.
    pub fn events(&self) -> Vec<PluginSecurityEvent> {
        self.events.read().iter().cloned().collect()
    }

    /// Events recorded for `plugin_path`.
    pub fn events_for_plugin(&self, plugin_path: &str) -> Vec<PluginSecurityEvent> {
        self.filtered(|e| e.plugin_path == plugin_path)
    }

    /// Events of one kind.
    pub fn events_of_kind(&self, kind: SecurityEventKind) -> Vec<PluginSecurityEvent> {
        self.filtered(|e| e.kind == kind)
    }

    /// Events at `severity` or above.
    pub fn events_at_least(&self, severity: Severity) -> Vec<PluginSecurityEvent> {
        self.filtered(|e| e.severity >= severity)
    }

    /// Most recent event for `plugin_path`.
    pub fn last_event_for(&self, plugin_path: &str) -> Option<PluginSecurityEvent> {
        self.events
            .read()
            .iter()
            .rev()
            .find(|e| e.plugin_path == plugin_path)
            .cloned()
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True when nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Write the log as `{"events": [..]}` to `path`.
    pub fn export_events(&self, path: &Path) -> AccelResult<()> {
        let events = self.events.read();
        let json = serde_json::to_string_pretty(&Export { events: &events })
            .map_err(|e| AccelError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        tracing::info!(
            target: "strata::accel::security",
            path = %path.display(),
            count = events.len(),
            "Exported security events"
        );
        Ok(())
    }

    /// Drop all events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    fn filtered(&self, keep: impl Fn(&PluginSecurityEvent) -> bool) -> Vec<PluginSecurityEvent> {
        self.events.read().iter().filter(|e| keep(e)).cloned().collect()
    }
}
