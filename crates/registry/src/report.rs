//! Capability report for admin tooling.
//!
//! Answers two questions: which backends are registered, and why the others
//! are not (unavailable hardware, blocked plugin, unverified plugin, failed
//! load). Plugin outcomes come from the security auditor's history.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use strata_accel_core::{AccelError, AccelResult, BackendCapabilities, BackendType};
use strata_accel_plugin::{PluginInfo, PluginSecurityEvent, SecurityEventKind, Severity};

/// Operation family a backend is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Distance matrices and KNN
    Vector,
    /// BFS and shortest path
    Graph,
    /// Geodesic distance and containment
    Geo,
}

impl Capability {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Vector => "vector",
            Capability::Graph => "graph",
            Capability::Geo => "geo",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered backend.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredBackend {
    /// Operation family
    pub capability: Capability,
    /// Backend name
    pub name: String,
    /// Technology
    pub backend_type: BackendType,
    /// Producing plugin, `None` for built-in backends
    pub plugin: Option<String>,
    /// Fresh capability record
    pub capabilities: BackendCapabilities,
}

/// A backend that was considered but not registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableBackend {
    /// Technology
    pub backend_type: BackendType,
    /// Backend name
    pub name: String,
    /// Why it was not registered
    pub reason: String,
}

/// Why a plugin file is not loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Blacklisted, tampered or signed with a revoked certificate
    Blocked,
    /// Signature missing, invalid or expired, or trust too low
    Unverified,
    /// Verified but could not be loaded
    LoadFailed,
}

/// A plugin file whose latest audit outcome is a rejection.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedPlugin {
    /// Plugin file path
    pub path: PathBuf,
    /// Classification
    pub kind: RejectionKind,
    /// Audit event kind
    pub event: SecurityEventKind,
    /// Audit message
    pub message: String,
}

/// Snapshot of the registry's state.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    /// Registered backends in priority order
    pub registered: Vec<RegisteredBackend>,
    /// Backends that probed unavailable or failed to initialize
    pub unavailable: Vec<UnavailableBackend>,
    /// Loaded plugins
    pub plugins: Vec<PluginInfo>,
    /// Plugin files that were rejected
    pub rejected_plugins: Vec<RejectedPlugin>,
}

impl CapabilityReport {
    /// Pretty JSON rendering.
    pub fn to_json(&self) -> AccelResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| AccelError::Serialization(e.to_string()))
    }
}

fn classify(event: &PluginSecurityEvent) -> Option<RejectionKind> {
    match event.kind {
        SecurityEventKind::PluginLoaded
        | SecurityEventKind::SignatureVerified
        | SecurityEventKind::PluginUnloaded => None,
        SecurityEventKind::Blacklisted
        | SecurityEventKind::HashMismatch
        | SecurityEventKind::CertificateRevoked => Some(RejectionKind::Blocked),
        SecurityEventKind::SignatureVerificationFailed
        | SecurityEventKind::CertificateExpired
        | SecurityEventKind::PolicyViolation => Some(RejectionKind::Unverified),
        SecurityEventKind::PluginLoadFailed if event.severity >= Severity::Error => {
            Some(RejectionKind::LoadFailed)
        }
        SecurityEventKind::PluginLoadFailed => None,
    }
}

/// Plugin files whose most recent audit event is a rejection.
pub(crate) fn rejected_plugins(events: &[PluginSecurityEvent]) -> Vec<RejectedPlugin> {
    let mut latest: BTreeMap<&str, &PluginSecurityEvent> = BTreeMap::new();
    for event in events {
        latest.insert(event.plugin_path.as_str(), event);
    }
    latest
        .into_iter()
        .filter_map(|(path, event)| {
            classify(event).map(|kind| RejectedPlugin {
                path: PathBuf::from(path),
                kind,
                event: event.kind,
                message: event.message.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: SecurityEventKind, path: &str, severity: Severity) -> PluginSecurityEvent {
        PluginSecurityEvent::new(kind, path, "", "m", severity)
    }

    #[test]
    fn test_latest_event_decides() {
        let events = vec![
            event(SecurityEventKind::PolicyViolation, "/a.so", Severity::Warning),
            event(SecurityEventKind::PluginLoaded, "/a.so", Severity::Info),
            event(SecurityEventKind::Blacklisted, "/b.so", Severity::Critical),
            event(SecurityEventKind::PluginLoaded, "/c.so", Severity::Warning),
            event(SecurityEventKind::PluginLoadFailed, "/c.so", Severity::Error),
            event(SecurityEventKind::SignatureVerificationFailed, "/d.so", Severity::Error),
        ];
        let rejected = rejected_plugins(&events);
        let summary: Vec<(&str, RejectionKind)> = rejected
            .iter()
            .map(|r| (r.path.to_str().unwrap(), r.kind))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("/b.so", RejectionKind::Blocked),
                ("/c.so", RejectionKind::LoadFailed),
                ("/d.so", RejectionKind::Unverified),
            ]
        );
    }
}
