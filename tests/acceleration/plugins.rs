//! Plugins through the registry: static adoption and file verification.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use strata_accel::cpu::{CpuGraphBackend, ScalarVectorBackend};
use strata_accel::plugin::policy::DEFAULT_TRUSTED_ISSUER;
use strata_accel::plugin::{
    certificate_for, hash_file, sign_plugin, write_metadata, PluginMetadata, SignerIdentity,
};
use strata_accel::{BackendPlugin, GraphBackend};

use crate::common::*;

struct GraphOnly;

impl BackendPlugin for GraphOnly {
    fn plugin_name(&self) -> &str {
        "graph-only"
    }

    fn plugin_version(&self) -> &str {
        "2.1.0"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn create_graph_backend(&self) -> Option<Arc<dyn GraphBackend>> {
        Some(Arc::new(CpuGraphBackend::new()))
    }
}

/// Re-offers the built-in scalar backend, which the registry already holds.
struct Duplicate;

impl BackendPlugin for Duplicate {
    fn plugin_name(&self) -> &str {
        "duplicate"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn create_vector_backend(&self) -> Option<Arc<dyn VectorBackend>> {
        Some(Arc::new(ScalarVectorBackend::new()))
    }
}

fn write_plugin(dir: &Path, stem: &str, body: &[u8]) -> PathBuf {
    let path = dir.join(plugin_file_name(stem));
    std::fs::write(&path, body).unwrap();
    path
}

fn scalar_config() -> AccelConfig {
    let mut config = cpu_only_config();
    config.cpu.strategy = strata_accel::cpu::CpuStrategy::Scalar;
    config
}

#[test]
fn static_plugin_listed_when_its_backends_duplicate_builtins() {
    let registry = isolated_registry(cpu_only_config());
    assert_eq!(registry.register_static_plugin(Box::new(GraphOnly)).unwrap(), 0);

    // Equal to the built-in graph backend, so it is discarded as a duplicate.
    let report = registry.capability_report();
    assert_eq!(report.plugins.len(), 1);
    assert_eq!(report.plugins[0].version, "2.1.0");
    assert!(report.plugins[0].path.is_none());
    assert!(report.registered.iter().all(|r| r.plugin.is_none()));

    registry.unload_plugin("graph-only").unwrap();
}

#[test]
fn duplicate_plugin_backend_discarded() {
    let registry = isolated_registry(scalar_config());
    assert_eq!(registry.register_static_plugin(Box::new(Duplicate)).unwrap(), 0);
    assert_eq!(registry.backend_count(), 3);
    assert!(registry.register_static_plugin(Box::new(Duplicate)).is_err());
}

#[test]
fn blacklisted_file_reported_as_blocked() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_plugin(dir.path(), "evil", b"malicious payload");

    let mut config = cpu_only_config();
    config.security.blacklist(&hash_file(&path).unwrap());
    let registry = isolated_registry(config);

    assert!(matches!(
        registry.load_plugin(&path),
        Err(AccelError::PolicyRejected(_))
    ));
    let report = registry.capability_report();
    assert_eq!(report.rejected_plugins.len(), 1);
    assert_eq!(report.rejected_plugins[0].kind, RejectionKind::Blocked);
    assert_eq!(report.rejected_plugins[0].event, SecurityEventKind::Blacklisted);
}

#[test]
fn verified_file_that_is_not_a_library_fails_to_load() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_plugin(dir.path(), "signed", b"signed but not a shared object");
    let key = SigningKey::from_bytes(&[7u8; 32]);
    let meta = sign_plugin(
        &path,
        &key,
        &SignerIdentity::new(DEFAULT_TRUSTED_ISSUER, "CN=signed"),
        PluginMetadata {
            name: "signed".into(),
            version: "1.0.0".into(),
            ..Default::default()
        },
    )
    .unwrap();
    write_metadata(&path, &meta).unwrap();

    let mut config = cpu_only_config();
    config.security.trusted_certificates = vec![certificate_for(&key)];
    let registry = isolated_registry(config);

    let outcome = registry.verifier().verify_plugin(&path);
    assert!(outcome.accepted);
    assert_eq!(outcome.trust_level, PluginTrustLevel::Trusted);

    assert!(matches!(registry.load_plugin(&path), Err(AccelError::Plugin(_))));
    let report = registry.capability_report();
    assert!(report.plugins.is_empty());
    assert_eq!(report.rejected_plugins[0].kind, RejectionKind::LoadFailed);
}

#[test]
fn directory_scan_reports_each_rejection() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "a", b"unsigned a");
    write_plugin(dir.path(), "b", b"unsigned b");
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let registry = isolated_registry(cpu_only_config());
    assert_eq!(registry.load_plugins(dir.path()), 0);

    let report = registry.capability_report();
    assert_eq!(report.rejected_plugins.len(), 2);
    assert!(report
        .rejected_plugins
        .iter()
        .all(|r| r.kind == RejectionKind::Unverified));
}

#[test]
fn audit_trail_exports_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_plugin(dir.path(), "unsigned", b"unsigned");
    let registry = isolated_registry(cpu_only_config());
    let _ = registry.load_plugin(&path);

    let export = dir.path().join("audit.json");
    registry.auditor().export_events(&export).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "SIGNATURE_VERIFICATION_FAILED");
    assert_eq!(events[0]["severity"], "ERROR");
}
