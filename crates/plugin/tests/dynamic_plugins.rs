//! Loading real plugin libraries built from the fixture crates under
//! `crates/plugin/fixtures`.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use once_cell::sync::Lazy;
use strata_accel_core::{AccelError, ComputeBackend, DistanceMetric, VectorBackend};
use strata_accel_plugin::policy::DEFAULT_TRUSTED_ISSUER;
use strata_accel_plugin::{
    certificate_for, hash_file, sign_plugin, write_metadata, PluginLoader, PluginMetadata,
    PluginSecurityAuditor, PluginSecurityPolicy, PluginSecurityVerifier, PluginTrustLevel,
    SecurityEventKind, SignerIdentity,
};

const SAMPLE: &str = "strata_accel_fixture_sample";
const STALE_ABI: &str = "strata_accel_fixture_stale_abi";

/// Output directory of the fixture build. Built once per test binary, into a
/// target dir of its own so the outer cargo lock is never contended.
static FIXTURES: Lazy<PathBuf> = Lazy::new(|| {
    let target = Path::new(env!("CARGO_TARGET_TMPDIR")).join("plugin-fixtures");
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../Cargo.toml");
    let mut cargo = Command::new(env!("CARGO"));
    cargo
        .args(["build", "--quiet"])
        .args(["-p", "strata-accel-fixture-sample"])
        .args(["-p", "strata-accel-fixture-stale-abi"])
        .arg("--manifest-path")
        .arg(&manifest)
        .env("CARGO_TARGET_DIR", &target);
    let profile = if cfg!(debug_assertions) {
        "debug"
    } else {
        cargo.arg("--release");
        "release"
    };
    let status = cargo.status().expect("cargo is runnable");
    assert!(status.success(), "building plugin fixtures failed");
    target.join(profile)
});

fn library_file(lib: &str) -> String {
    format!("{}{}{}", DLL_PREFIX, lib, DLL_SUFFIX)
}

/// Copy fixture `lib` into `dir` and return the copy's path.
fn fixture(dir: &Path, lib: &str) -> PathBuf {
    let file = library_file(lib);
    let path = dir.join(&file);
    std::fs::copy(FIXTURES.join(&file), &path).unwrap();
    path
}

fn loader(policy: PluginSecurityPolicy) -> PluginLoader {
    PluginLoader::new(Arc::new(PluginSecurityVerifier::new(
        policy,
        Arc::new(PluginSecurityAuditor::new()),
    )))
}

#[test]
fn signed_library_loads_and_serves_backends() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(dir.path(), SAMPLE);
    let key = SigningKey::from_bytes(&[9u8; 32]);
    let meta = sign_plugin(
        &path,
        &key,
        &SignerIdentity::new(DEFAULT_TRUSTED_ISSUER, "CN=sample"),
        PluginMetadata {
            name: "sample".into(),
            version: "0.4.2".into(),
            ..Default::default()
        },
    )
    .unwrap();
    write_metadata(&path, &meta).unwrap();

    let loader = loader(PluginSecurityPolicy {
        trusted_certificates: vec![certificate_for(&key)],
        ..PluginSecurityPolicy::default()
    });
    assert_eq!(loader.load_plugin(&path).unwrap(), "sample");

    let info = loader.get_plugin("sample").unwrap();
    assert_eq!(info.version, "0.4.2");
    assert_eq!(info.trust_level, Some(PluginTrustLevel::Trusted));
    assert_eq!(info.hash, Some(hash_file(&path).unwrap()));
    assert_eq!(info.path, Some(std::fs::canonicalize(&path).unwrap()));

    let backends = loader.instantiate("sample").unwrap();
    assert_eq!(backends.count(), 2);
    assert!(backends.graph.is_none());
    assert!(backends.library.is_dynamic());

    let vector = backends.vector.clone().unwrap();
    vector.initialize().unwrap();
    let distances = vector
        .compute_distances(&[0.0, 0.0], &[3.0, 4.0], 2, DistanceMetric::L2)
        .unwrap();
    assert!((distances[0] - 5.0).abs() < 1e-6);

    drop(backends);
    assert!(loader.unload_plugin("sample").is_err());
    vector.shutdown();
    drop(vector);
    loader.unload_plugin("sample").unwrap();
    assert!(!loader.is_loaded("sample"));

    let kinds: Vec<SecurityEventKind> = loader
        .verifier()
        .auditor()
        .events()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            SecurityEventKind::SignatureVerified,
            SecurityEventKind::PluginLoaded,
            SecurityEventKind::PluginUnloaded,
        ]
    );
}

#[test]
fn foreign_abi_version_rejected_before_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(dir.path(), STALE_ABI);
    let loader = loader(PluginSecurityPolicy::permissive());

    // The fixture's constructor panics, so reaching it would surface as a
    // "constructor panicked" error instead.
    let err = loader.load_plugin(&path).unwrap_err();
    assert!(matches!(err, AccelError::Plugin(_)));
    assert!(err.to_string().contains("ABI version"), "{}", err);
    assert!(loader.loaded_plugins().is_empty());
    assert_eq!(
        loader
            .verifier()
            .auditor()
            .events_of_kind(SecurityEventKind::PluginLoadFailed)
            .len(),
        1
    );
}

#[test]
fn library_stays_mapped_while_backend_outlives_unload() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(dir.path(), SAMPLE);
    let loader = loader(PluginSecurityPolicy::permissive());
    loader.load_plugin(&path).unwrap();

    let geo = loader.instantiate("sample").unwrap().geo.unwrap();
    assert_eq!(loader.unload_all_plugins(), 1);
    assert!(loader.loaded_plugins().is_empty());

    // The backend's code lives in the library; calling it proves the
    // library was not closed with the plugin handle.
    geo.initialize().unwrap();
    assert!(geo.is_available());
    geo.shutdown();
    drop(geo);
}

#[test]
fn directory_scan_loads_sample_and_skips_foreign_abi() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), SAMPLE);
    fixture(dir.path(), STALE_ABI);

    let loader = loader(PluginSecurityPolicy::permissive());
    assert_eq!(loader.load_directory(dir.path()), vec!["sample".to_string()]);
    assert_eq!(loader.unload_all_plugins(), 1);
}
