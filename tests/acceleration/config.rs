//! Registries built from `strata-accel.toml`.

use crate::common::*;
use strata_accel::registry::CONFIG_FILE_NAME;

#[test]
fn registry_from_config_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let plugins = dir.path().join("plugins");
    std::fs::create_dir(&plugins).unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        format!(
            r#"
[cpu]
strategy = "simd"

[gpu]
enabled = false

[plugins]
search_dirs = ["{}"]

[security]
allow_unsigned = true
min_trust_level = "untrusted"
"#,
            plugins.display().to_string().replace('\\', "\\\\")
        ),
    )
    .unwrap();

    let config = AccelConfig::from_file(&path).unwrap();
    let registry = isolated_registry(config);
    assert_eq!(registry.get_best_vector_backend().unwrap().name(), "cpu-simd");
    assert_eq!(registry.plugin_search_dirs()[0], plugins);
    assert!(registry.verifier().policy().allow_unsigned);

    let summary = registry.auto_detect();
    assert_eq!(summary.gpu_backends, 0);
    assert_eq!(summary.total_backends, 3);
}

#[test]
fn default_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    AccelConfig::write_default_if_missing(&path).unwrap();
    assert_eq!(AccelConfig::from_file(&path).unwrap(), AccelConfig::default());
}

#[test]
fn disabled_gpu_backends_never_register() {
    let mut config = cpu_only_config();
    config.gpu.enabled = true;
    config.gpu.disabled_backends = BackendType::PRIORITY
        .iter()
        .filter(|t| t.is_gpu())
        .map(|t| t.as_str().to_string())
        .collect();
    config.validate().unwrap();

    let registry = isolated_registry(config);
    assert_eq!(registry.detect_gpu_backends(), 0);
    assert_eq!(registry.available_backends(), vec![BackendType::Cpu]);
}

#[test]
fn runtime_policy_change_applies_to_next_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(plugin_file_name("late"));
    std::fs::write(&path, b"not a library").unwrap();

    let registry = isolated_registry(cpu_only_config());
    assert!(matches!(
        registry.load_plugin(&path),
        Err(AccelError::PolicyRejected(_))
    ));

    registry.verifier().set_policy(PluginSecurityPolicy::permissive());
    // Verification now passes; loading still fails because the file is junk.
    assert!(matches!(registry.load_plugin(&path), Err(AccelError::Plugin(_))));
    assert_eq!(
        registry.capability_report().rejected_plugins[0].kind,
        RejectionKind::LoadFailed
    );
}
