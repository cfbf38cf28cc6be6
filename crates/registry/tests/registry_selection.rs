//! Registry selection, registration gating and plugin lifecycle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use strata_accel_core::{
    AccelError, AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend,
    DistanceMetric, GeoBackend, KnnResults, Lifecycle, VectorBackend,
};
use strata_accel_cpu::{CpuGeoBackend, CpuStrategy, ScalarVectorBackend};
use strata_accel_plugin::{
    BackendPlugin, PluginSecurityAuditor, PluginSecurityPolicy, SecurityEventKind,
};
use strata_accel_registry::{AccelConfig, BackendRegistry, Capability, RejectionKind};

// ============================================================================
// Helpers
// ============================================================================

/// Vector backend reporting an arbitrary technology, computing on the CPU.
struct MockVector {
    name: &'static str,
    backend_type: BackendType,
    available: bool,
    fail_init: bool,
    lifecycle: Lifecycle,
    inner: ScalarVectorBackend,
    shutdowns: Arc<AtomicUsize>,
}

impl MockVector {
    fn new(name: &'static str, backend_type: BackendType) -> Self {
        Self {
            name,
            backend_type,
            available: true,
            fail_init: false,
            lifecycle: Lifecycle::new(),
            inner: ScalarVectorBackend::new(),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }
}

impl ComputeBackend for MockVector {
    fn name(&self) -> &str {
        self.name
    }

    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::vector(format!("mock {}", self.backend_type))
    }

    fn initialize(&self) -> AccelResult<()> {
        if self.fail_init {
            return Err(AccelError::device(self.name, "context creation failed"));
        }
        self.lifecycle.initialize_with(|| self.inner.initialize())
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.lifecycle.shutdown_with(|| self.inner.shutdown());
    }

    fn state(&self) -> BackendState {
        self.lifecycle.state()
    }
}

impl VectorBackend for MockVector {
    fn compute_distances(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>> {
        self.lifecycle.ensure_initialized(self.name)?;
        self.inner.compute_distances(queries, vectors, dim, metric)
    }

    fn batch_knn_search(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        k: usize,
        metric: DistanceMetric,
    ) -> AccelResult<KnnResults> {
        self.lifecycle.ensure_initialized(self.name)?;
        self.inner.batch_knn_search(queries, vectors, dim, k, metric)
    }
}

struct GeoPlugin {
    created: Arc<AtomicBool>,
}

impl BackendPlugin for GeoPlugin {
    fn plugin_name(&self) -> &str {
        "geo-extra"
    }

    fn plugin_version(&self) -> &str {
        "0.3.0"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn create_vector_backend(&self) -> Option<Arc<dyn VectorBackend>> {
        Some(Arc::new(MockVector::new("plugin-vector", BackendType::OpenCl)))
    }

    fn create_geo_backend(&self) -> Option<Arc<dyn GeoBackend>> {
        self.created.store(true, Ordering::SeqCst);
        Some(Arc::new(CpuGeoBackend::new()))
    }
}

fn cpu_only_config() -> AccelConfig {
    let mut config = AccelConfig::default();
    config.gpu.enabled = false;
    config.plugins.auto_detect = false;
    config
}

fn registry_with(config: AccelConfig) -> BackendRegistry {
    BackendRegistry::with_auditor(config, Arc::new(PluginSecurityAuditor::new()))
}

fn registry() -> BackendRegistry {
    registry_with(cpu_only_config())
}

// ============================================================================
// Selection
// ============================================================================

#[test]
fn test_cpu_backends_always_selected() {
    let registry = registry();
    assert_eq!(registry.available_backends(), vec![BackendType::Cpu]);

    let vector = registry.get_best_vector_backend().unwrap();
    assert_eq!(vector.backend_type(), BackendType::Cpu);
    assert_eq!(vector.state(), BackendState::Initialized);
    assert!(registry.get_best_graph_backend().is_some());
    assert!(registry.get_best_geo_backend().is_some());
}

#[test]
fn test_cpu_strategy_follows_config() {
    let mut config = cpu_only_config();
    config.cpu.strategy = CpuStrategy::Scalar;
    let registry = registry_with(config);
    assert_eq!(registry.get_best_vector_backend().unwrap().name(), "cpu-scalar");
}

#[test]
fn test_higher_priority_backend_wins() {
    let registry = registry();
    assert!(registry.register_vector_backend(Arc::new(MockVector::new("opencl", BackendType::OpenCl))));
    assert_eq!(
        registry.get_best_vector_backend().unwrap().backend_type(),
        BackendType::OpenCl
    );

    assert!(registry.register_vector_backend(Arc::new(MockVector::new("cuda", BackendType::Cuda))));
    assert_eq!(
        registry.get_best_vector_backend().unwrap().backend_type(),
        BackendType::Cuda
    );
    // Graph selection is unaffected by vector registrations.
    assert_eq!(
        registry.get_best_graph_backend().unwrap().backend_type(),
        BackendType::Cpu
    );
    assert_eq!(
        registry.available_backends(),
        vec![BackendType::Cuda, BackendType::OpenCl, BackendType::Cpu]
    );
}

#[test]
fn test_get_backend_by_type() {
    let registry = registry();
    assert!(registry.get_backend(BackendType::Metal).is_none());
    registry.register_vector_backend(Arc::new(MockVector::new("metal", BackendType::Metal)));

    let handle = registry.get_backend(BackendType::Metal).unwrap();
    assert_eq!(handle.capability(), Capability::Vector);
    assert_eq!(handle.name(), "metal");
    assert!(handle.as_vector().is_some());
    assert!(handle.as_geo().is_none());

    let cpu = registry.get_backend(BackendType::Cpu).unwrap();
    assert_eq!(cpu.capability(), Capability::Vector);
}

#[test]
fn test_selected_backend_computes() {
    let registry = registry();
    registry.register_vector_backend(Arc::new(MockVector::new("cuda", BackendType::Cuda)));
    let backend = registry.get_best_vector_backend().unwrap();

    let queries = [0.0, 0.0, 1.0, 1.0];
    let vectors = [0.0, 0.0, 3.0, 4.0];
    let distances = backend
        .compute_distances(&queries, &vectors, 2, DistanceMetric::L2)
        .unwrap();
    assert_eq!(distances.len(), 4);
    assert!((distances[1] - 5.0).abs() < 1e-6);
}

// ============================================================================
// Registration gating
// ============================================================================

#[test]
fn test_duplicate_registration_rejected() {
    let registry = registry();
    assert!(registry.register_vector_backend(Arc::new(MockVector::new("cuda", BackendType::Cuda))));
    assert!(!registry.register_vector_backend(Arc::new(MockVector::new("cuda", BackendType::Cuda))));
    assert_eq!(registry.backend_count(), 4);
}

#[test]
fn test_replace_shuts_down_previous() {
    let registry = registry();
    let first = MockVector::new("cuda", BackendType::Cuda);
    let first_shutdowns = Arc::clone(&first.shutdowns);
    let first: Arc<dyn VectorBackend> = Arc::new(first);
    assert!(registry.register_vector_backend(Arc::clone(&first)));

    assert!(registry.replace_vector_backend(Arc::new(MockVector::new("cuda", BackendType::Cuda))));
    assert_eq!(first_shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(first.state(), BackendState::ShutDown);
    assert_eq!(registry.backend_count(), 4);
    assert_eq!(
        registry.get_best_vector_backend().unwrap().state(),
        BackendState::Initialized
    );
}

#[test]
fn test_unavailable_backend_discarded() {
    let registry = registry();
    assert!(!registry.register_vector_backend(Arc::new(
        MockVector::new("hip", BackendType::Hip).unavailable()
    )));
    assert!(!registry.register_vector_backend(Arc::new(
        MockVector::new("cuda", BackendType::Cuda).failing_init()
    )));
    assert_eq!(registry.available_backends(), vec![BackendType::Cpu]);

    let report = registry.capability_report();
    let missing: Vec<BackendType> = report.unavailable.iter().map(|u| u.backend_type).collect();
    assert_eq!(missing, vec![BackendType::Hip, BackendType::Cuda]);
    assert!(report.unavailable[1].reason.contains("context creation failed"));
}

#[test]
fn test_later_registration_clears_unavailable_entry() {
    let registry = registry();
    registry.register_vector_backend(Arc::new(MockVector::new("hip", BackendType::Hip).unavailable()));
    registry.register_vector_backend(Arc::new(MockVector::new("hip", BackendType::Hip)));
    assert!(registry.capability_report().unavailable.is_empty());
}

// ============================================================================
// Plugins
// ============================================================================

#[test]
fn test_static_plugin_lifecycle() {
    let registry = registry();
    let created = Arc::new(AtomicBool::new(false));
    let registered = registry
        .register_static_plugin(Box::new(GeoPlugin {
            created: Arc::clone(&created),
        }))
        .unwrap();
    assert_eq!(registered, 2);
    assert!(created.load(Ordering::SeqCst));
    assert_eq!(
        registry.get_best_vector_backend().unwrap().backend_type(),
        BackendType::OpenCl
    );

    let report = registry.capability_report();
    assert_eq!(report.plugins.len(), 1);
    assert_eq!(report.plugins[0].name, "geo-extra");
    assert!(report
        .registered
        .iter()
        .any(|r| r.plugin.as_deref() == Some("geo-extra") && r.capability == Capability::Geo));

    // A caller still holds a plugin backend: unload is refused.
    let held = registry.get_best_vector_backend().unwrap();
    assert!(registry.unload_plugin("geo-extra").is_err());
    assert_eq!(
        registry.get_best_vector_backend().unwrap().backend_type(),
        BackendType::Cpu
    );
    assert_eq!(held.state(), BackendState::ShutDown);

    drop(held);
    registry.unload_plugin("geo-extra").unwrap();
    assert!(registry.capability_report().plugins.is_empty());
    assert_eq!(registry.backend_count(), 3);
}

#[test]
fn test_rejected_plugin_file_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir
        .path()
        .join(format!("strata_accel_unsigned.{}", std::env::consts::DLL_EXTENSION));
    std::fs::write(&path, b"unsigned").unwrap();

    let registry = registry();
    assert!(matches!(
        registry.load_plugin(&path),
        Err(AccelError::PolicyRejected(_))
    ));
    assert_eq!(registry.load_plugins(dir.path()), 0);

    let report = registry.capability_report();
    assert_eq!(report.rejected_plugins.len(), 1);
    assert_eq!(report.rejected_plugins[0].kind, RejectionKind::Unverified);
    assert_eq!(
        report.rejected_plugins[0].event,
        SecurityEventKind::SignatureVerificationFailed
    );
    assert!(report.to_json().unwrap().contains("rejected_plugins"));
}

#[test]
fn test_unloadable_plugin_reported_as_load_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir
        .path()
        .join(format!("strata_accel_junk.{}", std::env::consts::DLL_EXTENSION));
    std::fs::write(&path, b"not a shared library").unwrap();

    let mut config = cpu_only_config();
    config.security = PluginSecurityPolicy::permissive();
    let registry = registry_with(config);
    assert!(registry.load_plugin(&path).is_err());

    let report = registry.capability_report();
    assert_eq!(report.rejected_plugins.len(), 1);
    assert_eq!(report.rejected_plugins[0].kind, RejectionKind::LoadFailed);
}

// ============================================================================
// Discovery and teardown
// ============================================================================

#[test]
fn test_auto_detect_with_empty_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = cpu_only_config();
    config.plugins.auto_detect = true;
    config.plugins.search_dirs = vec![dir.path().to_path_buf(), dir.path().join("missing")];
    let registry = registry_with(config);

    let dirs = registry.plugin_search_dirs();
    assert_eq!(dirs[0], dir.path());
    assert!(dirs.iter().any(|d| d.ends_with("plugins")));

    let summary = registry.auto_detect();
    assert_eq!(summary.gpu_backends, 0);
    assert_eq!(summary.total_backends, 3);
    assert!(registry.get_best_vector_backend().is_some());
}

#[test]
fn test_disabled_gpu_detection_registers_nothing() {
    let registry = registry();
    assert_eq!(registry.detect_gpu_backends(), 0);
    assert_eq!(registry.available_backends(), vec![BackendType::Cpu]);
}

#[test]
fn test_shutdown_all_idempotent() {
    let registry = registry();
    let mock = MockVector::new("cuda", BackendType::Cuda);
    let shutdowns = Arc::clone(&mock.shutdowns);
    registry.register_vector_backend(Arc::new(mock));
    registry
        .register_static_plugin(Box::new(GeoPlugin {
            created: Arc::new(AtomicBool::new(false)),
        }))
        .unwrap();

    registry.shutdown_all();
    assert!(registry.get_best_vector_backend().is_none());
    assert!(registry.available_backends().is_empty());
    assert!(registry.capability_report().plugins.is_empty());
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

    registry.shutdown_all();
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_selection() {
    let registry = Arc::new(registry());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                if i % 2 == 0 {
                    registry.register_vector_backend(Arc::new(MockVector::new("cuda", BackendType::Cuda)));
                }
                registry.get_best_vector_backend().is_some()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(registry.backend_count(), 4);
}
