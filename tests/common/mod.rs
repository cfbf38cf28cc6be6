//! Shared helpers for the acceleration integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub use strata_accel::core::{
    AccelError, AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend,
    CsrGraph, DistanceMetric, GeoFormula, KnnResults, Lifecycle, VectorBackend,
};
pub use strata_accel::plugin::{
    PluginSecurityAuditor, PluginSecurityPolicy, PluginTrustLevel, SecurityEventKind,
};
pub use strata_accel::registry::{AccelConfig, BackendRegistry, Capability, RejectionKind};

/// Route `tracing` output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strata::accel=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Config with GPU detection and plugin scanning off, so tests see only the
/// built-in CPU backends unless they register more.
pub fn cpu_only_config() -> AccelConfig {
    let mut config = AccelConfig::default();
    config.gpu.enabled = false;
    config.plugins.auto_detect = false;
    config
}

/// Registry with its own auditor so events from other tests never leak in.
pub fn isolated_registry(config: AccelConfig) -> BackendRegistry {
    BackendRegistry::with_auditor(config, Arc::new(PluginSecurityAuditor::new()))
}

/// `n` row-major vectors of dimension `dim`, deterministic per `seed`.
pub fn random_vectors(seed: u64, n: usize, dim: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// File name the plugin loader recognizes on this platform.
pub fn plugin_file_name(stem: &str) -> String {
    format!("strata_accel_{}.{}", stem, std::env::consts::DLL_EXTENSION)
}

/// Vector backend that reports a GPU technology and fails every operation
/// with a device error, like a GPU whose dispatch broke after registration.
pub struct FlakyGpu {
    pub backend_type: BackendType,
    lifecycle: Lifecycle,
}

impl FlakyGpu {
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            lifecycle: Lifecycle::new(),
        }
    }
}

impl ComputeBackend for FlakyGpu {
    fn name(&self) -> &str {
        "flaky-gpu"
    }

    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn is_available(&self) -> bool {
        true
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::vector("Flaky GPU").with_device(1 << 30, 16)
    }

    fn initialize(&self) -> AccelResult<()> {
        self.lifecycle.initialize_with(|| Ok(()))
    }

    fn shutdown(&self) {
        self.lifecycle.shutdown_with(|| {});
    }

    fn state(&self) -> BackendState {
        self.lifecycle.state()
    }
}

impl VectorBackend for FlakyGpu {
    fn compute_distances(
        &self,
        _queries: &[f32],
        _vectors: &[f32],
        _dim: usize,
        _metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>> {
        Err(AccelError::device(self.name(), "kernel launch failed"))
    }

    fn batch_knn_search(
        &self,
        _queries: &[f32],
        _vectors: &[f32],
        _dim: usize,
        _k: usize,
        _metric: DistanceMetric,
    ) -> AccelResult<KnnResults> {
        Err(AccelError::device(self.name(), "out of device memory"))
    }
}
