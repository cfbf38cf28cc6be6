//! CPU backend family for the Strata acceleration layer
//!
//! - [`ScalarVectorBackend`]: scalar reference for every vector kernel
//! - [`SimdVectorBackend`]: AVX2/NEON kernels selected at runtime
//! - [`ParallelVectorBackend`]: rayon thread pool over SIMD kernels
//! - [`CpuGraphBackend`]: BFS / shortest path over CSR adjacency
//! - [`CpuGeoBackend`]: haversine / vincenty / point-in-polygon
//!
//! The CPU is always available, so these backends are the terminal fallback
//! of registry selection.

#![warn(clippy::all)]

pub mod geo;
pub mod graph;
pub mod simd;
pub mod vector;

pub use geo::CpuGeoBackend;
pub use graph::CpuGraphBackend;
pub use simd::{detected_level, SimdKernels, SimdLevel};
pub use vector::{ParallelSettings, ParallelVectorBackend, ScalarVectorBackend, SimdVectorBackend};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_accel_core::{GeoBackend, GraphBackend, VectorBackend};

/// Which vector strategy the built-in CPU backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuStrategy {
    /// Scalar reference kernels
    Scalar,
    /// Single-threaded SIMD kernels
    Simd,
    /// Thread pool over SIMD kernels
    #[default]
    Parallel,
}

/// `[cpu]` section of the acceleration config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuOptions {
    /// Vector strategy for the built-in backend
    #[serde(default)]
    pub strategy: CpuStrategy,
    /// Worker threads for the parallel strategy; 0 means one per logical CPU
    #[serde(default)]
    pub threads: usize,
    /// Allow SIMD kernels
    #[serde(default = "default_true")]
    pub simd: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CpuOptions {
    fn default() -> Self {
        Self {
            strategy: CpuStrategy::default(),
            threads: 0,
            simd: true,
        }
    }
}

/// Build the uninitialized CPU vector backend described by `options`.
pub fn vector_backend(options: &CpuOptions) -> Arc<dyn VectorBackend> {
    match options.strategy {
        CpuStrategy::Scalar => Arc::new(ScalarVectorBackend::new()),
        CpuStrategy::Simd if options.simd => Arc::new(SimdVectorBackend::new()),
        CpuStrategy::Simd => Arc::new(SimdVectorBackend::with_kernels(SimdKernels::scalar())),
        CpuStrategy::Parallel => Arc::new(ParallelVectorBackend::new(ParallelSettings {
            threads: options.threads,
            simd: options.simd,
        })),
    }
}

/// The built-in CPU backends, one per capability.
#[derive(Clone)]
pub struct CpuBackends {
    /// Vector backend of the configured strategy
    pub vector: Arc<dyn VectorBackend>,
    /// Graph backend
    pub graph: Arc<dyn GraphBackend>,
    /// Geo backend, chunked over rayon for the parallel strategy
    pub geo: Arc<dyn GeoBackend>,
}

/// Build the uninitialized built-in CPU backends described by `options`.
pub fn cpu_backends(options: &CpuOptions) -> CpuBackends {
    let geo = match options.strategy {
        CpuStrategy::Parallel => CpuGeoBackend::parallel(),
        CpuStrategy::Scalar | CpuStrategy::Simd => CpuGeoBackend::new(),
    };
    CpuBackends {
        vector: vector_backend(options),
        graph: Arc::new(CpuGraphBackend::new()),
        geo: Arc::new(geo),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_backend_follows_strategy() {
        let scalar = vector_backend(&CpuOptions {
            strategy: CpuStrategy::Scalar,
            ..Default::default()
        });
        assert_eq!(scalar.name(), "cpu-scalar");

        let parallel = vector_backend(&CpuOptions::default());
        assert_eq!(parallel.name(), "cpu-parallel");

        let simd_off = vector_backend(&CpuOptions {
            strategy: CpuStrategy::Simd,
            simd: false,
            ..Default::default()
        });
        assert!(simd_off.capabilities().device_name.contains("scalar"));
    }

    #[test]
    fn test_cpu_backends_cover_every_capability() {
        let backends = cpu_backends(&CpuOptions::default());
        assert!(backends.vector.capabilities().supports_vector_ops);
        assert!(backends.graph.capabilities().supports_graph_ops);
        assert!(backends.geo.capabilities().supports_geo_ops);
        for ty in [
            backends.vector.backend_type(),
            backends.graph.backend_type(),
            backends.geo.backend_type(),
        ] {
            assert_eq!(ty, strata_accel_core::BackendType::Cpu);
        }
    }
}
