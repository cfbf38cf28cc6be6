//! Strata acceleration layer
//!
//! Runs the database's numeric hot paths (vector distances and KNN, graph
//! traversal, geodesic distance and containment) on the fastest compute
//! backend the host offers: CUDA, HIP, ZLUDA, OpenCL, Metal, SIMD and
//! multithreaded CPU, or a verified third-party plugin. The CPU backends
//! are always present, so every operation has somewhere to run.
//!
//! # Quick Start
//!
//! ```no_run
//! use strata_accel::{AccelConfig, BackendRegistry, DistanceMetric};
//!
//! let registry = BackendRegistry::new(AccelConfig::default());
//! registry.auto_detect();
//!
//! let backend = registry.get_best_vector_backend().expect("CPU backend is built in");
//! let queries = [0.0, 0.0, 1.0, 1.0];
//! let vectors = [0.0, 0.0, 3.0, 4.0];
//! let neighbors = backend.batch_knn_search(&queries, &vectors, 2, 1, DistanceMetric::L2)?;
//! # Ok::<(), strata_accel::AccelError>(())
//! ```
//!
//! # Architecture
//!
//! - [`core`]: backend identity, capability traits, lifecycle, errors, kernels
//! - [`cpu`]: scalar, SIMD and thread-pool CPU backends
//! - [`gpu`]: one module per GPU technology (feature `gpu`)
//! - [`plugin`]: plugin ABI, loader, signature verification, audit log
//! - [`registry`]: priority selection, discovery, configuration

pub use strata_accel_core as core;
pub use strata_accel_cpu as cpu;
#[cfg(feature = "gpu")]
pub use strata_accel_gpu as gpu;
pub use strata_accel_plugin as plugin;
pub use strata_accel_registry as registry;

pub use strata_accel_core::{
    AccelError, AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend,
    CsrGraph, DistanceMetric, GeoBackend, GeoFormula, GraphBackend, KnnResults, Neighbor,
    VectorBackend,
};
pub use strata_accel_plugin::{export_backend_plugin, BackendPlugin};
pub use strata_accel_registry::{AccelConfig, BackendRegistry, CapabilityReport};
