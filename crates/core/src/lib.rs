//! Core types and traits for the Strata acceleration layer
//!
//! This crate defines what every backend shares:
//! - BackendType / BackendCapabilities: identity and capability records
//! - ComputeBackend, VectorBackend, GraphBackend, GeoBackend: capability contracts
//! - Lifecycle: Uninitialized → Initialized → ShutDown state machine
//! - kernels: scalar reference implementations of every numeric primitive
//! - validate: precondition checks run before any backend touches data
//! - DynLib: dynamic library loading for device drivers and plugins
//! - AccelError: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod dl;
pub mod error;
pub mod kernels;
pub mod types;
pub mod validate;

pub use backend::{BackendState, ComputeBackend, GeoBackend, GraphBackend, Lifecycle, VectorBackend};
pub use dl::DynLib;
pub use error::{AccelError, AccelResult};
pub use types::{
    BackendCapabilities, BackendType, CsrGraph, DistanceMetric, GeoFormula, KnnResults, Neighbor,
};

/// Version of this crate, embedded in plugin declarations for compatibility checks.
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
