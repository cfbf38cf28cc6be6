//! Capability contracts and the backend lifecycle
//!
//! A concrete backend implements [`ComputeBackend`] plus any subset of
//! [`VectorBackend`], [`GraphBackend`] and [`GeoBackend`]. All methods take
//! `&self`: backends are shared as `Arc<dyn ..>` between the registry and
//! query threads, so mutable state lives behind interior locks.
//!
//! Lifecycle: constructed uninitialized, `initialize()` acquires device or
//! runtime resources, operations run, `shutdown()` releases them. Shutdown is
//! idempotent and is also what `Drop` implementations call.

use crate::error::{AccelError, AccelResult};
use crate::types::{
    BackendCapabilities, BackendType, CsrGraph, DistanceMetric, GeoFormula, KnnResults,
};
use parking_lot::Mutex;

/// Identity, availability and lifecycle shared by all capabilities.
pub trait ComputeBackend: Send + Sync {
    /// Stable backend name, e.g. `"cpu-simd"` or `"cuda"`
    fn name(&self) -> &str;

    /// Technology this backend executes on
    fn backend_type(&self) -> BackendType;

    /// Live probe: true when the device and runtime are usable right now.
    fn is_available(&self) -> bool;

    /// Fresh capability record. Never cached by callers.
    fn capabilities(&self) -> BackendCapabilities;

    /// Acquire device or runtime resources. Idempotent.
    fn initialize(&self) -> AccelResult<()>;

    /// Release resources. Idempotent and safe to call more than once.
    fn shutdown(&self);

    /// Current lifecycle state
    fn state(&self) -> BackendState;
}

/// Batched distance and KNN search over row-major `f32` matrices.
pub trait VectorBackend: ComputeBackend {
    /// Full `queries × vectors` distance matrix, row-major by query.
    ///
    /// `queries.len()` and `vectors.len()` must be multiples of `dim`.
    fn compute_distances(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>>;

    /// Up to `k` nearest candidates per query, ascending by distance, ties
    /// broken by candidate index.
    fn batch_knn_search(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        k: usize,
        metric: DistanceMetric,
    ) -> AccelResult<KnnResults>;
}

/// Batched graph traversal over a CSR adjacency.
pub trait GraphBackend: ComputeBackend {
    /// Vertices reached from each start, in visit order, including the start
    /// itself at depth 0 and stopping at `max_depth` hops.
    fn batch_bfs(
        &self,
        graph: &CsrGraph<'_>,
        start_vertices: &[u32],
        max_depth: u32,
    ) -> AccelResult<Vec<Vec<u32>>>;

    /// Vertex path from `starts[i]` to `ends[i]`; empty when unreachable.
    fn batch_shortest_path(
        &self,
        graph: &CsrGraph<'_>,
        starts: &[u32],
        ends: &[u32],
    ) -> AccelResult<Vec<Vec<u32>>>;
}

/// Batched geodesic distance and containment.
pub trait GeoBackend: ComputeBackend {
    /// Distance in kilometres between `(lat1[i], lon1[i])` and `(lat2[i], lon2[i])`.
    fn batch_distances(
        &self,
        lat1: &[f64],
        lon1: &[f64],
        lat2: &[f64],
        lon2: &[f64],
        formula: GeoFormula,
    ) -> AccelResult<Vec<f32>>;

    /// Ray-casting containment of each point in a flat `[lat, lon, ..]` ring.
    fn batch_point_in_polygon(
        &self,
        lats: &[f64],
        lons: &[f64],
        polygon: &[f64],
    ) -> AccelResult<Vec<bool>>;
}

/// Lifecycle states of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Constructed, no resources held
    Uninitialized,
    /// Resources acquired, operations allowed
    Initialized,
    /// Resources released
    ShutDown,
}

/// Uninitialized → Initialized → ShutDown state machine.
///
/// The acquire and release closures run under the state lock, so concurrent
/// `initialize`/`shutdown` calls never overlap.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<BackendState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// New lifecycle in [`BackendState::Uninitialized`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::Uninitialized),
        }
    }

    /// Current state
    pub fn state(&self) -> BackendState {
        *self.state.lock()
    }

    /// True when operations are allowed
    pub fn is_initialized(&self) -> bool {
        self.state() == BackendState::Initialized
    }

    /// Run `acquire` unless already initialized. A failed acquire leaves the
    /// previous state untouched.
    pub fn initialize_with<F>(&self, acquire: F) -> AccelResult<()>
    where
        F: FnOnce() -> AccelResult<()>,
    {
        let mut state = self.state.lock();
        if *state == BackendState::Initialized {
            return Ok(());
        }
        acquire()?;
        *state = BackendState::Initialized;
        Ok(())
    }

    /// Run `release` only on the Initialized → ShutDown transition.
    pub fn shutdown_with<F>(&self, release: F)
    where
        F: FnOnce(),
    {
        let mut state = self.state.lock();
        if *state == BackendState::Initialized {
            release();
            *state = BackendState::ShutDown;
        } else if *state == BackendState::Uninitialized {
            *state = BackendState::ShutDown;
        }
    }

    /// Error unless initialized.
    pub fn ensure_initialized(&self, backend: &str) -> AccelResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(AccelError::not_initialized(backend))
        }
    }
}
