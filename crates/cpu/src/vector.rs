//! CPU vector backends: scalar reference, SIMD and thread pool
//!
//! All three share one contract and must agree with the scalar reference
//! within floating-point tolerance. KNN computes the full distance row per
//! query and keeps the `k` nearest by partial selection.

use crate::simd::{SimdKernels, SimdLevel};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::Arc;
use strata_accel_core::kernels::{self, select_k_nearest};
use strata_accel_core::validate::{self, BatchShape};
use strata_accel_core::{
    AccelError, AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend,
    DistanceMetric, KnnResults, Lifecycle, VectorBackend,
};

/// Queries per task when filling a dense distance matrix.
pub const DISTANCE_GRAIN: usize = 16;

/// Queries per task for independent per-query KNN search.
pub const KNN_GRAIN: usize = 64;

fn logical_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Serial distance matrix using `kernel` for each cell.
fn distance_matrix<F>(queries: &[f32], vectors: &[f32], shape: BatchShape, kernel: F) -> Vec<f32>
where
    F: Fn(&[f32], &[f32]) -> f32,
{
    let mut out = vec![0.0f32; shape.matrix_len()];
    if out.is_empty() {
        return out;
    }
    for (row, query) in out
        .chunks_exact_mut(shape.num_vectors)
        .zip(queries.chunks_exact(shape.dim))
    {
        kernels::distance_row(query, vectors, shape.dim, row, &kernel);
    }
    out
}

/// Serial KNN: one distance row per query, then partial selection.
fn knn<F>(queries: &[f32], vectors: &[f32], shape: BatchShape, k: usize, kernel: F) -> KnnResults
where
    F: Fn(&[f32], &[f32]) -> f32,
{
    let mut row = vec![0.0f32; shape.num_vectors];
    queries
        .chunks_exact(shape.dim)
        .map(|query| {
            kernels::distance_row(query, vectors, shape.dim, &mut row, &kernel);
            select_k_nearest(&row, k)
        })
        .collect()
}

// ============================================================================
// Scalar
// ============================================================================

/// Scalar reference backend.
#[derive(Debug, Default)]
pub struct ScalarVectorBackend {
    lifecycle: Lifecycle,
}

impl ScalarVectorBackend {
    /// New, uninitialized backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComputeBackend for ScalarVectorBackend {
    fn name(&self) -> &str {
        "cpu-scalar"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn is_available(&self) -> bool {
        true
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::vector("CPU (scalar)").with_device(0, 1)
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

impl VectorBackend for ScalarVectorBackend {
    fn compute_distances(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>> {
        self.lifecycle.ensure_initialized(self.name())?;
        let shape = validate::vector_batch(queries, vectors, dim)?;
        Ok(distance_matrix(queries, vectors, shape, |a, b| {
            kernels::distance(metric, a, b)
        }))
    }

    fn batch_knn_search(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        k: usize,
        metric: DistanceMetric,
    ) -> AccelResult<KnnResults> {
        self.lifecycle.ensure_initialized(self.name())?;
        let shape = validate::vector_batch(queries, vectors, dim)?;
        Ok(knn(queries, vectors, shape, k, |a, b| {
            kernels::distance(metric, a, b)
        }))
    }
}

// ============================================================================
// SIMD
// ============================================================================

/// Single-threaded backend using the widest SIMD kernels the CPU supports.
#[derive(Debug)]
pub struct SimdVectorBackend {
    lifecycle: Lifecycle,
    kernels: SimdKernels,
}

impl Default for SimdVectorBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimdVectorBackend {
    /// Backend with runtime-detected kernels
    pub fn new() -> Self {
        Self::with_kernels(SimdKernels::detect())
    }

    /// Backend pinned to specific kernels
    pub fn with_kernels(kernels: SimdKernels) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            kernels,
        }
    }

    /// SIMD level in use
    pub fn level(&self) -> SimdLevel {
        self.kernels.level()
    }
}

impl ComputeBackend for SimdVectorBackend {
    fn name(&self) -> &str {
        "cpu-simd"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn is_available(&self) -> bool {
        true
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::vector(format!("CPU (SIMD {})", self.kernels.level())).with_device(0, 1)
    }

    fn initialize(&self) -> AccelResult<()> {
        self.lifecycle.initialize_with(|| {
            tracing::debug!(target: "strata::accel::cpu", level = %self.kernels.level(), "SIMD backend initialized");
            Ok(())
        })
    }

    fn shutdown(&self) {
        self.lifecycle.shutdown_with(|| {});
    }

    fn state(&self) -> BackendState {
        self.lifecycle.state()
    }
}

impl VectorBackend for SimdVectorBackend {
    fn compute_distances(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>> {
        self.lifecycle.ensure_initialized(self.name())?;
        let shape = validate::vector_batch(queries, vectors, dim)?;
        let simd = self.kernels;
        Ok(distance_matrix(queries, vectors, shape, |a, b| simd.distance(metric, a, b)))
    }

    fn batch_knn_search(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        k: usize,
        metric: DistanceMetric,
    ) -> AccelResult<KnnResults> {
        self.lifecycle.ensure_initialized(self.name())?;
        let shape = validate::vector_batch(queries, vectors, dim)?;
        let simd = self.kernels;
        Ok(knn(queries, vectors, shape, k, |a, b| simd.distance(metric, a, b)))
    }
}

// ============================================================================
// Thread pool
// ============================================================================

/// Mutable settings of [`ParallelVectorBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelSettings {
    /// Worker threads; 0 means one per logical CPU
    pub threads: usize,
    /// Use SIMD kernels inside each task
    pub simd: bool,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            threads: 0,
            simd: true,
        }
    }
}

/// Thread-pool backend: rayon fan-out over queries, SIMD kernels per task.
///
/// The pool is built by `initialize()`. Changing the thread count on an
/// initialized backend rebuilds the pool under the write lock, so in-flight
/// batches finish on the old pool.
pub struct ParallelVectorBackend {
    lifecycle: Lifecycle,
    settings: RwLock<ParallelSettings>,
    pool: RwLock<Option<Arc<rayon::ThreadPool>>>,
}

impl std::fmt::Debug for ParallelVectorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelVectorBackend")
            .field("state", &self.lifecycle.state())
            .field("settings", &*self.settings.read())
            .finish()
    }
}

impl Default for ParallelVectorBackend {
    fn default() -> Self {
        Self::new(ParallelSettings::default())
    }
}

impl ParallelVectorBackend {
    /// New, uninitialized backend
    pub fn new(settings: ParallelSettings) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            settings: RwLock::new(settings),
            pool: RwLock::new(None),
        }
    }

    /// Current settings
    pub fn settings(&self) -> ParallelSettings {
        *self.settings.read()
    }

    /// Change the worker count; rebuilds the pool when initialized.
    pub fn set_thread_count(&self, threads: usize) -> AccelResult<()> {
        self.settings.write().threads = threads;
        if self.lifecycle.is_initialized() {
            let pool = self.build_pool()?;
            *self.pool.write() = Some(pool);
        }
        Ok(())
    }

    /// Toggle SIMD kernels inside tasks.
    pub fn set_simd_enabled(&self, simd: bool) {
        self.settings.write().simd = simd;
    }

    /// Worker threads of the live pool, or the configured count
    pub fn thread_count(&self) -> usize {
        match self.pool.read().as_ref() {
            Some(pool) => pool.current_num_threads(),
            None => self.resolved_threads(),
        }
    }

    fn resolved_threads(&self) -> usize {
        match self.settings.read().threads {
            0 => logical_cpus() as usize,
            n => n,
        }
    }

    fn kernels(&self) -> SimdKernels {
        if self.settings.read().simd {
            SimdKernels::detect()
        } else {
            SimdKernels::scalar()
        }
    }

    fn build_pool(&self) -> AccelResult<Arc<rayon::ThreadPool>> {
        let threads = self.resolved_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("strata-accel-{}", i))
            .build()
            .map_err(|e| AccelError::device("cpu-parallel", e.to_string()))?;
        Ok(Arc::new(pool))
    }

    fn live_pool(&self) -> AccelResult<Arc<rayon::ThreadPool>> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| AccelError::not_initialized(self.name()))
    }
}

impl ComputeBackend for ParallelVectorBackend {
    fn name(&self) -> &str {
        "cpu-parallel"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn is_available(&self) -> bool {
        true
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::vector(format!(
            "CPU ({} threads, {})",
            self.thread_count(),
            self.kernels().level()
        ))
        .with_device(0, logical_cpus())
    }

    fn initialize(&self) -> AccelResult<()> {
        self.lifecycle.initialize_with(|| {
            let pool = self.build_pool()?;
            tracing::info!(
                target: "strata::accel::cpu",
                threads = pool.current_num_threads(),
                simd = %self.kernels().level(),
                "CPU thread pool initialized"
            );
            *self.pool.write() = Some(pool);
            Ok(())
        })
    }

    fn shutdown(&self) {
        self.lifecycle.shutdown_with(|| {
            self.pool.write().take();
        });
    }

    fn state(&self) -> BackendState {
        self.lifecycle.state()
    }
}

impl VectorBackend for ParallelVectorBackend {
    fn compute_distances(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>> {
        let pool = self.live_pool()?;
        let shape = validate::vector_batch(queries, vectors, dim)?;
        let mut out = vec![0.0f32; shape.matrix_len()];
        if out.is_empty() {
            return Ok(out);
        }
        let simd = self.kernels();
        pool.install(|| {
            out.par_chunks_mut(shape.num_vectors)
                .zip(queries.par_chunks(dim))
                .with_min_len(DISTANCE_GRAIN)
                .for_each(|(row, query)| {
                    kernels::distance_row(query, vectors, dim, row, |a, b| {
                        simd.distance(metric, a, b)
                    });
                });
        });
        Ok(out)
    }

    fn batch_knn_search(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        k: usize,
        metric: DistanceMetric,
    ) -> AccelResult<KnnResults> {
        let pool = self.live_pool()?;
        let shape = validate::vector_batch(queries, vectors, dim)?;
        let simd = self.kernels();
        let results: KnnResults = pool.install(|| {
            queries
                .par_chunks(dim)
                .with_min_len(KNN_GRAIN)
                .map_init(
                    || vec![0.0f32; shape.num_vectors],
                    |row, query| {
                        kernels::distance_row(query, vectors, dim, row, |a, b| {
                            simd.distance(metric, a, b)
                        });
                        select_k_nearest(row, k)
                    },
                )
                .collect()
        });
        Ok(results)
    }
}
