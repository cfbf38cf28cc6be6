//! Backends that keep their plugin library mapped.
//!
//! [`PluginBacked`] pairs a plugin-produced backend with the plugin's
//! ownership token. Every clone of the resulting `Arc<dyn ..>` therefore
//! pins the library, and the loader can count live backends by counting
//! token references.

use std::sync::Arc;

use strata_accel_core::{
    AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend, CsrGraph,
    DistanceMetric, GeoBackend, GeoFormula, GraphBackend, KnnResults, VectorBackend,
};

use crate::loader::PluginLibrary;

/// A plugin backend together with its library token.
pub struct PluginBacked<B: ?Sized> {
    // Declared before `library` so the backend drops first.
    backend: Arc<B>,
    library: Arc<PluginLibrary>,
}

impl<B: ?Sized> PluginBacked<B> {
    /// Wrap `backend`, produced by the plugin owning `library`.
    pub fn new(backend: Arc<B>, library: Arc<PluginLibrary>) -> Self {
        Self { backend, library }
    }

    /// Name of the plugin that produced the backend
    pub fn plugin_name(&self) -> &str {
        self.library.plugin_name()
    }
}

impl<B: ?Sized + ComputeBackend> ComputeBackend for PluginBacked<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn backend_type(&self) -> BackendType {
        self.backend.backend_type()
    }

    fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.backend.capabilities()
    }

    fn initialize(&self) -> AccelResult<()> {
        self.backend.initialize()
    }

    fn shutdown(&self) {
        self.backend.shutdown()
    }

    fn state(&self) -> BackendState {
        self.backend.state()
    }
}

impl<B: ?Sized + VectorBackend> VectorBackend for PluginBacked<B> {
    fn compute_distances(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>> {
        self.backend.compute_distances(queries, vectors, dim, metric)
    }

    fn batch_knn_search(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        k: usize,
        metric: DistanceMetric,
    ) -> AccelResult<KnnResults> {
        self.backend.batch_knn_search(queries, vectors, dim, k, metric)
    }
}

impl<B: ?Sized + GraphBackend> GraphBackend for PluginBacked<B> {
    fn batch_bfs(
        &self,
        graph: &CsrGraph<'_>,
        start_vertices: &[u32],
        max_depth: u32,
    ) -> AccelResult<Vec<Vec<u32>>> {
        self.backend.batch_bfs(graph, start_vertices, max_depth)
    }

    fn batch_shortest_path(
        &self,
        graph: &CsrGraph<'_>,
        starts: &[u32],
        ends: &[u32],
    ) -> AccelResult<Vec<Vec<u32>>> {
        self.backend.batch_shortest_path(graph, starts, ends)
    }
}

impl<B: ?Sized + GeoBackend> GeoBackend for PluginBacked<B> {
    fn batch_distances(
        &self,
        lat1: &[f64],
        lon1: &[f64],
        lat2: &[f64],
        lon2: &[f64],
        formula: GeoFormula,
    ) -> AccelResult<Vec<f32>> {
        self.backend.batch_distances(lat1, lon1, lat2, lon2, formula)
    }

    fn batch_point_in_polygon(
        &self,
        lats: &[f64],
        lons: &[f64],
        polygon: &[f64],
    ) -> AccelResult<Vec<bool>> {
        self.backend.batch_point_in_polygon(lats, lons, polygon)
    }
}
