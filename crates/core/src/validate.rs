//! Precondition checks shared by every backend
//!
//! Backends call these before touching data so that malformed batches fail
//! with [`AccelError::InvalidInput`] instead of reading out of bounds or
//! dispatching a device kernel with bogus sizes.

use crate::error::{AccelError, AccelResult};
use crate::types::CsrGraph;

/// Shape of a validated vector batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchShape {
    /// Number of query rows
    pub num_queries: usize,
    /// Number of candidate rows
    pub num_vectors: usize,
    /// Row length
    pub dim: usize,
}

impl BatchShape {
    /// Number of cells in the distance matrix
    pub fn matrix_len(&self) -> usize {
        self.num_queries * self.num_vectors
    }
}

/// Validate a `queries × vectors` batch of row-major `f32` data.
pub fn vector_batch(queries: &[f32], vectors: &[f32], dim: usize) -> AccelResult<BatchShape> {
    if dim == 0 {
        return Err(AccelError::invalid_input("dimension must be > 0"));
    }
    if queries.len() % dim != 0 {
        return Err(AccelError::invalid_input(format!(
            "query buffer length {} is not a multiple of dimension {}",
            queries.len(),
            dim
        )));
    }
    if vectors.len() % dim != 0 {
        return Err(AccelError::invalid_input(format!(
            "vector buffer length {} is not a multiple of dimension {}",
            vectors.len(),
            dim
        )));
    }
    let shape = BatchShape {
        num_queries: queries.len() / dim,
        num_vectors: vectors.len() / dim,
        dim,
    };
    if shape.num_vectors > u32::MAX as usize {
        return Err(AccelError::invalid_input(format!(
            "{} candidate vectors exceed the u32 index range",
            shape.num_vectors
        )));
    }
    shape
        .num_queries
        .checked_mul(shape.num_vectors)
        .ok_or_else(|| AccelError::invalid_input("distance matrix size overflows usize"))?;
    Ok(shape)
}

/// Validate parallel coordinate arrays of equal length.
pub fn geo_pairs(lat1: &[f64], lon1: &[f64], lat2: &[f64], lon2: &[f64]) -> AccelResult<usize> {
    let n = lat1.len();
    if lon1.len() != n || lat2.len() != n || lon2.len() != n {
        return Err(AccelError::invalid_input(format!(
            "coordinate arrays differ in length: lat1={}, lon1={}, lat2={}, lon2={}",
            n,
            lon1.len(),
            lat2.len(),
            lon2.len()
        )));
    }
    Ok(n)
}

/// Validate a point batch and a flat `[lat, lon, ..]` polygon ring.
pub fn polygon_query(lats: &[f64], lons: &[f64], polygon: &[f64]) -> AccelResult<usize> {
    if lats.len() != lons.len() {
        return Err(AccelError::invalid_input(format!(
            "point arrays differ in length: lats={}, lons={}",
            lats.len(),
            lons.len()
        )));
    }
    if polygon.len() % 2 != 0 {
        return Err(AccelError::invalid_input(
            "polygon must be a flat list of [lat, lon] pairs",
        ));
    }
    if polygon.len() / 2 < 3 {
        return Err(AccelError::invalid_input(format!(
            "polygon needs at least 3 vertices, got {}",
            polygon.len() / 2
        )));
    }
    Ok(lats.len())
}

/// Validate CSR structure and that every vertex id is in range.
pub fn csr_graph(graph: &CsrGraph<'_>, vertices: &[u32]) -> AccelResult<()> {
    if graph.offsets.is_empty() {
        return Err(AccelError::invalid_input("CSR offsets must hold num_vertices + 1 entries"));
    }
    if graph.offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(AccelError::invalid_input("CSR offsets must be non-decreasing"));
    }
    let last = *graph.offsets.last().unwrap_or(&0) as usize;
    if graph.offsets[0] != 0 || last != graph.targets.len() {
        return Err(AccelError::invalid_input(format!(
            "CSR offsets span 0..{} but {} targets were given",
            last,
            graph.targets.len()
        )));
    }
    let n = graph.num_vertices();
    if let Some(bad) = graph.targets.iter().find(|&&t| t as usize >= n) {
        return Err(AccelError::invalid_input(format!(
            "edge target {} out of range for {} vertices",
            bad, n
        )));
    }
    if let Some(w) = graph.weights {
        if w.len() != graph.targets.len() {
            return Err(AccelError::invalid_input(format!(
                "{} weights for {} edges",
                w.len(),
                graph.targets.len()
            )));
        }
        if w.iter().any(|x| !(*x >= 0.0)) {
            return Err(AccelError::invalid_input("edge weights must be non-negative"));
        }
    }
    if let Some(bad) = vertices.iter().find(|&&v| v as usize >= n) {
        return Err(AccelError::invalid_input(format!(
            "vertex {} out of range for {} vertices",
            bad, n
        )));
    }
    Ok(())
}
