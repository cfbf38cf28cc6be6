//! Backend identity, capability records and operation parameters

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Execution strategy of a backend.
///
/// The set is closed: supporting a new technology means adding a variant and
/// placing it in [`BackendType::PRIORITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Host CPU (scalar, SIMD or thread pool)
    Cpu,
    /// NVIDIA CUDA driver API
    Cuda,
    /// AMD HIP runtime
    Hip,
    /// CUDA-compatibility shim running CUDA code on non-NVIDIA devices
    Zluda,
    /// Vulkan compute
    Vulkan,
    /// DirectX 12 compute
    DirectX,
    /// AMD ROCm HSA runtime
    Rocm,
    /// oneAPI Level Zero
    OneApi,
    /// Apple Metal
    Metal,
    /// OpenCL
    OpenCl,
    /// OpenGL compute shaders
    OpenGl,
    /// WebGPU (wgpu-native / Dawn)
    WebGpu,
}

impl BackendType {
    /// Fixed selection order, fastest technology first, CPU last.
    ///
    /// Identical for vector, graph and geo selection.
    pub const PRIORITY: [BackendType; 12] = [
        BackendType::Cuda,
        BackendType::Hip,
        BackendType::Zluda,
        BackendType::Vulkan,
        BackendType::DirectX,
        BackendType::Rocm,
        BackendType::OneApi,
        BackendType::Metal,
        BackendType::OpenCl,
        BackendType::OpenGl,
        BackendType::WebGpu,
        BackendType::Cpu,
    ];

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Cpu => "cpu",
            BackendType::Cuda => "cuda",
            BackendType::Hip => "hip",
            BackendType::Zluda => "zluda",
            BackendType::Vulkan => "vulkan",
            BackendType::DirectX => "directx",
            BackendType::Rocm => "rocm",
            BackendType::OneApi => "oneapi",
            BackendType::Metal => "metal",
            BackendType::OpenCl => "opencl",
            BackendType::OpenGl => "opengl",
            BackendType::WebGpu => "webgpu",
        }
    }

    /// Position in [`BackendType::PRIORITY`]; lower is preferred.
    pub fn priority_rank(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|t| t == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    /// True for every technology that executes off the host CPU.
    pub fn is_gpu(&self) -> bool {
        !matches!(self, BackendType::Cpu)
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "directx12" | "dx12" | "d3d12" => return Ok(BackendType::DirectX),
            "level_zero" | "levelzero" => return Ok(BackendType::OneApi),
            _ => {}
        }
        Self::PRIORITY
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown backend type '{}'", s))
    }
}

/// What one backend instance can do, produced fresh by every
/// `capabilities()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Distance matrix and KNN support
    pub supports_vector_ops: bool,
    /// BFS / shortest path support
    pub supports_graph_ops: bool,
    /// Geo distance / containment support
    pub supports_geo_ops: bool,
    /// Whole-batch execution in one call
    pub supports_batch_processing: bool,
    /// Asynchronous execution support
    pub supports_async: bool,
    /// Human-readable device name
    pub device_name: String,
    /// Total addressable memory in bytes (0 if unknown)
    pub max_memory_bytes: u64,
    /// Compute units, multiprocessors or logical cores (0 if unknown)
    pub compute_units: u32,
}

impl BackendCapabilities {
    /// Capabilities of a vector-only batch backend.
    pub fn vector(device_name: impl Into<String>) -> Self {
        Self {
            supports_vector_ops: true,
            supports_batch_processing: true,
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    /// Capabilities of a graph-only batch backend.
    pub fn graph(device_name: impl Into<String>) -> Self {
        Self {
            supports_graph_ops: true,
            supports_batch_processing: true,
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    /// Capabilities of a geo-only batch backend.
    pub fn geo(device_name: impl Into<String>) -> Self {
        Self {
            supports_geo_ops: true,
            supports_batch_processing: true,
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    /// Attach memory and compute-unit figures.
    pub fn with_device(mut self, max_memory_bytes: u64, compute_units: u32) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self.compute_units = compute_units;
        self
    }
}

/// Vector distance metric. Smaller is closer for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean distance
    #[default]
    L2,
    /// `1 - cos(a, b)`
    Cosine,
}

impl DistanceMetric {
    /// Map the boolean `use_l2` flag of the collaborator interface.
    pub fn from_use_l2(use_l2: bool) -> Self {
        if use_l2 {
            DistanceMetric::L2
        } else {
            DistanceMetric::Cosine
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
        }
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "l2" | "euclidean" => Some(DistanceMetric::L2),
            "cosine" => Some(DistanceMetric::Cosine),
            _ => None,
        }
    }
}

/// Great-circle distance formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoFormula {
    /// Spherical earth, radius 6371 km
    #[default]
    Haversine,
    /// WGS-84 ellipsoid, falls back to haversine when it does not converge
    Vincenty,
}

/// A KNN hit: candidate index and its distance to the query.
pub type Neighbor = (u32, f32);

/// Per-query KNN hits, ascending by distance.
pub type KnnResults = Vec<Vec<Neighbor>>;

/// Compressed sparse row adjacency over `u32` vertex ids.
///
/// Neighbors of vertex `v` are `targets[offsets[v]..offsets[v + 1]]`, with
/// `weights` (when present) parallel to `targets`.
#[derive(Debug, Clone, Copy)]
pub struct CsrGraph<'a> {
    /// `num_vertices + 1` monotone offsets into `targets`
    pub offsets: &'a [u32],
    /// Edge targets
    pub targets: &'a [u32],
    /// Optional non-negative edge weights
    pub weights: Option<&'a [f32]>,
}

impl<'a> CsrGraph<'a> {
    /// Unweighted graph.
    pub fn new(offsets: &'a [u32], targets: &'a [u32]) -> Self {
        Self {
            offsets,
            targets,
            weights: None,
        }
    }

    /// Weighted graph.
    pub fn weighted(offsets: &'a [u32], targets: &'a [u32], weights: &'a [f32]) -> Self {
        Self {
            offsets,
            targets,
            weights: Some(weights),
        }
    }

    /// Number of vertices
    pub fn num_vertices(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Outgoing neighbors of `v`. Caller guarantees the graph was validated.
    pub fn neighbors(&self, v: u32) -> &'a [u32] {
        let v = v as usize;
        &self.targets[self.offsets[v] as usize..self.offsets[v + 1] as usize]
    }

    /// Weights of the outgoing edges of `v`, if the graph is weighted.
    pub fn edge_weights(&self, v: u32) -> Option<&'a [f32]> {
        let v = v as usize;
        self.weights
            .map(|w| &w[self.offsets[v] as usize..self.offsets[v + 1] as usize])
    }
}
