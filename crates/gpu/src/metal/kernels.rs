//! Metal Shading Language source of the distance kernels.
//!
//! Same grid layout as the CUDA and OpenCL sources: x is the candidate, y the
//! query. Sizes arrive through a `constant` struct set with `setBytes`.

use crate::kernels::{COSINE_KERNEL, L2_KERNEL};

/// Sizes passed to every kernel. Layout matches `DistanceParams` in MSL.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DistanceParams {
    pub num_queries: u32,
    pub num_vectors: u32,
    pub dim: u32,
}

/// Kernel names in pipeline order.
pub const KERNELS: [&str; 2] = [L2_KERNEL, COSINE_KERNEL];

/// MSL source.
pub const MSL_SOURCE: &str = r#"
#include <metal_stdlib>
using namespace metal;

struct DistanceParams {
    uint num_queries;
    uint num_vectors;
    uint dim;
};

kernel void l2_distance(
    device const float* queries [[buffer(0)]],
    device const float* vectors [[buffer(1)]],
    device float* out [[buffer(2)]],
    constant DistanceParams& p [[buffer(3)]],
    uint2 gid [[thread_position_in_grid]])
{
    uint v = gid.x;
    uint q = gid.y;
    if (q >= p.num_queries || v >= p.num_vectors) return;
    device const float* a = queries + (ulong)q * p.dim;
    device const float* b = vectors + (ulong)v * p.dim;
    float sum = 0.0f;
    for (uint d = 0; d < p.dim; ++d) {
        float diff = a[d] - b[d];
        sum += diff * diff;
    }
    out[(ulong)q * p.num_vectors + v] = sqrt(sum);
}

kernel void cosine_distance(
    device const float* queries [[buffer(0)]],
    device const float* vectors [[buffer(1)]],
    device float* out [[buffer(2)]],
    constant DistanceParams& p [[buffer(3)]],
    uint2 gid [[thread_position_in_grid]])
{
    uint v = gid.x;
    uint q = gid.y;
    if (q >= p.num_queries || v >= p.num_vectors) return;
    device const float* a = queries + (ulong)q * p.dim;
    device const float* b = vectors + (ulong)v * p.dim;
    float dot = 0.0f, na = 0.0f, nb = 0.0f;
    for (uint d = 0; d < p.dim; ++d) {
        dot += a[d] * b[d];
        na += a[d] * a[d];
        nb += b[d] * b[d];
    }
    na = sqrt(na);
    nb = sqrt(nb);
    out[(ulong)q * p.num_vectors + v] =
        (na < 1e-10f || nb < 1e-10f) ? 1.0f : 1.0f - dot / (na * nb);
}
"#;
