//! Device kernel sources for the distance matrix.
//!
//! One work item per `(candidate, query)` cell of a 2-D grid: x indexes the
//! candidate, y the query. Each item walks the full dimension and writes one
//! distance, so results match the scalar reference up to summation order.
//! Cosine returns 1.0 when either norm is below 1e-10.

/// Work-group edge length for both grid dimensions.
pub const BLOCK: u32 = 16;

/// Kernel entry point names shared by every source below.
pub const L2_KERNEL: &str = "l2_distance";
/// See [`L2_KERNEL`].
pub const COSINE_KERNEL: &str = "cosine_distance";

/// CUDA C, compiled at runtime by NVRTC (CUDA, ZLUDA) or hipRTC (HIP).
pub const CUDA_SOURCE: &str = r#"
extern "C" __global__ void l2_distance(
    const float* __restrict__ queries,
    const float* __restrict__ vectors,
    float* __restrict__ out,
    unsigned int num_queries,
    unsigned int num_vectors,
    unsigned int dim)
{
    unsigned int v = blockIdx.x * blockDim.x + threadIdx.x;
    unsigned int q = blockIdx.y * blockDim.y + threadIdx.y;
    if (q >= num_queries || v >= num_vectors) return;
    const float* a = queries + (size_t)q * dim;
    const float* b = vectors + (size_t)v * dim;
    float sum = 0.0f;
    for (unsigned int d = 0; d < dim; ++d) {
        float diff = a[d] - b[d];
        sum += diff * diff;
    }
    out[(size_t)q * num_vectors + v] = sqrtf(sum);
}

extern "C" __global__ void cosine_distance(
    const float* __restrict__ queries,
    const float* __restrict__ vectors,
    float* __restrict__ out,
    unsigned int num_queries,
    unsigned int num_vectors,
    unsigned int dim)
{
    unsigned int v = blockIdx.x * blockDim.x + threadIdx.x;
    unsigned int q = blockIdx.y * blockDim.y + threadIdx.y;
    if (q >= num_queries || v >= num_vectors) return;
    const float* a = queries + (size_t)q * dim;
    const float* b = vectors + (size_t)v * dim;
    float dot = 0.0f, na = 0.0f, nb = 0.0f;
    for (unsigned int d = 0; d < dim; ++d) {
        dot += a[d] * b[d];
        na += a[d] * a[d];
        nb += b[d] * b[d];
    }
    na = sqrtf(na);
    nb = sqrtf(nb);
    out[(size_t)q * num_vectors + v] =
        (na < 1e-10f || nb < 1e-10f) ? 1.0f : 1.0f - dot / (na * nb);
}
"#;

/// OpenCL C 1.2.
pub const OPENCL_SOURCE: &str = r#"
__kernel void l2_distance(
    __global const float* queries,
    __global const float* vectors,
    __global float* out,
    const uint num_queries,
    const uint num_vectors,
    const uint dim)
{
    uint v = get_global_id(0);
    uint q = get_global_id(1);
    if (q >= num_queries || v >= num_vectors) return;
    __global const float* a = queries + (size_t)q * dim;
    __global const float* b = vectors + (size_t)v * dim;
    float sum = 0.0f;
    for (uint d = 0; d < dim; ++d) {
        float diff = a[d] - b[d];
        sum += diff * diff;
    }
    out[(size_t)q * num_vectors + v] = sqrt(sum);
}

__kernel void cosine_distance(
    __global const float* queries,
    __global const float* vectors,
    __global float* out,
    const uint num_queries,
    const uint num_vectors,
    const uint dim)
{
    uint v = get_global_id(0);
    uint q = get_global_id(1);
    if (q >= num_queries || v >= num_vectors) return;
    __global const float* a = queries + (size_t)q * dim;
    __global const float* b = vectors + (size_t)v * dim;
    float dot = 0.0f, na = 0.0f, nb = 0.0f;
    for (uint d = 0; d < dim; ++d) {
        dot += a[d] * b[d];
        na += a[d] * a[d];
        nb += b[d] * b[d];
    }
    na = sqrt(na);
    nb = sqrt(nb);
    out[(size_t)q * num_vectors + v] =
        (na < 1e-10f || nb < 1e-10f) ? 1.0f : 1.0f - dot / (na * nb);
}
"#;

/// Number of blocks needed to cover `n` items.
pub fn div_ceil(n: u32, block: u32) -> u32 {
    n.div_ceil(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_define_both_entry_points() {
        for src in [CUDA_SOURCE, OPENCL_SOURCE] {
            assert!(src.contains(&format!("void {}(", L2_KERNEL)));
            assert!(src.contains(&format!("void {}(", COSINE_KERNEL)));
        }
    }

    #[test]
    fn test_div_ceil() {
        assert_eq!(div_ceil(0, BLOCK), 0);
        assert_eq!(div_ceil(1, BLOCK), 1);
        assert_eq!(div_ceil(16, BLOCK), 1);
        assert_eq!(div_ceil(17, BLOCK), 2);
    }
}
