//! SIMD distance kernels with runtime feature detection
//!
//! - AVX2 + FMA: 8 floats per register (x86_64)
//! - NEON: 4 floats per register (aarch64)
//!
//! Each kernel accumulates in vector registers, finishes the tail with a
//! scalar remainder loop and takes a single `sqrt` at the end. Results match
//! the scalar reference in `strata_accel_core::kernels` up to summation
//! order. Every load is bounded by the shorter operand.

use once_cell::sync::Lazy;
use std::fmt;
use strata_accel_core::kernels::{self, cosine_from_parts};
use strata_accel_core::DistanceMetric;

/// Instruction-set extension used by the kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    /// Portable scalar loop
    Scalar,
    /// AVX2 with fused multiply-add (x86_64)
    Avx2,
    /// Advanced SIMD (aarch64)
    Neon,
}

impl SimdLevel {
    /// Detect the best level supported by the running CPU.
    #[allow(unreachable_code)]
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return SimdLevel::Avx2;
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            // NEON is mandatory on aarch64
            return SimdLevel::Neon;
        }

        SimdLevel::Scalar
    }

    /// True if kernels for this level may run on this CPU.
    pub fn is_supported(&self) -> bool {
        match self {
            SimdLevel::Scalar => true,
            other => *other == detected_level(),
        }
    }

    /// Width in f32 lanes
    pub fn lanes(&self) -> usize {
        match self {
            SimdLevel::Scalar => 1,
            SimdLevel::Avx2 => 8,
            SimdLevel::Neon => 4,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SimdLevel::Scalar => "scalar",
            SimdLevel::Avx2 => "avx2",
            SimdLevel::Neon => "neon",
        }
    }
}

impl fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static DETECTED: Lazy<SimdLevel> = Lazy::new(SimdLevel::detect);

/// Cached result of [`SimdLevel::detect`].
pub fn detected_level() -> SimdLevel {
    *DETECTED
}

/// Distance kernels bound to one [`SimdLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdKernels {
    level: SimdLevel,
}

impl Default for SimdKernels {
    fn default() -> Self {
        Self::detect()
    }
}

impl SimdKernels {
    /// Kernels for the best level of the running CPU.
    pub fn detect() -> Self {
        Self {
            level: detected_level(),
        }
    }

    /// Portable scalar kernels.
    pub fn scalar() -> Self {
        Self {
            level: SimdLevel::Scalar,
        }
    }

    /// Kernels for `level`, or scalar when the CPU does not support it.
    pub fn with_level(level: SimdLevel) -> Self {
        if level.is_supported() {
            Self { level }
        } else {
            Self::scalar()
        }
    }

    /// Level actually in use
    pub fn level(&self) -> SimdLevel {
        self.level
    }

    /// Euclidean distance. Operands of unequal length are compared over
    /// the shorter one, as the scalar kernels do.
    #[inline]
    pub fn l2(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.level {
            // SAFETY: `level` is only Avx2/Neon when the CPU supports it.
            #[cfg(target_arch = "x86_64")]
            SimdLevel::Avx2 => unsafe { x86::l2_avx2(a, b) },
            #[cfg(target_arch = "aarch64")]
            SimdLevel::Neon => unsafe { arm::l2_neon(a, b) },
            _ => kernels::l2_distance(a, b),
        }
    }

    /// Cosine distance, one pass over both operands
    #[inline]
    pub fn cosine(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.level {
            #[cfg(target_arch = "x86_64")]
            SimdLevel::Avx2 => unsafe { x86::cosine_avx2(a, b) },
            #[cfg(target_arch = "aarch64")]
            SimdLevel::Neon => unsafe { arm::cosine_neon(a, b) },
            _ => kernels::cosine_distance(a, b),
        }
    }

    /// Dispatch on metric.
    #[inline]
    pub fn distance(&self, metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
        match metric {
            DistanceMetric::L2 => self.l2(a, b),
            DistanceMetric::Cosine => self.cosine(a, b),
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use super::cosine_from_parts;
    use std::arch::x86_64::*;

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn l2_avx2(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let chunks = n / 8;
        let mut acc = _mm256_setzero_ps();
        for i in 0..chunks {
            let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
            let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
            let d = _mm256_sub_ps(va, vb);
            acc = _mm256_fmadd_ps(d, d, acc);
        }
        let mut sum = hsum(acc);
        for i in chunks * 8..n {
            let d = a[i] - b[i];
            sum += d * d;
        }
        sum.sqrt()
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn cosine_avx2(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let chunks = n / 8;
        let mut dot = _mm256_setzero_ps();
        let mut na = _mm256_setzero_ps();
        let mut nb = _mm256_setzero_ps();
        for i in 0..chunks {
            let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
            let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
            dot = _mm256_fmadd_ps(va, vb, dot);
            na = _mm256_fmadd_ps(va, va, na);
            nb = _mm256_fmadd_ps(vb, vb, nb);
        }
        let (mut d, mut sa, mut sb) = (hsum(dot), hsum(na), hsum(nb));
        for i in chunks * 8..n {
            d += a[i] * b[i];
            sa += a[i] * a[i];
            sb += b[i] * b[i];
        }
        cosine_from_parts(d, sa, sb)
    }

    #[target_feature(enable = "avx2")]
    unsafe fn hsum(v: __m256) -> f32 {
        let hi = _mm256_extractf128_ps(v, 1);
        let lo = _mm256_castps256_ps128(v);
        let quad = _mm_add_ps(lo, hi);
        let pair = _mm_add_ps(quad, _mm_movehl_ps(quad, quad));
        let single = _mm_add_ss(pair, _mm_shuffle_ps(pair, pair, 0x55));
        _mm_cvtss_f32(single)
    }
}

#[cfg(target_arch = "aarch64")]
mod arm {
    use super::cosine_from_parts;
    use std::arch::aarch64::*;

    pub(super) unsafe fn l2_neon(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let chunks = n / 4;
        let mut acc = vdupq_n_f32(0.0);
        for i in 0..chunks {
            let va = vld1q_f32(a.as_ptr().add(i * 4));
            let vb = vld1q_f32(b.as_ptr().add(i * 4));
            let d = vsubq_f32(va, vb);
            acc = vfmaq_f32(acc, d, d);
        }
        let mut sum = vaddvq_f32(acc);
        for i in chunks * 4..n {
            let d = a[i] - b[i];
            sum += d * d;
        }
        sum.sqrt()
    }

    pub(super) unsafe fn cosine_neon(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let chunks = n / 4;
        let mut dot = vdupq_n_f32(0.0);
        let mut na = vdupq_n_f32(0.0);
        let mut nb = vdupq_n_f32(0.0);
        for i in 0..chunks {
            let va = vld1q_f32(a.as_ptr().add(i * 4));
            let vb = vld1q_f32(b.as_ptr().add(i * 4));
            dot = vfmaq_f32(dot, va, vb);
            na = vfmaq_f32(na, va, va);
            nb = vfmaq_f32(nb, vb, vb);
        }
        let (mut d, mut sa, mut sb) = (vaddvq_f32(dot), vaddvq_f32(na), vaddvq_f32(nb));
        for i in chunks * 4..n {
            d += a[i] * b[i];
            sa += a[i] * a[i];
            sb += b[i] * b[i];
        }
        cosine_from_parts(d, sa, sb)
    }
}
