//! GPU and accelerator backends for the Strata acceleration layer
//!
//! Every technology is reached through its runtime library at run time, so a
//! build with all features enabled still runs on machines without any GPU
//! stack installed. Missing runtimes only make the backend unavailable.
//!
//! | Technology | Module | Compute pipeline |
//! |------------|--------|------------------|
//! | CUDA       | [`cuda`]   | driver API + NVRTC |
//! | HIP        | [`hip`]    | module API + hipRTC |
//! | ZLUDA      | [`zluda`]  | CUDA driver API on non-NVIDIA GPUs |
//! | OpenCL     | [`opencl`] | ICD loader, GPU/accelerator devices |
//! | Metal      | `metal`    | MSL on the default device (macOS) |
//! | Vulkan, DirectX, oneAPI, ROCm, OpenGL, WebGPU | per module | probe only |

#![warn(clippy::all)]

/// Resolve `$name` in `$lib` and transmute to the binding's fn pointer type.
/// Expands to a `?` on failure, so callers return `Result<_, String>`.
macro_rules! load_sym {
    ($lib:expr, $name:expr) => {{
        let name: &std::ffi::CStr = $name;
        let ptr = unsafe { $lib.sym(name) }
            .map_err(|e| format!("failed to load {}: {}", name.to_string_lossy(), e))?;
        unsafe { std::mem::transmute::<*mut std::ffi::c_void, _>(ptr) }
    }};
}

pub mod kernels;
pub mod probe;

#[cfg(any(feature = "cuda", feature = "hip", feature = "zluda"))]
pub mod driver;

#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(feature = "directx")]
pub mod directx;
#[cfg(feature = "hip")]
pub mod hip;
#[cfg(all(feature = "metal", target_os = "macos"))]
pub mod metal;
#[cfg(feature = "oneapi")]
pub mod oneapi;
#[cfg(feature = "opencl")]
pub mod opencl;
#[cfg(feature = "opengl")]
pub mod opengl;
#[cfg(feature = "rocm")]
pub mod rocm;
#[cfg(feature = "vulkan")]
pub mod vulkan;
#[cfg(feature = "webgpu")]
pub mod webgpu;
#[cfg(feature = "zluda")]
pub mod zluda;

pub use probe::{DeviceInfo, ProbeReport};

#[cfg(any(feature = "cuda", feature = "hip", feature = "zluda"))]
pub use driver::DriverVectorBackend;
#[cfg(all(feature = "metal", target_os = "macos"))]
pub use metal::MetalVectorBackend;
#[cfg(feature = "opencl")]
pub use opencl::OpenClVectorBackend;

use std::sync::Arc;
use strata_accel_core::{BackendType, VectorBackend};

/// Every GPU vector backend compiled into this build, uninitialized and in
/// priority order. Callers register them; registration discards the ones
/// whose runtime is missing.
pub fn gpu_vector_backends() -> Vec<Arc<dyn VectorBackend>> {
    #[allow(unused_mut)]
    let mut out: Vec<Arc<dyn VectorBackend>> = Vec::new();
    #[cfg(feature = "cuda")]
    out.push(Arc::new(DriverVectorBackend::cuda()));
    #[cfg(feature = "hip")]
    out.push(Arc::new(DriverVectorBackend::hip()));
    #[cfg(feature = "zluda")]
    out.push(Arc::new(DriverVectorBackend::zluda()));
    #[cfg(all(feature = "metal", target_os = "macos"))]
    out.push(Arc::new(MetalVectorBackend::new()));
    #[cfg(feature = "opencl")]
    out.push(Arc::new(OpenClVectorBackend::new()));
    out
}

/// Probe every technology compiled into this build, in priority order.
///
/// Technologies whose feature is off are reported as absent so the report
/// always covers every GPU type.
pub fn probe_all() -> Vec<ProbeReport> {
    BackendType::PRIORITY
        .iter()
        .filter(|t| t.is_gpu())
        .map(|t| probe_one(*t))
        .collect()
}

/// Probe one GPU technology.
pub fn probe_one(backend_type: BackendType) -> ProbeReport {
    let report = match backend_type {
        #[cfg(feature = "cuda")]
        BackendType::Cuda => cuda::probe(),
        #[cfg(feature = "hip")]
        BackendType::Hip => hip::probe(),
        #[cfg(feature = "zluda")]
        BackendType::Zluda => zluda::probe(),
        #[cfg(feature = "vulkan")]
        BackendType::Vulkan => vulkan::probe(),
        #[cfg(feature = "directx")]
        BackendType::DirectX => directx::probe(),
        #[cfg(feature = "rocm")]
        BackendType::Rocm => rocm::probe(),
        #[cfg(feature = "oneapi")]
        BackendType::OneApi => oneapi::probe(),
        #[cfg(all(feature = "metal", target_os = "macos"))]
        BackendType::Metal => metal::probe(),
        #[cfg(all(feature = "metal", not(target_os = "macos")))]
        BackendType::Metal => ProbeReport::absent(backend_type, "Metal is only available on macOS"),
        #[cfg(feature = "opencl")]
        BackendType::OpenCl => opencl::probe(),
        #[cfg(feature = "opengl")]
        BackendType::OpenGl => opengl::probe(),
        #[cfg(feature = "webgpu")]
        BackendType::WebGpu => webgpu::probe(),
        BackendType::Cpu => ProbeReport::found(backend_type, "host", vec!["CPU".to_string()])
            .with_pipeline(),
        #[allow(unreachable_patterns)]
        _ => ProbeReport::absent(backend_type, "support not compiled into this build"),
    };
    tracing::debug!(
        target: "strata::accel::gpu",
        backend = %backend_type,
        runtime = ?report.runtime,
        devices = report.devices.len(),
        "probe: {}",
        report.detail
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_all_covers_every_gpu_type_in_order() {
        let reports = probe_all();
        let types: Vec<BackendType> = reports.iter().map(|r| r.backend_type).collect();
        let expected: Vec<BackendType> = BackendType::PRIORITY
            .iter()
            .copied()
            .filter(|t| t.is_gpu())
            .collect();
        assert_eq!(types, expected);
    }

    #[test]
    fn test_probe_only_technologies_never_usable() {
        for t in [
            BackendType::Vulkan,
            BackendType::DirectX,
            BackendType::Rocm,
            BackendType::OneApi,
            BackendType::OpenGl,
            BackendType::WebGpu,
        ] {
            let report = probe_one(t);
            assert!(!report.compute_pipeline, "{} claims a pipeline", t);
            assert!(!report.is_usable());
        }
    }

    #[test]
    fn test_gpu_backends_are_uninitialized_gpu_types() {
        for backend in gpu_vector_backends() {
            assert!(backend.backend_type().is_gpu());
            assert_eq!(backend.state(), strata_accel_core::BackendState::Uninitialized);
        }
    }

    #[test]
    fn test_unavailable_backend_refuses_work() {
        for backend in gpu_vector_backends() {
            if backend.is_available() {
                continue;
            }
            assert!(backend.initialize().is_err());
            let err = backend
                .compute_distances(&[1.0, 0.0], &[0.0, 1.0], 2, strata_accel_core::DistanceMetric::L2)
                .unwrap_err();
            assert!(err.is_fallback_condition());
        }
    }
}
