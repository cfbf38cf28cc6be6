//! NVIDIA CUDA through the driver API and NVRTC.

use std::ffi::CString;

use strata_accel_core::BackendType;

use crate::driver::ffi::CUDA_SYMBOLS;
use crate::driver::rtc::NVRTC;
use crate::driver::{probe_flavor, DriverFlavor, DriverVectorBackend};
use crate::probe::ProbeReport;

fn libraries() -> Vec<CString> {
    vec![
        c"libcuda.so.1".to_owned(),
        c"libcuda.so".to_owned(),
        c"nvcuda.dll".to_owned(),
    ]
}

/// CUDA driver flavor.
pub static CUDA: DriverFlavor = DriverFlavor {
    backend_type: BackendType::Cuda,
    name: "cuda",
    libraries,
    symbols: &CUDA_SYMBOLS,
    compiler: &NVRTC,
};

/// Probe the CUDA driver.
pub fn probe() -> ProbeReport {
    probe_flavor(&CUDA)
}

impl DriverVectorBackend {
    /// Uninitialized CUDA vector backend.
    pub fn cuda() -> Self {
        Self::new(&CUDA)
    }
}
