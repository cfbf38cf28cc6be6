//! ZLUDA: the CUDA driver API implemented on non-NVIDIA GPUs.
//!
//! ZLUDA ships its own `libcuda` replacement. It is looked up under
//! `$ZLUDA_PATH` first and then by its distinct file name, so a real NVIDIA
//! driver is never mistaken for it. Kernels are still compiled to PTX by NVRTC.

use std::ffi::CString;
use std::path::PathBuf;

use strata_accel_core::BackendType;

use crate::driver::ffi::CUDA_SYMBOLS;
use crate::driver::rtc::NVRTC;
use crate::driver::{probe_flavor, DriverFlavor, DriverVectorBackend};
use crate::probe::ProbeReport;

/// Environment variable naming the ZLUDA install directory.
pub const ZLUDA_PATH_ENV: &str = "ZLUDA_PATH";

#[cfg(windows)]
const FILE_NAMES: &[&str] = &["nvcuda.dll"];
#[cfg(not(windows))]
const FILE_NAMES: &[&str] = &["libcuda.so.zluda", "libcuda.so"];

fn libraries() -> Vec<CString> {
    let mut out = Vec::new();
    if let Some(dir) = std::env::var_os(ZLUDA_PATH_ENV) {
        let dir = PathBuf::from(dir);
        for file in FILE_NAMES {
            if let Some(c) = dir.join(file).to_str().and_then(|s| CString::new(s).ok()) {
                out.push(c);
            }
        }
    }
    out.push(c"libcuda.so.zluda".to_owned());
    out
}

/// ZLUDA driver flavor.
pub static ZLUDA: DriverFlavor = DriverFlavor {
    backend_type: BackendType::Zluda,
    name: "zluda",
    libraries,
    symbols: &CUDA_SYMBOLS,
    compiler: &NVRTC,
};

/// Probe for a ZLUDA install.
pub fn probe() -> ProbeReport {
    probe_flavor(&ZLUDA)
}

impl DriverVectorBackend {
    /// Uninitialized ZLUDA vector backend.
    pub fn zluda() -> Self {
        Self::new(&ZLUDA)
    }
}
