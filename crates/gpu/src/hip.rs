//! AMD HIP through the module API and hipRTC.

use std::ffi::CString;

use strata_accel_core::BackendType;

use crate::driver::ffi::HIP_SYMBOLS;
use crate::driver::rtc::HIPRTC;
use crate::driver::{probe_flavor, DriverFlavor, DriverVectorBackend};
use crate::probe::ProbeReport;

fn libraries() -> Vec<CString> {
    vec![
        c"libamdhip64.so".to_owned(),
        c"libamdhip64.so.6".to_owned(),
        c"libamdhip64.so.5".to_owned(),
        c"amdhip64.dll".to_owned(),
        c"amdhip64_6.dll".to_owned(),
    ]
}

/// HIP driver flavor.
pub static HIP: DriverFlavor = DriverFlavor {
    backend_type: BackendType::Hip,
    name: "hip",
    libraries,
    symbols: &HIP_SYMBOLS,
    compiler: &HIPRTC,
};

/// Probe the HIP runtime.
pub fn probe() -> ProbeReport {
    probe_flavor(&HIP)
}

impl DriverVectorBackend {
    /// Uninitialized HIP vector backend.
    pub fn hip() -> Self {
        Self::new(&HIP)
    }
}
