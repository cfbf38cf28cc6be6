//! WebGPU native runtime probe (wgpu-native or Dawn).

use std::ffi::{c_void, CStr};

use strata_accel_core::{BackendType, DynLib};

use crate::probe::ProbeReport;

const LIBRARIES: &[&CStr] = &[
    c"libwgpu_native.so",
    c"libwebgpu_dawn.so",
    c"wgpu_native.dll",
    c"webgpu_dawn.dll",
    c"libwgpu_native.dylib",
    c"libwebgpu_dawn.dylib",
];

type Instance = *mut c_void;
type FnCreateInstance = unsafe extern "C" fn(descriptor: *const c_void) -> Instance;
type FnInstanceRelease = unsafe extern "C" fn(instance: Instance);

fn try_probe() -> Result<ProbeReport, String> {
    let lib = DynLib::open_first(LIBRARIES)?;
    let create: FnCreateInstance = load_sym!(lib, c"wgpuCreateInstance");
    let release: FnInstanceRelease = load_sym!(lib, c"wgpuInstanceRelease");

    let instance = unsafe { create(std::ptr::null()) };
    if instance.is_null() {
        return Ok(ProbeReport::found(BackendType::WebGpu, lib.name(), Vec::new())
            .with_detail("wgpuCreateInstance returned null"));
    }
    unsafe { release(instance) };
    // Adapter requests complete through callbacks; the probe stops at the instance.
    Ok(ProbeReport::found(BackendType::WebGpu, lib.name(), Vec::new())
        .with_detail("instance created; no WebGPU compute pipeline in this build"))
}

/// Probe a native WebGPU implementation.
pub fn probe() -> ProbeReport {
    try_probe().unwrap_or_else(|e| ProbeReport::absent(BackendType::WebGpu, e))
}
