//! Intel oneAPI Level Zero runtime probe.

use std::ffi::{c_void, CStr};

use strata_accel_core::{BackendType, DynLib};

use crate::probe::ProbeReport;

const LIBRARIES: &[&CStr] = &[c"libze_loader.so.1", c"libze_loader.so", c"ze_loader.dll"];

const ZE_RESULT_SUCCESS: i32 = 0;
const ZE_INIT_FLAG_GPU_ONLY: u32 = 1;

type Handle = *mut c_void;
type FnInit = unsafe extern "C" fn(flags: u32) -> i32;
type FnDriverGet = unsafe extern "C" fn(count: *mut u32, drivers: *mut Handle) -> i32;
type FnDeviceGet = unsafe extern "C" fn(driver: Handle, count: *mut u32, devices: *mut Handle) -> i32;

fn try_probe() -> Result<ProbeReport, String> {
    let lib = DynLib::open_first(LIBRARIES)?;
    let init: FnInit = load_sym!(lib, c"zeInit");
    let driver_get: FnDriverGet = load_sym!(lib, c"zeDriverGet");
    let device_get: FnDeviceGet = load_sym!(lib, c"zeDeviceGet");

    let rc = unsafe { init(ZE_INIT_FLAG_GPU_ONLY) };
    if rc != ZE_RESULT_SUCCESS {
        return Ok(ProbeReport::found(BackendType::OneApi, lib.name(), Vec::new())
            .with_detail(format!("zeInit failed with {:#x}", rc)));
    }

    let mut drivers_n = 0u32;
    let mut drivers = Vec::new();
    if unsafe { driver_get(&mut drivers_n, std::ptr::null_mut()) } == ZE_RESULT_SUCCESS && drivers_n > 0 {
        drivers = vec![std::ptr::null_mut(); drivers_n as usize];
        if unsafe { driver_get(&mut drivers_n, drivers.as_mut_ptr()) } != ZE_RESULT_SUCCESS {
            drivers.clear();
        }
    }

    let mut names = Vec::new();
    for (d, driver) in drivers.into_iter().enumerate() {
        let mut n = 0u32;
        if unsafe { device_get(driver, &mut n, std::ptr::null_mut()) } == ZE_RESULT_SUCCESS {
            names.extend((0..n).map(|i| format!("Level Zero driver {} device {}", d, i)));
        }
    }
    Ok(ProbeReport::found(BackendType::OneApi, lib.name(), names)
        .with_detail("runtime detected; no Level Zero compute pipeline in this build"))
}

/// Probe the Level Zero loader.
pub fn probe() -> ProbeReport {
    try_probe().unwrap_or_else(|e| ProbeReport::absent(BackendType::OneApi, e))
}
