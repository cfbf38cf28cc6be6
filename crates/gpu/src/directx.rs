//! Direct3D 12 runtime probe (Windows only).
//!
//! `D3D12CreateDevice` with a null output pointer reports whether a device
//! could be created on the default adapter without creating it.

use strata_accel_core::BackendType;

use crate::probe::ProbeReport;

#[cfg(windows)]
fn try_probe() -> Result<ProbeReport, String> {
    use std::ffi::c_void;
    use strata_accel_core::DynLib;

    #[repr(C)]
    struct Guid {
        data1: u32,
        data2: u16,
        data3: u16,
        data4: [u8; 8],
    }

    // IID_ID3D12Device {189819f1-1db6-4b57-be54-1821339b85f7}
    const IID_ID3D12_DEVICE: Guid = Guid {
        data1: 0x189819f1,
        data2: 0x1db6,
        data3: 0x4b57,
        data4: [0xbe, 0x54, 0x18, 0x21, 0x33, 0x9b, 0x85, 0xf7],
    };
    const D3D_FEATURE_LEVEL_11_0: u32 = 0xb000;
    const S_OK: i32 = 0;
    const S_FALSE: i32 = 1;

    type FnCreateDevice = unsafe extern "system" fn(
        adapter: *mut c_void,
        level: u32,
        riid: *const Guid,
        device: *mut *mut c_void,
    ) -> i32;

    let lib = DynLib::open(c"d3d12.dll")?;
    let create: FnCreateDevice = load_sym!(lib, c"D3D12CreateDevice");
    let hr = unsafe {
        create(
            std::ptr::null_mut(),
            D3D_FEATURE_LEVEL_11_0,
            &IID_ID3D12_DEVICE,
            std::ptr::null_mut(),
        )
    };
    let devices = if hr == S_OK || hr == S_FALSE {
        vec!["default adapter".to_string()]
    } else {
        Vec::new()
    };
    Ok(ProbeReport::found(BackendType::DirectX, lib.name(), devices)
        .with_detail("runtime detected; no Direct3D compute pipeline in this build"))
}

#[cfg(not(windows))]
fn try_probe() -> Result<ProbeReport, String> {
    Err("Direct3D 12 is only available on Windows".to_string())
}

/// Probe Direct3D 12.
pub fn probe() -> ProbeReport {
    try_probe().unwrap_or_else(|e| ProbeReport::absent(BackendType::DirectX, e))
}
