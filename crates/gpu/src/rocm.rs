//! ROCm HSA runtime probe.
//!
//! Walks HSA agents and keeps the GPU ones. HIP covers compute on the same
//! hardware; this probe reports the lower-level runtime on its own.

use std::ffi::{c_char, c_void, CStr};

use strata_accel_core::{BackendType, DynLib};

use crate::probe::ProbeReport;

const LIBRARIES: &[&CStr] = &[c"libhsa-runtime64.so.1", c"libhsa-runtime64.so"];

const HSA_STATUS_SUCCESS: i32 = 0;
const HSA_AGENT_INFO_NAME: u32 = 0;
const HSA_AGENT_INFO_DEVICE: u32 = 17;
const HSA_DEVICE_TYPE_GPU: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy)]
struct Agent {
    handle: u64,
}

type FnInit = unsafe extern "C" fn() -> i32;
type FnShutDown = unsafe extern "C" fn() -> i32;
type FnAgentGetInfo = unsafe extern "C" fn(agent: Agent, attribute: u32, value: *mut c_void) -> i32;
type AgentCallback = unsafe extern "C" fn(agent: Agent, data: *mut c_void) -> i32;
type FnIterateAgents = unsafe extern "C" fn(callback: AgentCallback, data: *mut c_void) -> i32;

struct Walk {
    get_info: FnAgentGetInfo,
    gpus: Vec<String>,
}

unsafe extern "C" fn visit(agent: Agent, data: *mut c_void) -> i32 {
    let walk = &mut *(data as *mut Walk);
    let mut kind = 0u32;
    if (walk.get_info)(agent, HSA_AGENT_INFO_DEVICE, &mut kind as *mut u32 as *mut c_void)
        != HSA_STATUS_SUCCESS
        || kind != HSA_DEVICE_TYPE_GPU
    {
        return HSA_STATUS_SUCCESS;
    }
    let mut name = [0 as c_char; 64];
    if (walk.get_info)(agent, HSA_AGENT_INFO_NAME, name.as_mut_ptr() as *mut c_void)
        == HSA_STATUS_SUCCESS
    {
        name[63] = 0;
        walk.gpus
            .push(CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned());
    }
    HSA_STATUS_SUCCESS
}

fn try_probe() -> Result<ProbeReport, String> {
    let lib = DynLib::open_first(LIBRARIES)?;
    let init: FnInit = load_sym!(lib, c"hsa_init");
    let shut_down: FnShutDown = load_sym!(lib, c"hsa_shut_down");
    let iterate: FnIterateAgents = load_sym!(lib, c"hsa_iterate_agents");
    let get_info: FnAgentGetInfo = load_sym!(lib, c"hsa_agent_get_info");

    let rc = unsafe { init() };
    if rc != HSA_STATUS_SUCCESS {
        return Ok(ProbeReport::found(BackendType::Rocm, lib.name(), Vec::new())
            .with_detail(format!("hsa_init failed with {:#x}", rc)));
    }
    let mut walk = Walk {
        get_info,
        gpus: Vec::new(),
    };
    unsafe {
        iterate(visit, &mut walk as *mut Walk as *mut c_void);
        shut_down();
    }
    Ok(ProbeReport::found(BackendType::Rocm, lib.name(), walk.gpus)
        .with_detail("runtime detected; compute on ROCm hardware runs through the HIP backend"))
}

/// Probe the HSA runtime.
pub fn probe() -> ProbeReport {
    try_probe().unwrap_or_else(|e| ProbeReport::absent(BackendType::Rocm, e))
}
