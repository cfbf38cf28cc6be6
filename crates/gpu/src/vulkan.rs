//! Vulkan runtime probe.
//!
//! Creates a bare instance through the loader, lists physical devices with
//! their names and destroys the instance again. No compute pipeline is built
//! on Vulkan, so the report never marks it usable.

use std::ffi::{c_char, c_void, CStr};

use strata_accel_core::{BackendType, DynLib};

use crate::probe::ProbeReport;

const LIBRARIES: &[&CStr] = &[
    c"libvulkan.so.1",
    c"libvulkan.so",
    c"vulkan-1.dll",
    c"libvulkan.1.dylib",
    c"libMoltenVK.dylib",
];

const VK_SUCCESS: i32 = 0;
const VK_STRUCTURE_TYPE_INSTANCE_CREATE_INFO: u32 = 1;
/// Byte offset of `deviceName` in `VkPhysicalDeviceProperties`.
const DEVICE_NAME_OFFSET: usize = 20;
const DEVICE_NAME_LEN: usize = 256;
/// Upper bound on `sizeof(VkPhysicalDeviceProperties)` on every ABI.
const PROPERTIES_BYTES: usize = 1024;

type Instance = *mut c_void;
type PhysicalDevice = *mut c_void;

#[repr(C)]
struct InstanceCreateInfo {
    s_type: u32,
    p_next: *const c_void,
    flags: u32,
    p_application_info: *const c_void,
    enabled_layer_count: u32,
    pp_enabled_layer_names: *const *const c_char,
    enabled_extension_count: u32,
    pp_enabled_extension_names: *const *const c_char,
}

type FnCreateInstance = unsafe extern "C" fn(
    info: *const InstanceCreateInfo,
    allocator: *const c_void,
    instance: *mut Instance,
) -> i32;
type FnDestroyInstance = unsafe extern "C" fn(instance: Instance, allocator: *const c_void);
type FnEnumeratePhysicalDevices =
    unsafe extern "C" fn(instance: Instance, count: *mut u32, devices: *mut PhysicalDevice) -> i32;
type FnGetPhysicalDeviceProperties =
    unsafe extern "C" fn(device: PhysicalDevice, properties: *mut c_void);

fn try_probe() -> Result<ProbeReport, String> {
    let lib = DynLib::open_first(LIBRARIES)?;
    let create: FnCreateInstance = load_sym!(lib, c"vkCreateInstance");
    let destroy: FnDestroyInstance = load_sym!(lib, c"vkDestroyInstance");
    let enumerate: FnEnumeratePhysicalDevices = load_sym!(lib, c"vkEnumeratePhysicalDevices");
    let properties: FnGetPhysicalDeviceProperties = load_sym!(lib, c"vkGetPhysicalDeviceProperties");

    let info = InstanceCreateInfo {
        s_type: VK_STRUCTURE_TYPE_INSTANCE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: 0,
        p_application_info: std::ptr::null(),
        enabled_layer_count: 0,
        pp_enabled_layer_names: std::ptr::null(),
        enabled_extension_count: 0,
        pp_enabled_extension_names: std::ptr::null(),
    };
    let mut instance: Instance = std::ptr::null_mut();
    let rc = unsafe { create(&info, std::ptr::null(), &mut instance) };
    if rc != VK_SUCCESS {
        return Err(format!("vkCreateInstance failed with VkResult {}", rc));
    }

    let mut names = Vec::new();
    let mut count = 0u32;
    let rc = unsafe { enumerate(instance, &mut count, std::ptr::null_mut()) };
    if rc == VK_SUCCESS && count > 0 {
        let mut devices = vec![std::ptr::null_mut(); count as usize];
        let rc = unsafe { enumerate(instance, &mut count, devices.as_mut_ptr()) };
        if rc >= VK_SUCCESS {
            for device in devices.into_iter().take(count as usize) {
                // u64 storage keeps the struct's 8-byte alignment.
                let mut props = [0u64; PROPERTIES_BYTES / 8];
                unsafe { properties(device, props.as_mut_ptr() as *mut c_void) };
                let bytes = unsafe {
                    std::slice::from_raw_parts(props.as_ptr() as *const u8, PROPERTIES_BYTES)
                };
                let raw = &bytes[DEVICE_NAME_OFFSET..DEVICE_NAME_OFFSET + DEVICE_NAME_LEN];
                let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
                names.push(String::from_utf8_lossy(&raw[..end]).into_owned());
            }
        }
    }
    unsafe { destroy(instance, std::ptr::null()) };

    Ok(ProbeReport::found(BackendType::Vulkan, lib.name(), names)
        .with_detail("runtime detected; no Vulkan compute pipeline in this build"))
}

/// Probe the Vulkan loader.
pub fn probe() -> ProbeReport {
    try_probe().unwrap_or_else(|e| ProbeReport::absent(BackendType::Vulkan, e))
}
