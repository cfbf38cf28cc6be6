//! CUDA-style driver API bindings loaded at runtime.
//!
//! CUDA and HIP expose the same driver-level shape (init, device query,
//! context, module, launch) under different symbol names. [`DriverSymbols`]
//! names the entry points for one vendor; [`DriverApi::load`] resolves them
//! once from the vendor library and exposes checked wrappers.

use std::ffi::{c_char, c_void, CStr, CString};

use strata_accel_core::DynLib;

use crate::probe::DeviceInfo;

/// Driver error code (`CUresult` / `hipError_t`).
pub type DrvResult = i32;
/// Device ordinal handle.
pub type DrvDevice = i32;
/// Opaque context handle.
pub type DrvContext = *mut c_void;
/// Opaque module handle.
pub type DrvModule = *mut c_void;
/// Opaque kernel handle.
pub type DrvFunction = *mut c_void;
/// Device pointer (64-bit address on the device).
pub type DrvDevicePtr = u64;
/// Opaque stream handle.
pub type DrvStream = *mut c_void;

/// Success for both CUDA and HIP.
pub const DRV_SUCCESS: DrvResult = 0;

type FnInit = unsafe extern "C" fn(flags: u32) -> DrvResult;
type FnDeviceGetCount = unsafe extern "C" fn(count: *mut i32) -> DrvResult;
type FnDeviceGet = unsafe extern "C" fn(device: *mut DrvDevice, ordinal: i32) -> DrvResult;
type FnDeviceGetName =
    unsafe extern "C" fn(name: *mut c_char, len: i32, dev: DrvDevice) -> DrvResult;
type FnDeviceTotalMem = unsafe extern "C" fn(bytes: *mut usize, dev: DrvDevice) -> DrvResult;
type FnDeviceGetAttribute =
    unsafe extern "C" fn(value: *mut i32, attrib: i32, dev: DrvDevice) -> DrvResult;
type FnCtxCreate =
    unsafe extern "C" fn(ctx: *mut DrvContext, flags: u32, dev: DrvDevice) -> DrvResult;
type FnCtxDestroy = unsafe extern "C" fn(ctx: DrvContext) -> DrvResult;
type FnCtxSetCurrent = unsafe extern "C" fn(ctx: DrvContext) -> DrvResult;
type FnMemAlloc = unsafe extern "C" fn(dptr: *mut DrvDevicePtr, bytesize: usize) -> DrvResult;
type FnMemFree = unsafe extern "C" fn(dptr: DrvDevicePtr) -> DrvResult;
type FnMemcpyHtoD =
    unsafe extern "C" fn(dst: DrvDevicePtr, src: *const c_void, bytesize: usize) -> DrvResult;
type FnMemcpyDtoH =
    unsafe extern "C" fn(dst: *mut c_void, src: DrvDevicePtr, bytesize: usize) -> DrvResult;
type FnModuleLoadData =
    unsafe extern "C" fn(module: *mut DrvModule, image: *const c_void) -> DrvResult;
type FnModuleGetFunction = unsafe extern "C" fn(
    func: *mut DrvFunction,
    module: DrvModule,
    name: *const c_char,
) -> DrvResult;
type FnModuleUnload = unsafe extern "C" fn(module: DrvModule) -> DrvResult;
type FnLaunchKernel = unsafe extern "C" fn(
    f: DrvFunction,
    grid_x: u32,
    grid_y: u32,
    grid_z: u32,
    block_x: u32,
    block_y: u32,
    block_z: u32,
    shared_mem: u32,
    stream: DrvStream,
    params: *mut *mut c_void,
    extra: *mut *mut c_void,
) -> DrvResult;
type FnStreamCreate = unsafe extern "C" fn(stream: *mut DrvStream, flags: u32) -> DrvResult;
type FnStreamSynchronize = unsafe extern "C" fn(stream: DrvStream) -> DrvResult;
type FnStreamDestroy = unsafe extern "C" fn(stream: DrvStream) -> DrvResult;

/// Vendor symbol names for the driver entry points.
#[derive(Debug)]
pub struct DriverSymbols {
    /// Vendor prefix used in error messages
    pub vendor: &'static str,
    /// Driver initialisation
    pub init: &'static CStr,
    /// Device count
    pub device_get_count: &'static CStr,
    /// Ordinal → device handle
    pub device_get: &'static CStr,
    /// Device name
    pub device_get_name: &'static CStr,
    /// Device total memory
    pub device_total_mem: &'static CStr,
    /// Integer device attribute
    pub device_get_attribute: &'static CStr,
    /// Attribute id of the multiprocessor count, when the vendor numbering is stable
    pub multiprocessor_attribute: Option<i32>,
    /// Context creation
    pub ctx_create: &'static CStr,
    /// Context destruction
    pub ctx_destroy: &'static CStr,
    /// Bind context to the calling thread
    pub ctx_set_current: &'static CStr,
    /// Device allocation
    pub mem_alloc: &'static CStr,
    /// Device free
    pub mem_free: &'static CStr,
    /// Host → device copy
    pub memcpy_htod: &'static CStr,
    /// Device → host copy
    pub memcpy_dtoh: &'static CStr,
    /// Load a compiled module image
    pub module_load_data: &'static CStr,
    /// Resolve a kernel in a module
    pub module_get_function: &'static CStr,
    /// Unload a module
    pub module_unload: &'static CStr,
    /// Kernel launch
    pub launch_kernel: &'static CStr,
    /// Stream creation (with flags)
    pub stream_create: &'static CStr,
    /// Stream synchronisation
    pub stream_synchronize: &'static CStr,
    /// Stream destruction
    pub stream_destroy: &'static CStr,
}

/// NVIDIA CUDA driver API (also implemented by ZLUDA).
pub static CUDA_SYMBOLS: DriverSymbols = DriverSymbols {
    vendor: "CUDA",
    init: c"cuInit",
    device_get_count: c"cuDeviceGetCount",
    device_get: c"cuDeviceGet",
    device_get_name: c"cuDeviceGetName",
    device_total_mem: c"cuDeviceTotalMem_v2",
    device_get_attribute: c"cuDeviceGetAttribute",
    // CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT
    multiprocessor_attribute: Some(16),
    ctx_create: c"cuCtxCreate_v2",
    ctx_destroy: c"cuCtxDestroy_v2",
    ctx_set_current: c"cuCtxSetCurrent",
    mem_alloc: c"cuMemAlloc_v2",
    mem_free: c"cuMemFree_v2",
    memcpy_htod: c"cuMemcpyHtoD_v2",
    memcpy_dtoh: c"cuMemcpyDtoH_v2",
    module_load_data: c"cuModuleLoadData",
    module_get_function: c"cuModuleGetFunction",
    module_unload: c"cuModuleUnload",
    launch_kernel: c"cuLaunchKernel",
    stream_create: c"cuStreamCreate",
    stream_synchronize: c"cuStreamSynchronize",
    stream_destroy: c"cuStreamDestroy_v2",
};

/// AMD HIP module API.
pub static HIP_SYMBOLS: DriverSymbols = DriverSymbols {
    vendor: "HIP",
    init: c"hipInit",
    device_get_count: c"hipGetDeviceCount",
    device_get: c"hipDeviceGet",
    device_get_name: c"hipDeviceGetName",
    device_total_mem: c"hipDeviceTotalMem",
    device_get_attribute: c"hipDeviceGetAttribute",
    // hipDeviceAttribute_t numbering changed between ROCm releases
    multiprocessor_attribute: None,
    ctx_create: c"hipCtxCreate",
    ctx_destroy: c"hipCtxDestroy",
    ctx_set_current: c"hipCtxSetCurrent",
    mem_alloc: c"hipMalloc",
    mem_free: c"hipFree",
    memcpy_htod: c"hipMemcpyHtoD",
    memcpy_dtoh: c"hipMemcpyDtoH",
    module_load_data: c"hipModuleLoadData",
    module_get_function: c"hipModuleGetFunction",
    module_unload: c"hipModuleUnload",
    launch_kernel: c"hipModuleLaunchKernel",
    stream_create: c"hipStreamCreateWithFlags",
    stream_synchronize: c"hipStreamSynchronize",
    stream_destroy: c"hipStreamDestroy",
};

/// Loaded driver library with resolved entry points.
///
/// Shared as `Arc<DriverApi>` by the context, module and every device buffer,
/// so the library stays mapped until the last handle is released.
pub struct DriverApi {
    lib: DynLib,
    symbols: &'static DriverSymbols,

    device_get_count: FnDeviceGetCount,
    device_get: FnDeviceGet,
    device_get_name: FnDeviceGetName,
    device_total_mem: FnDeviceTotalMem,
    device_get_attribute: FnDeviceGetAttribute,
    ctx_create: FnCtxCreate,
    ctx_destroy: FnCtxDestroy,
    ctx_set_current: FnCtxSetCurrent,
    mem_alloc: FnMemAlloc,
    mem_free: FnMemFree,
    memcpy_htod: FnMemcpyHtoD,
    memcpy_dtoh: FnMemcpyDtoH,
    module_load_data: FnModuleLoadData,
    module_get_function: FnModuleGetFunction,
    module_unload: FnModuleUnload,
    launch_kernel: FnLaunchKernel,
    stream_create: FnStreamCreate,
    stream_synchronize: FnStreamSynchronize,
    stream_destroy: FnStreamDestroy,
}

// SAFETY: the CUDA and HIP driver APIs are documented as thread-safe; the
// struct only holds the library handle and function pointers.
unsafe impl Send for DriverApi {}
unsafe impl Sync for DriverApi {}

impl DriverApi {
    /// Open the first loadable library in `libraries`, resolve every entry
    /// point of `symbols` and initialise the driver.
    pub fn load(libraries: &[CString], symbols: &'static DriverSymbols) -> Result<Self, String> {
        let names: Vec<&CStr> = libraries.iter().map(|c| c.as_c_str()).collect();
        let lib = DynLib::open_first(&names)?;

        let init: FnInit = load_sym!(lib, symbols.init);
        let api = Self {
            device_get_count: load_sym!(lib, symbols.device_get_count),
            device_get: load_sym!(lib, symbols.device_get),
            device_get_name: load_sym!(lib, symbols.device_get_name),
            device_total_mem: load_sym!(lib, symbols.device_total_mem),
            device_get_attribute: load_sym!(lib, symbols.device_get_attribute),
            ctx_create: load_sym!(lib, symbols.ctx_create),
            ctx_destroy: load_sym!(lib, symbols.ctx_destroy),
            ctx_set_current: load_sym!(lib, symbols.ctx_set_current),
            mem_alloc: load_sym!(lib, symbols.mem_alloc),
            mem_free: load_sym!(lib, symbols.mem_free),
            memcpy_htod: load_sym!(lib, symbols.memcpy_htod),
            memcpy_dtoh: load_sym!(lib, symbols.memcpy_dtoh),
            module_load_data: load_sym!(lib, symbols.module_load_data),
            module_get_function: load_sym!(lib, symbols.module_get_function),
            module_unload: load_sym!(lib, symbols.module_unload),
            launch_kernel: load_sym!(lib, symbols.launch_kernel),
            stream_create: load_sym!(lib, symbols.stream_create),
            stream_synchronize: load_sym!(lib, symbols.stream_synchronize),
            stream_destroy: load_sym!(lib, symbols.stream_destroy),
            lib,
            symbols,
        };

        let rc = unsafe { init(0) };
        api.check(rc, symbols.init)?;
        Ok(api)
    }

    /// Library the driver was loaded from
    pub fn library_name(&self) -> &str {
        self.lib.name()
    }

    /// Vendor label
    pub fn vendor(&self) -> &'static str {
        self.symbols.vendor
    }

    /// Number of visible devices.
    pub fn device_count(&self) -> Result<i32, String> {
        let mut count = 0i32;
        let rc = unsafe { (self.device_get_count)(&mut count) };
        self.check(rc, self.symbols.device_get_count)?;
        Ok(count)
    }

    /// Device handle for an ordinal.
    pub fn device(&self, ordinal: i32) -> Result<DrvDevice, String> {
        let mut device: DrvDevice = 0;
        let rc = unsafe { (self.device_get)(&mut device, ordinal) };
        self.check(rc, self.symbols.device_get)?;
        Ok(device)
    }

    /// Name, memory and compute units of a device. Queried fresh each call.
    pub fn device_info(&self, device: DrvDevice) -> Result<DeviceInfo, String> {
        let mut buf = [0 as c_char; 256];
        let rc = unsafe { (self.device_get_name)(buf.as_mut_ptr(), buf.len() as i32, device) };
        self.check(rc, self.symbols.device_get_name)?;
        // SAFETY: the driver NUL-terminates within the provided length.
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let mut bytes = 0usize;
        let rc = unsafe { (self.device_total_mem)(&mut bytes, device) };
        self.check(rc, self.symbols.device_total_mem)?;

        let compute_units = match self.symbols.multiprocessor_attribute {
            Some(attr) => {
                let mut value = 0i32;
                let rc = unsafe { (self.device_get_attribute)(&mut value, attr, device) };
                if rc == DRV_SUCCESS {
                    value.max(0) as u32
                } else {
                    0
                }
            }
            None => 0,
        };

        Ok(DeviceInfo {
            name,
            total_memory: bytes as u64,
            compute_units,
        })
    }

    /// Create a context on `device`; it becomes current on the calling thread.
    pub fn ctx_create(&self, device: DrvDevice) -> Result<DrvContext, String> {
        let mut ctx: DrvContext = std::ptr::null_mut();
        let rc = unsafe { (self.ctx_create)(&mut ctx, 0, device) };
        self.check(rc, self.symbols.ctx_create)?;
        Ok(ctx)
    }

    /// Destroy a context.
    pub fn ctx_destroy(&self, ctx: DrvContext) -> Result<(), String> {
        let rc = unsafe { (self.ctx_destroy)(ctx) };
        self.check(rc, self.symbols.ctx_destroy)
    }

    /// Bind `ctx` to the calling thread.
    pub fn ctx_set_current(&self, ctx: DrvContext) -> Result<(), String> {
        let rc = unsafe { (self.ctx_set_current)(ctx) };
        self.check(rc, self.symbols.ctx_set_current)
    }

    /// Allocate `bytesize` bytes on the device.
    pub fn mem_alloc(&self, bytesize: usize) -> Result<DrvDevicePtr, String> {
        let mut dptr: DrvDevicePtr = 0;
        let rc = unsafe { (self.mem_alloc)(&mut dptr, bytesize) };
        self.check(rc, self.symbols.mem_alloc)?;
        Ok(dptr)
    }

    /// Free device memory.
    pub fn mem_free(&self, dptr: DrvDevicePtr) -> Result<(), String> {
        let rc = unsafe { (self.mem_free)(dptr) };
        self.check(rc, self.symbols.mem_free)
    }

    /// Copy `bytesize` bytes from host `src` to device `dst`.
    pub fn memcpy_htod(
        &self,
        dst: DrvDevicePtr,
        src: *const c_void,
        bytesize: usize,
    ) -> Result<(), String> {
        let rc = unsafe { (self.memcpy_htod)(dst, src, bytesize) };
        self.check(rc, self.symbols.memcpy_htod)
    }

    /// Copy `bytesize` bytes from device `src` to host `dst`.
    pub fn memcpy_dtoh(
        &self,
        dst: *mut c_void,
        src: DrvDevicePtr,
        bytesize: usize,
    ) -> Result<(), String> {
        let rc = unsafe { (self.memcpy_dtoh)(dst, src, bytesize) };
        self.check(rc, self.symbols.memcpy_dtoh)
    }

    /// Load a compiled module image (PTX text or code object).
    pub fn module_load_data(&self, image: &[u8]) -> Result<DrvModule, String> {
        let mut module: DrvModule = std::ptr::null_mut();
        let rc = unsafe { (self.module_load_data)(&mut module, image.as_ptr() as *const c_void) };
        self.check(rc, self.symbols.module_load_data)?;
        Ok(module)
    }

    /// Look up a kernel by name inside a loaded module.
    pub fn module_get_function(&self, module: DrvModule, name: &CStr) -> Result<DrvFunction, String> {
        let mut func: DrvFunction = std::ptr::null_mut();
        let rc = unsafe { (self.module_get_function)(&mut func, module, name.as_ptr()) };
        self.check(rc, self.symbols.module_get_function)?;
        Ok(func)
    }

    /// Unload a module.
    pub fn module_unload(&self, module: DrvModule) -> Result<(), String> {
        let rc = unsafe { (self.module_unload)(module) };
        self.check(rc, self.symbols.module_unload)
    }

    /// Launch a kernel on `stream`.
    ///
    /// # Safety
    ///
    /// `params` must point to an array of pointers to kernel arguments that
    /// match the kernel signature exactly, and the pointed-to data must stay
    /// alive until the stream is synchronized.
    pub unsafe fn launch_kernel(
        &self,
        func: DrvFunction,
        grid: (u32, u32, u32),
        block: (u32, u32, u32),
        stream: DrvStream,
        params: *mut *mut c_void,
    ) -> Result<(), String> {
        let rc = (self.launch_kernel)(
            func,
            grid.0,
            grid.1,
            grid.2,
            block.0,
            block.1,
            block.2,
            0,
            stream,
            params,
            std::ptr::null_mut(),
        );
        self.check(rc, self.symbols.launch_kernel)
    }

    /// Create a stream.
    pub fn stream_create(&self) -> Result<DrvStream, String> {
        let mut stream: DrvStream = std::ptr::null_mut();
        let rc = unsafe { (self.stream_create)(&mut stream, 0) };
        self.check(rc, self.symbols.stream_create)?;
        Ok(stream)
    }

    /// Block until all work on `stream` is complete.
    pub fn stream_synchronize(&self, stream: DrvStream) -> Result<(), String> {
        let rc = unsafe { (self.stream_synchronize)(stream) };
        self.check(rc, self.symbols.stream_synchronize)
    }

    /// Destroy a stream.
    pub fn stream_destroy(&self, stream: DrvStream) -> Result<(), String> {
        let rc = unsafe { (self.stream_destroy)(stream) };
        self.check(rc, self.symbols.stream_destroy)
    }

    fn check(&self, rc: DrvResult, name: &CStr) -> Result<(), String> {
        check(rc, self.symbols.vendor, name)
    }
}

/// Turn a driver result code into a descriptive error.
fn check(rc: DrvResult, vendor: &str, name: &CStr) -> Result<(), String> {
    if rc == DRV_SUCCESS {
        Ok(())
    } else {
        Err(format!(
            "{} failed with {} error code {}",
            name.to_string_lossy(),
            vendor,
            rc
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_formats_vendor_and_symbol() {
        assert!(check(DRV_SUCCESS, "CUDA", c"cuInit").is_ok());
        let err = check(2, "HIP", c"hipMalloc").unwrap_err();
        assert_eq!(err, "hipMalloc failed with HIP error code 2");
    }

    #[test]
    fn test_symbol_tables_use_vendor_prefixes() {
        for (table, prefix) in [(&CUDA_SYMBOLS, "cu"), (&HIP_SYMBOLS, "hip")] {
            for name in [
                table.init,
                table.mem_alloc,
                table.launch_kernel,
                table.module_load_data,
                table.ctx_set_current,
            ] {
                assert!(name.to_string_lossy().starts_with(prefix));
            }
        }
    }

    #[test]
    fn test_load_missing_library_fails_cleanly() {
        let libs = vec![CString::new("libstrata_accel_no_driver.so").unwrap()];
        assert!(DriverApi::load(&libs, &CUDA_SYMBOLS).is_err());
    }
}
