//! OpenCL 1.2 ICD loader bindings resolved at runtime.

use std::ffi::{c_char, c_void, CStr};

use strata_accel_core::DynLib;

use crate::probe::DeviceInfo;

pub type ClInt = i32;
pub type ClUint = u32;
pub type PlatformId = *mut c_void;
pub type DeviceId = *mut c_void;
pub type Context = *mut c_void;
pub type Queue = *mut c_void;
pub type Program = *mut c_void;
pub type Kernel = *mut c_void;
pub type Mem = *mut c_void;

pub const CL_SUCCESS: ClInt = 0;
pub const CL_DEVICE_NOT_FOUND: ClInt = -1;
pub const CL_DEVICE_TYPE_GPU: u64 = 1 << 2;
pub const CL_DEVICE_TYPE_ACCELERATOR: u64 = 1 << 3;
pub const CL_DEVICE_NAME: ClUint = 0x102B;
pub const CL_DEVICE_GLOBAL_MEM_SIZE: ClUint = 0x101F;
pub const CL_DEVICE_MAX_COMPUTE_UNITS: ClUint = 0x1002;
pub const CL_MEM_WRITE_ONLY: u64 = 1 << 1;
pub const CL_MEM_READ_ONLY: u64 = 1 << 2;
pub const CL_MEM_COPY_HOST_PTR: u64 = 1 << 5;
pub const CL_PROGRAM_BUILD_LOG: ClUint = 0x1183;
pub const CL_TRUE: ClUint = 1;

type Notify = *const c_void;

type FnGetPlatformIds =
    unsafe extern "C" fn(num_entries: ClUint, platforms: *mut PlatformId, num: *mut ClUint) -> ClInt;
type FnGetDeviceIds = unsafe extern "C" fn(
    platform: PlatformId,
    device_type: u64,
    num_entries: ClUint,
    devices: *mut DeviceId,
    num: *mut ClUint,
) -> ClInt;
type FnGetDeviceInfo = unsafe extern "C" fn(
    device: DeviceId,
    param: ClUint,
    size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> ClInt;
type FnCreateContext = unsafe extern "C" fn(
    props: *const isize,
    num_devices: ClUint,
    devices: *const DeviceId,
    notify: Notify,
    user_data: *mut c_void,
    err: *mut ClInt,
) -> Context;
type FnCreateCommandQueue =
    unsafe extern "C" fn(ctx: Context, device: DeviceId, props: u64, err: *mut ClInt) -> Queue;
type FnCreateProgramWithSource = unsafe extern "C" fn(
    ctx: Context,
    count: ClUint,
    strings: *const *const c_char,
    lengths: *const usize,
    err: *mut ClInt,
) -> Program;
type FnBuildProgram = unsafe extern "C" fn(
    program: Program,
    num_devices: ClUint,
    devices: *const DeviceId,
    options: *const c_char,
    notify: Notify,
    user_data: *mut c_void,
) -> ClInt;
type FnGetProgramBuildInfo = unsafe extern "C" fn(
    program: Program,
    device: DeviceId,
    param: ClUint,
    size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> ClInt;
type FnCreateKernel =
    unsafe extern "C" fn(program: Program, name: *const c_char, err: *mut ClInt) -> Kernel;
type FnCreateBuffer = unsafe extern "C" fn(
    ctx: Context,
    flags: u64,
    size: usize,
    host_ptr: *mut c_void,
    err: *mut ClInt,
) -> Mem;
type FnSetKernelArg =
    unsafe extern "C" fn(kernel: Kernel, index: ClUint, size: usize, value: *const c_void) -> ClInt;
type FnEnqueueNdRangeKernel = unsafe extern "C" fn(
    queue: Queue,
    kernel: Kernel,
    work_dim: ClUint,
    offset: *const usize,
    global: *const usize,
    local: *const usize,
    num_events: ClUint,
    wait_list: *const c_void,
    event: *mut c_void,
) -> ClInt;
type FnEnqueueReadBuffer = unsafe extern "C" fn(
    queue: Queue,
    buffer: Mem,
    blocking: ClUint,
    offset: usize,
    size: usize,
    ptr: *mut c_void,
    num_events: ClUint,
    wait_list: *const c_void,
    event: *mut c_void,
) -> ClInt;
type FnFinish = unsafe extern "C" fn(queue: Queue) -> ClInt;
type FnRelease = unsafe extern "C" fn(obj: *mut c_void) -> ClInt;

/// ICD loader library names, most common first.
pub const LIBRARIES: &[&CStr] = &[
    c"libOpenCL.so.1",
    c"libOpenCL.so",
    c"OpenCL.dll",
    c"/System/Library/Frameworks/OpenCL.framework/OpenCL",
];

/// Resolved OpenCL entry points.
pub struct OpenClApi {
    lib: DynLib,
    get_platform_ids: FnGetPlatformIds,
    get_device_ids: FnGetDeviceIds,
    get_device_info: FnGetDeviceInfo,
    create_context: FnCreateContext,
    create_command_queue: FnCreateCommandQueue,
    create_program_with_source: FnCreateProgramWithSource,
    build_program: FnBuildProgram,
    get_program_build_info: FnGetProgramBuildInfo,
    create_kernel: FnCreateKernel,
    create_buffer: FnCreateBuffer,
    set_kernel_arg: FnSetKernelArg,
    enqueue_nd_range_kernel: FnEnqueueNdRangeKernel,
    enqueue_read_buffer: FnEnqueueReadBuffer,
    finish: FnFinish,
    release_mem_object: FnRelease,
    release_kernel: FnRelease,
    release_program: FnRelease,
    release_command_queue: FnRelease,
    release_context: FnRelease,
}

// SAFETY: OpenCL 1.2 API calls are thread-safe except clSetKernelArg on a
// shared kernel, which the backend only calls under its session mutex.
unsafe impl Send for OpenClApi {}
unsafe impl Sync for OpenClApi {}

fn check(rc: ClInt, what: &str) -> Result<(), String> {
    if rc == CL_SUCCESS {
        Ok(())
    } else {
        Err(format!("{} failed with OpenCL error {}", what, rc))
    }
}

impl OpenClApi {
    /// Open the ICD loader and resolve every entry point.
    pub fn load() -> Result<Self, String> {
        let lib = DynLib::open_first(LIBRARIES)?;
        Ok(Self {
            get_platform_ids: load_sym!(lib, c"clGetPlatformIDs"),
            get_device_ids: load_sym!(lib, c"clGetDeviceIDs"),
            get_device_info: load_sym!(lib, c"clGetDeviceInfo"),
            create_context: load_sym!(lib, c"clCreateContext"),
            create_command_queue: load_sym!(lib, c"clCreateCommandQueue"),
            create_program_with_source: load_sym!(lib, c"clCreateProgramWithSource"),
            build_program: load_sym!(lib, c"clBuildProgram"),
            get_program_build_info: load_sym!(lib, c"clGetProgramBuildInfo"),
            create_kernel: load_sym!(lib, c"clCreateKernel"),
            create_buffer: load_sym!(lib, c"clCreateBuffer"),
            set_kernel_arg: load_sym!(lib, c"clSetKernelArg"),
            enqueue_nd_range_kernel: load_sym!(lib, c"clEnqueueNDRangeKernel"),
            enqueue_read_buffer: load_sym!(lib, c"clEnqueueReadBuffer"),
            finish: load_sym!(lib, c"clFinish"),
            release_mem_object: load_sym!(lib, c"clReleaseMemObject"),
            release_kernel: load_sym!(lib, c"clReleaseKernel"),
            release_program: load_sym!(lib, c"clReleaseProgram"),
            release_command_queue: load_sym!(lib, c"clReleaseCommandQueue"),
            release_context: load_sym!(lib, c"clReleaseContext"),
            lib,
        })
    }

    /// Library the loader was opened from
    pub fn library_name(&self) -> &str {
        self.lib.name()
    }

    /// GPU and accelerator devices across every platform.
    pub fn compute_devices(&self) -> Result<Vec<DeviceId>, String> {
        let mut count: ClUint = 0;
        check(
            unsafe { (self.get_platform_ids)(0, std::ptr::null_mut(), &mut count) },
            "clGetPlatformIDs",
        )?;
        let mut platforms = vec![std::ptr::null_mut(); count as usize];
        if count > 0 {
            check(
                unsafe { (self.get_platform_ids)(count, platforms.as_mut_ptr(), std::ptr::null_mut()) },
                "clGetPlatformIDs",
            )?;
        }

        let wanted = CL_DEVICE_TYPE_GPU | CL_DEVICE_TYPE_ACCELERATOR;
        let mut devices = Vec::new();
        for platform in platforms {
            let mut n: ClUint = 0;
            let rc = unsafe { (self.get_device_ids)(platform, wanted, 0, std::ptr::null_mut(), &mut n) };
            if rc == CL_DEVICE_NOT_FOUND || n == 0 {
                continue;
            }
            check(rc, "clGetDeviceIDs")?;
            let mut ids = vec![std::ptr::null_mut(); n as usize];
            check(
                unsafe { (self.get_device_ids)(platform, wanted, n, ids.as_mut_ptr(), std::ptr::null_mut()) },
                "clGetDeviceIDs",
            )?;
            devices.extend(ids);
        }
        Ok(devices)
    }

    /// Name, global memory and compute units of a device.
    pub fn device_info(&self, device: DeviceId) -> Result<DeviceInfo, String> {
        let mut name = [0u8; 256];
        check(
            unsafe {
                (self.get_device_info)(
                    device,
                    CL_DEVICE_NAME,
                    name.len(),
                    name.as_mut_ptr() as *mut c_void,
                    std::ptr::null_mut(),
                )
            },
            "clGetDeviceInfo(NAME)",
        )?;
        let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());

        let mut memory: u64 = 0;
        check(
            unsafe {
                (self.get_device_info)(
                    device,
                    CL_DEVICE_GLOBAL_MEM_SIZE,
                    std::mem::size_of::<u64>(),
                    &mut memory as *mut u64 as *mut c_void,
                    std::ptr::null_mut(),
                )
            },
            "clGetDeviceInfo(GLOBAL_MEM_SIZE)",
        )?;

        let mut units: ClUint = 0;
        check(
            unsafe {
                (self.get_device_info)(
                    device,
                    CL_DEVICE_MAX_COMPUTE_UNITS,
                    std::mem::size_of::<ClUint>(),
                    &mut units as *mut ClUint as *mut c_void,
                    std::ptr::null_mut(),
                )
            },
            "clGetDeviceInfo(MAX_COMPUTE_UNITS)",
        )?;

        Ok(DeviceInfo {
            name: String::from_utf8_lossy(&name[..end]).trim().to_string(),
            total_memory: memory,
            compute_units: units,
        })
    }

    /// Context over one device.
    pub fn create_context(&self, device: DeviceId) -> Result<Context, String> {
        let mut err = CL_SUCCESS;
        let ctx = unsafe {
            (self.create_context)(std::ptr::null(), 1, &device, std::ptr::null(), std::ptr::null_mut(), &mut err)
        };
        check(err, "clCreateContext")?;
        Ok(ctx)
    }

    /// In-order command queue.
    pub fn create_queue(&self, ctx: Context, device: DeviceId) -> Result<Queue, String> {
        let mut err = CL_SUCCESS;
        let queue = unsafe { (self.create_command_queue)(ctx, device, 0, &mut err) };
        check(err, "clCreateCommandQueue")?;
        Ok(queue)
    }

    /// Create and build a program, returning the build log on failure.
    pub fn build_program(&self, ctx: Context, device: DeviceId, source: &str) -> Result<Program, String> {
        let mut err = CL_SUCCESS;
        let ptr = source.as_ptr() as *const c_char;
        let len = source.len();
        let program = unsafe { (self.create_program_with_source)(ctx, 1, &ptr, &len, &mut err) };
        check(err, "clCreateProgramWithSource")?;

        let rc = unsafe {
            (self.build_program)(program, 1, &device, std::ptr::null(), std::ptr::null(), std::ptr::null_mut())
        };
        if rc != CL_SUCCESS {
            let log = self.build_log(program, device);
            self.release_program(program);
            return Err(format!("clBuildProgram failed with OpenCL error {}: {}", rc, log));
        }
        Ok(program)
    }

    fn build_log(&self, program: Program, device: DeviceId) -> String {
        let mut size = 0usize;
        let rc = unsafe {
            (self.get_program_build_info)(program, device, CL_PROGRAM_BUILD_LOG, 0, std::ptr::null_mut(), &mut size)
        };
        if rc != CL_SUCCESS || size == 0 {
            return String::new();
        }
        let mut buf = vec![0u8; size];
        let rc = unsafe {
            (self.get_program_build_info)(
                program,
                device,
                CL_PROGRAM_BUILD_LOG,
                size,
                buf.as_mut_ptr() as *mut c_void,
                std::ptr::null_mut(),
            )
        };
        if rc != CL_SUCCESS {
            return String::new();
        }
        String::from_utf8_lossy(&buf).trim_end_matches('\0').trim().to_string()
    }

    /// Kernel by name.
    pub fn create_kernel(&self, program: Program, name: &CStr) -> Result<Kernel, String> {
        let mut err = CL_SUCCESS;
        let kernel = unsafe { (self.create_kernel)(program, name.as_ptr(), &mut err) };
        check(err, "clCreateKernel")?;
        Ok(kernel)
    }

    /// Device buffer initialised from `data`.
    pub fn buffer_from(&self, ctx: Context, data: &[f32]) -> Result<Mem, String> {
        let mut err = CL_SUCCESS;
        let mem = unsafe {
            (self.create_buffer)(
                ctx,
                CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR,
                std::mem::size_of_val(data),
                data.as_ptr() as *mut c_void,
                &mut err,
            )
        };
        check(err, "clCreateBuffer")?;
        Ok(mem)
    }

    /// Uninitialised output buffer of `len` floats.
    pub fn output_buffer(&self, ctx: Context, len: usize) -> Result<Mem, String> {
        let mut err = CL_SUCCESS;
        let mem = unsafe {
            (self.create_buffer)(
                ctx,
                CL_MEM_WRITE_ONLY,
                len * std::mem::size_of::<f32>(),
                std::ptr::null_mut(),
                &mut err,
            )
        };
        check(err, "clCreateBuffer")?;
        Ok(mem)
    }

    /// Bind argument `index` to the bytes of `value`.
    pub fn set_arg<T>(&self, kernel: Kernel, index: ClUint, value: &T) -> Result<(), String> {
        check(
            unsafe {
                (self.set_kernel_arg)(
                    kernel,
                    index,
                    std::mem::size_of::<T>(),
                    value as *const T as *const c_void,
                )
            },
            "clSetKernelArg",
        )
    }

    /// Enqueue a 2-D range with an implementation-chosen work-group size.
    pub fn enqueue_2d(&self, queue: Queue, kernel: Kernel, global: [usize; 2]) -> Result<(), String> {
        check(
            unsafe {
                (self.enqueue_nd_range_kernel)(
                    queue,
                    kernel,
                    2,
                    std::ptr::null(),
                    global.as_ptr(),
                    std::ptr::null(),
                    0,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                )
            },
            "clEnqueueNDRangeKernel",
        )
    }

    /// Blocking read of the whole buffer into `out`.
    pub fn read(&self, queue: Queue, mem: Mem, out: &mut [f32]) -> Result<(), String> {
        check(
            unsafe {
                (self.enqueue_read_buffer)(
                    queue,
                    mem,
                    CL_TRUE,
                    0,
                    std::mem::size_of_val(out),
                    out.as_mut_ptr() as *mut c_void,
                    0,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                )
            },
            "clEnqueueReadBuffer",
        )
    }

    /// Wait for the queue to drain.
    pub fn finish(&self, queue: Queue) -> Result<(), String> {
        check(unsafe { (self.finish)(queue) }, "clFinish")
    }

    pub fn release_mem(&self, mem: Mem) {
        unsafe { (self.release_mem_object)(mem) };
    }

    pub fn release_kernel(&self, kernel: Kernel) {
        unsafe { (self.release_kernel)(kernel) };
    }

    pub fn release_program(&self, program: Program) {
        unsafe { (self.release_program)(program) };
    }

    pub fn release_queue(&self, queue: Queue) {
        unsafe { (self.release_command_queue)(queue) };
    }

    pub fn release_context(&self, ctx: Context) {
        unsafe { (self.release_context)(ctx) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reports_error_code() {
        assert!(check(CL_SUCCESS, "clFinish").is_ok());
        assert_eq!(
            check(-5, "clCreateBuffer").unwrap_err(),
            "clCreateBuffer failed with OpenCL error -5"
        );
    }

    #[test]
    fn test_device_type_mask_excludes_cpu() {
        const CL_DEVICE_TYPE_CPU: u64 = 1 << 1;
        assert_eq!((CL_DEVICE_TYPE_GPU | CL_DEVICE_TYPE_ACCELERATOR) & CL_DEVICE_TYPE_CPU, 0);
    }
}
