//! Objective-C runtime and Metal.framework bindings.
//!
//! Every Metal call is an `objc_msgSend` with a concrete signature. The
//! [`msg_send!`] macro transmutes the variadic dispatcher to that signature at
//! the call site.

use std::ffi::{c_char, c_void, CStr, CString};

/// Objective-C object pointer (`id`).
pub type Id = *mut c_void;
/// Objective-C selector (`SEL`).
pub type Sel = *mut c_void;
/// Objective-C class pointer (`Class`).
pub type Class = *mut c_void;
/// Pointer-sized unsigned integer.
pub type NSUInteger = usize;

/// The nil object.
pub const NIL: Id = std::ptr::null_mut();

/// CPU and GPU share the allocation.
pub const MTL_RESOURCE_STORAGE_MODE_SHARED: NSUInteger = 0;

#[link(name = "objc", kind = "dylib")]
extern "C" {
    pub fn objc_getClass(name: *const c_char) -> Class;
    pub fn sel_registerName(name: *const c_char) -> Sel;
    pub fn objc_msgSend(receiver: Id, selector: Sel, ...) -> Id;
}

#[link(name = "Metal", kind = "framework")]
extern "C" {
    /// Default Metal device, retained, or nil.
    pub fn MTLCreateSystemDefaultDevice() -> Id;
}

#[link(name = "Foundation", kind = "framework")]
extern "C" {}

/// `msg_send!(Ret; obj, sel, arg: Ty, ...)`
///
/// Must be used inside an `unsafe` block with argument types that match the
/// Objective-C method exactly.
macro_rules! msg_send {
    ($ret:ty; $obj:expr, $sel:expr $(, $arg:expr => $ty:ty)* $(,)?) => {{
        let f: unsafe extern "C" fn($crate::metal::ffi::Id, $crate::metal::ffi::Sel $(, $ty)*) -> $ret =
            std::mem::transmute($crate::metal::ffi::objc_msgSend as *const std::ffi::c_void);
        f($obj, $sel $(, $arg)*)
    }};
}
pub(crate) use msg_send;

/// Selectors registered once per session.
pub struct Selectors {
    pub name: Sel,
    pub recommended_max_working_set_size: Sel,
    pub new_command_queue: Sel,
    pub new_library_with_source: Sel,
    pub new_function_with_name: Sel,
    pub new_compute_pipeline: Sel,
    pub new_buffer_with_bytes: Sel,
    pub new_buffer_with_length: Sel,
    pub command_buffer: Sel,
    pub compute_command_encoder: Sel,
    pub set_compute_pipeline: Sel,
    pub set_buffer: Sel,
    pub set_bytes: Sel,
    pub dispatch_threadgroups: Sel,
    pub end_encoding: Sel,
    pub commit: Sel,
    pub wait_until_completed: Sel,
    pub contents: Sel,
    pub release: Sel,
}

unsafe fn sel(name: &CStr) -> Sel {
    sel_registerName(name.as_ptr())
}

impl Selectors {
    /// Register every selector the backend uses.
    ///
    /// # Safety
    ///
    /// The Objective-C runtime must be loaded, which linking this module
    /// guarantees.
    pub unsafe fn register() -> Self {
        Self {
            name: sel(c"name"),
            recommended_max_working_set_size: sel(c"recommendedMaxWorkingSetSize"),
            new_command_queue: sel(c"newCommandQueue"),
            new_library_with_source: sel(c"newLibraryWithSource:options:error:"),
            new_function_with_name: sel(c"newFunctionWithName:"),
            new_compute_pipeline: sel(c"newComputePipelineStateWithFunction:error:"),
            new_buffer_with_bytes: sel(c"newBufferWithBytes:length:options:"),
            new_buffer_with_length: sel(c"newBufferWithLength:options:"),
            command_buffer: sel(c"commandBuffer"),
            compute_command_encoder: sel(c"computeCommandEncoder"),
            set_compute_pipeline: sel(c"setComputePipelineState:"),
            set_buffer: sel(c"setBuffer:offset:atIndex:"),
            set_bytes: sel(c"setBytes:length:atIndex:"),
            dispatch_threadgroups: sel(c"dispatchThreadgroups:threadsPerThreadgroup:"),
            end_encoding: sel(c"endEncoding"),
            commit: sel(c"commit"),
            wait_until_completed: sel(c"waitUntilCompleted"),
            contents: sel(c"contents"),
            release: sel(c"release"),
        }
    }
}

/// Autoreleased `NSString` from a Rust string.
///
/// # Safety
///
/// Must run where an autorelease pool or the process lifetime keeps the
/// result alive for as long as it is used.
pub unsafe fn ns_string(s: &str) -> Result<Id, String> {
    let c = CString::new(s).map_err(|_| format!("{:?} contains NUL", s))?;
    let cls = objc_getClass(c"NSString".as_ptr());
    Ok(msg_send!(Id; cls, sel(c"stringWithUTF8String:"), c.as_ptr() => *const c_char))
}

/// Rust copy of an `NSString`.
///
/// # Safety
///
/// `ns` must be nil or a valid `NSString`.
pub unsafe fn rust_string(ns: Id) -> String {
    if ns == NIL {
        return String::new();
    }
    let ptr = msg_send!(*const c_char; ns, sel(c"UTF8String"));
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// `-[NSObject description]`, used for `NSError` messages.
///
/// # Safety
///
/// `obj` must be nil or a valid Objective-C object.
pub unsafe fn describe(obj: Id) -> String {
    if obj == NIL {
        return "<nil>".to_string();
    }
    rust_string(msg_send!(Id; obj, sel(c"description")))
}
