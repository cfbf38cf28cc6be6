//! Cross-platform dynamic library primitive
//!
//! `DynLib` wraps the three platform operations the layer needs: load a
//! shared library, resolve a symbol, unload on drop. GPU backends use it to
//! reach vendor drivers (`libcuda.so.1`, `libamdhip64.so`, `OpenCL.dll`, ..)
//! and the plugin loader uses it for backend plugins.

use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;

/// Handle to a dynamically loaded shared library. Unloaded on drop.
pub struct DynLib {
    handle: *mut c_void,
    name: String,
}

// SAFETY: the handle is a process-global resource. Thread safety of the
// resolved symbols is the responsibility of the code calling them.
unsafe impl Send for DynLib {}
unsafe impl Sync for DynLib {}

impl std::fmt::Debug for DynLib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynLib").field("name", &self.name).finish()
    }
}

impl DynLib {
    /// Open a shared library by name or path.
    ///
    /// On Unix, wraps `dlopen` with `RTLD_NOW | RTLD_LOCAL`.
    /// On Windows, wraps `LoadLibraryA`.
    pub fn open(name: &CStr) -> Result<Self, String> {
        let shown = name.to_string_lossy().into_owned();

        #[cfg(unix)]
        {
            // SAFETY: name is a valid C string. RTLD_NOW resolves all symbols
            // immediately; RTLD_LOCAL keeps them in this handle.
            let handle = unsafe { dlopen(name.as_ptr(), RTLD_NOW | RTLD_LOCAL) };
            if handle.is_null() {
                return Err(format!("{}: {}", shown, last_dl_error()));
            }
            tracing::trace!(target: "strata::accel::dl", library = %shown, "Opened library");
            Ok(Self {
                handle,
                name: shown,
            })
        }

        #[cfg(windows)]
        {
            let handle = unsafe { LoadLibraryA(name.as_ptr()) };
            if handle.is_null() {
                return Err(format!("LoadLibraryA failed for {}", shown));
            }
            tracing::trace!(target: "strata::accel::dl", library = %shown, "Opened library");
            Ok(Self {
                handle,
                name: shown,
            })
        }

        #[cfg(not(any(unix, windows)))]
        {
            Err(format!(
                "{}: dynamic library loading not supported on this platform",
                shown
            ))
        }
    }

    /// Open a shared library from a filesystem path.
    pub fn open_path(path: &Path) -> Result<Self, String> {
        let raw = path
            .to_str()
            .ok_or_else(|| format!("{}: path is not valid UTF-8", path.display()))?;
        let c_path = CString::new(raw)
            .map_err(|_| format!("{}: path contains a NUL byte", path.display()))?;
        Self::open(&c_path)
    }

    /// Open the first library in `candidates` that loads.
    ///
    /// Returns the error of the last attempt when none load.
    pub fn open_first(candidates: &[&CStr]) -> Result<Self, String> {
        let mut last_err = "no candidate library names".to_string();
        for name in candidates {
            match Self::open(name) {
                Ok(lib) => return Ok(lib),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Name or path the library was opened with
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a symbol by name, returning a raw pointer.
    ///
    /// # Safety
    ///
    /// The caller must cast the returned pointer to the symbol's true type
    /// before use and must not use it after this `DynLib` is dropped.
    pub unsafe fn sym(&self, name: &CStr) -> Result<*mut c_void, String> {
        #[cfg(unix)]
        {
            // Clear any previous error.
            dlerror();
            let ptr = dlsym(self.handle, name.as_ptr());
            let err = dlerror();
            if !err.is_null() {
                let msg = CStr::from_ptr(err).to_string_lossy().into_owned();
                return Err(msg);
            }
            if ptr.is_null() {
                return Err(format!("symbol {:?} resolved to null", name));
            }
            Ok(ptr)
        }

        #[cfg(windows)]
        {
            let ptr = GetProcAddress(self.handle, name.as_ptr());
            if ptr.is_null() {
                return Err(format!("GetProcAddress failed for {:?}", name));
            }
            Ok(ptr)
        }

        #[cfg(not(any(unix, windows)))]
        {
            Err(format!("symbol {:?}: unsupported platform", name))
        }
    }

    /// True if the library exports `name`.
    pub fn has_symbol(&self, name: &CStr) -> bool {
        // SAFETY: the pointer is only tested for presence, never called.
        unsafe { self.sym(name).is_ok() }
    }
}

impl Drop for DynLib {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        tracing::trace!(target: "strata::accel::dl", library = %self.name, "Closing library");

        #[cfg(unix)]
        unsafe {
            dlclose(self.handle);
        }

        #[cfg(windows)]
        unsafe {
            FreeLibrary(self.handle);
        }
    }
}

#[cfg(unix)]
fn last_dl_error() -> String {
    // SAFETY: dlerror returns a thread-local, NUL-terminated string or null.
    let err = unsafe { dlerror() };
    if err.is_null() {
        "unknown dlopen error".to_string()
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

// --- Unix (Linux + macOS) bindings ---

#[cfg(unix)]
const RTLD_NOW: i32 = 2;
#[cfg(all(unix, not(target_os = "macos")))]
const RTLD_LOCAL: i32 = 0;
#[cfg(target_os = "macos")]
const RTLD_LOCAL: i32 = 4;

#[cfg(unix)]
extern "C" {
    fn dlopen(filename: *const c_char, flags: i32) -> *mut c_void;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
    fn dlclose(handle: *mut c_void) -> i32;
    fn dlerror() -> *const c_char;
}

// --- Windows bindings ---

#[cfg(windows)]
extern "system" {
    fn LoadLibraryA(name: *const c_char) -> *mut c_void;
    fn GetProcAddress(module: *mut c_void, name: *const c_char) -> *mut c_void;
    fn FreeLibrary(module: *mut c_void) -> i32;
}
