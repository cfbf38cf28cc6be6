//! Runtime kernel compilers (NVRTC, hipRTC).
//!
//! Both share one C API shape: create a program from source, compile with
//! options, then read back either the image or the build log.

use std::ffi::{c_char, c_void, CStr, CString};

use strata_accel_core::DynLib;

type Program = *mut c_void;
type FnCreateProgram = unsafe extern "C" fn(
    prog: *mut Program,
    src: *const c_char,
    name: *const c_char,
    num_headers: i32,
    headers: *const *const c_char,
    include_names: *const *const c_char,
) -> i32;
type FnCompileProgram =
    unsafe extern "C" fn(prog: Program, num_options: i32, options: *const *const c_char) -> i32;
type FnGetSize = unsafe extern "C" fn(prog: Program, size: *mut usize) -> i32;
type FnGetBytes = unsafe extern "C" fn(prog: Program, out: *mut c_char) -> i32;
type FnDestroyProgram = unsafe extern "C" fn(prog: *mut Program) -> i32;

/// Library candidates and entry points of one runtime compiler.
#[derive(Debug)]
pub struct CompilerSymbols {
    /// Label used in errors
    pub label: &'static str,
    /// Libraries tried in order
    pub libraries: &'static [&'static CStr],
    /// Program creation
    pub create_program: &'static CStr,
    /// Compilation
    pub compile_program: &'static CStr,
    /// Image size
    pub get_code_size: &'static CStr,
    /// Image bytes
    pub get_code: &'static CStr,
    /// Log size
    pub get_log_size: &'static CStr,
    /// Log bytes
    pub get_log: &'static CStr,
    /// Program destruction
    pub destroy_program: &'static CStr,
}

/// NVRTC, producing PTX.
pub static NVRTC: CompilerSymbols = CompilerSymbols {
    label: "NVRTC",
    libraries: &[
        c"libnvrtc.so",
        c"libnvrtc.so.12",
        c"libnvrtc.so.11.2",
        c"nvrtc64_120_0.dll",
        c"nvrtc64_112_0.dll",
    ],
    create_program: c"nvrtcCreateProgram",
    compile_program: c"nvrtcCompileProgram",
    get_code_size: c"nvrtcGetPTXSize",
    get_code: c"nvrtcGetPTX",
    get_log_size: c"nvrtcGetProgramLogSize",
    get_log: c"nvrtcGetProgramLog",
    destroy_program: c"nvrtcDestroyProgram",
};

/// hipRTC, producing an AMD code object.
pub static HIPRTC: CompilerSymbols = CompilerSymbols {
    label: "hipRTC",
    libraries: &[
        c"libhiprtc.so",
        c"libhiprtc.so.6",
        c"libhiprtc.so.5",
        c"hiprtc0507.dll",
    ],
    create_program: c"hiprtcCreateProgram",
    compile_program: c"hiprtcCompileProgram",
    get_code_size: c"hiprtcGetCodeSize",
    get_code: c"hiprtcGetCode",
    get_log_size: c"hiprtcGetProgramLogSize",
    get_log: c"hiprtcGetProgramLog",
    destroy_program: c"hiprtcDestroyProgram",
};

/// Compile `source` and return the loadable image, NUL-terminated so it can
/// be handed straight to `cuModuleLoadData` when it is PTX text.
///
/// The compiler library is opened for the duration of the call only.
pub fn compile(
    compiler: &CompilerSymbols,
    source: &str,
    program_name: &str,
    options: &[&str],
) -> Result<Vec<u8>, String> {
    let lib = DynLib::open_first(compiler.libraries)
        .map_err(|e| format!("{} not available: {}", compiler.label, e))?;

    let create: FnCreateProgram = load_sym!(lib, compiler.create_program);
    let compile_fn: FnCompileProgram = load_sym!(lib, compiler.compile_program);
    let code_size: FnGetSize = load_sym!(lib, compiler.get_code_size);
    let code: FnGetBytes = load_sym!(lib, compiler.get_code);
    let log_size: FnGetSize = load_sym!(lib, compiler.get_log_size);
    let log: FnGetBytes = load_sym!(lib, compiler.get_log);
    let destroy: FnDestroyProgram = load_sym!(lib, compiler.destroy_program);

    let c_source = CString::new(source).map_err(|_| "kernel source contains NUL".to_string())?;
    let c_name = CString::new(program_name).map_err(|_| "program name contains NUL".to_string())?;
    let c_options = options
        .iter()
        .map(|o| CString::new(*o))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| "compiler option contains NUL".to_string())?;
    let option_ptrs: Vec<*const c_char> = c_options.iter().map(|o| o.as_ptr()).collect();

    let mut prog: Program = std::ptr::null_mut();
    let rc = unsafe {
        create(
            &mut prog,
            c_source.as_ptr(),
            c_name.as_ptr(),
            0,
            std::ptr::null(),
            std::ptr::null(),
        )
    };
    if rc != 0 {
        return Err(format!("{}: create program failed ({})", compiler.label, rc));
    }

    let result = (|| {
        let rc = unsafe { compile_fn(prog, option_ptrs.len() as i32, option_ptrs.as_ptr()) };
        if rc != 0 {
            let text = read_bytes(prog, log_size, log).unwrap_or_default();
            return Err(format!(
                "{}: compilation failed ({}): {}",
                compiler.label,
                rc,
                String::from_utf8_lossy(&text).trim_end_matches('\0').trim()
            ));
        }
        let mut image = read_bytes(prog, code_size, code)
            .map_err(|rc| format!("{}: reading image failed ({})", compiler.label, rc))?;
        if image.last() != Some(&0) {
            image.push(0);
        }
        Ok(image)
    })();

    unsafe { destroy(&mut prog) };
    result
}

fn read_bytes(prog: Program, size_fn: FnGetSize, bytes_fn: FnGetBytes) -> Result<Vec<u8>, i32> {
    let mut size = 0usize;
    let rc = unsafe { size_fn(prog, &mut size) };
    if rc != 0 {
        return Err(rc);
    }
    let mut buf = vec![0u8; size];
    if size > 0 {
        let rc = unsafe { bytes_fn(prog, buf.as_mut_ptr() as *mut c_char) };
        if rc != 0 {
            return Err(rc);
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_tables_are_consistent() {
        for table in [&NVRTC, &HIPRTC] {
            assert!(!table.libraries.is_empty());
            let prefix = if table.label == "NVRTC" { "nvrtc" } else { "hiprtc" };
            for sym in [table.create_program, table.compile_program, table.destroy_program] {
                assert!(sym.to_string_lossy().starts_with(prefix));
            }
        }
    }
}
