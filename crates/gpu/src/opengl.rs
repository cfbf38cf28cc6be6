//! OpenGL runtime probe.
//!
//! Device strings need a current GL context, which a headless library cannot
//! create portably, so the probe stops at locating the library.

use std::ffi::CStr;

use strata_accel_core::{BackendType, DynLib};

use crate::probe::ProbeReport;

const LIBRARIES: &[&CStr] = &[
    c"libGL.so.1",
    c"libGL.so",
    c"libOpenGL.so.0",
    c"opengl32.dll",
    c"/System/Library/Frameworks/OpenGL.framework/OpenGL",
];

/// Probe the OpenGL library.
pub fn probe() -> ProbeReport {
    match DynLib::open_first(LIBRARIES) {
        Ok(lib) if lib.has_symbol(c"glGetString") => {
            ProbeReport::found(BackendType::OpenGl, lib.name(), Vec::new())
                .with_detail("library present; devices need a GL context; no compute pipeline in this build")
        }
        Ok(lib) => ProbeReport::absent(
            BackendType::OpenGl,
            format!("{} does not export glGetString", lib.name()),
        ),
        Err(e) => ProbeReport::absent(BackendType::OpenGl, e),
    }
}
