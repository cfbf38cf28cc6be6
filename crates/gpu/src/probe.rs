//! Runtime probe results shared by every GPU technology.

use serde::Serialize;
use strata_accel_core::BackendType;

/// What a live probe found for one technology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    /// Technology probed
    pub backend_type: BackendType,
    /// Library the runtime was loaded from, if any
    pub runtime: Option<String>,
    /// Devices the runtime reported
    pub devices: Vec<String>,
    /// True when this build carries a compute pipeline for the technology
    pub compute_pipeline: bool,
    /// Why the backend is or is not usable
    pub detail: String,
}

impl ProbeReport {
    /// Runtime library not found or not initialisable.
    pub fn absent(backend_type: BackendType, detail: impl Into<String>) -> Self {
        Self {
            backend_type,
            runtime: None,
            devices: Vec::new(),
            compute_pipeline: false,
            detail: detail.into(),
        }
    }

    /// Runtime found with the given devices.
    pub fn found(backend_type: BackendType, runtime: impl Into<String>, devices: Vec<String>) -> Self {
        let detail = if devices.is_empty() {
            "runtime present, no devices".to_string()
        } else {
            format!("{} device(s)", devices.len())
        };
        Self {
            backend_type,
            runtime: Some(runtime.into()),
            devices,
            compute_pipeline: false,
            detail,
        }
    }

    /// Mark that this build can run kernels on the technology.
    pub fn with_pipeline(mut self) -> Self {
        self.compute_pipeline = true;
        self
    }

    /// Replace the detail text.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// True when a backend built on this probe could register.
    pub fn is_usable(&self) -> bool {
        self.compute_pipeline && self.runtime.is_some() && !self.devices.is_empty()
    }
}

/// Device details collected during a probe or from a live session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Marketing name reported by the driver
    pub name: String,
    /// Total device memory in bytes
    pub total_memory: u64,
    /// Multiprocessors / compute units, 0 if unknown
    pub compute_units: u32,
}
