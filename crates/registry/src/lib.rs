//! Backend registry for the Strata acceleration layer
//!
//! - [`registry`]: registration, priority selection, plugin lifecycle, discovery
//! - [`config`]: `strata-accel.toml` loading and validation
//! - [`report`]: capability report for admin tooling
//!
//! Typical startup:
//!
//! ```no_run
//! use strata_accel_registry::{AccelConfig, BackendRegistry};
//!
//! let config = AccelConfig::from_file("strata-accel.toml".as_ref()).unwrap_or_default();
//! let registry = BackendRegistry::new(config);
//! registry.auto_detect();
//! let backend = registry.get_best_vector_backend();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod registry;
pub mod report;

pub use config::{AccelConfig, GpuConfig, PluginConfig, CONFIG_FILE_NAME};
pub use registry::{BackendHandle, BackendRegistry, DetectionSummary};
pub use report::{
    Capability, CapabilityReport, RegisteredBackend, RejectedPlugin, RejectionKind,
    UnavailableBackend,
};
