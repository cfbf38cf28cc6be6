//! Binary contract between the host and a backend plugin library.
//!
//! A plugin is a `cdylib` that exports one static, [`DECLARATION_SYMBOL`],
//! holding a [`PluginDeclaration`]. The host reads `abi_version` first (it is
//! the leading `u32` of a `#[repr(C)]` struct, so its offset is stable across
//! builds) and only touches the remaining fields when it matches
//! [`PLUGIN_ABI_VERSION`]. The `register` function is never called on a
//! mismatch.
//!
//! Plugins are written in Rust against this crate and must be built with the
//! same compiler as the host, since trait objects cross the boundary.
//!
//! ```ignore
//! use strata_accel_plugin::{export_backend_plugin, BackendPlugin};
//!
//! struct MyPlugin;
//! impl BackendPlugin for MyPlugin { /* ... */ }
//!
//! export_backend_plugin!(MyPlugin);
//! ```

use std::ffi::CStr;
use std::sync::Arc;

use strata_accel_core::{BackendType, GeoBackend, GraphBackend, VectorBackend};

/// Layout version of [`PluginDeclaration`] and the [`BackendPlugin`] vtable.
///
/// Bump on any change to either.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Name of the exported declaration static.
pub const DECLARATION_SYMBOL: &CStr = c"strata_accel_plugin_declaration";

/// Factory object provided by a plugin library.
///
/// Each `create_*` method returns `None` when the plugin does not offer that
/// capability. Returned backends are uninitialized; the registry initializes
/// and probes them before registration.
pub trait BackendPlugin: Send + Sync {
    /// Unique plugin name, used as the loader key
    fn plugin_name(&self) -> &str;

    /// Plugin's own version string
    fn plugin_version(&self) -> &str;

    /// Technology the plugin's backends run on
    fn backend_type(&self) -> BackendType;

    /// Vector backend, if provided
    fn create_vector_backend(&self) -> Option<Arc<dyn VectorBackend>> {
        None
    }

    /// Graph backend, if provided
    fn create_graph_backend(&self) -> Option<Arc<dyn GraphBackend>> {
        None
    }

    /// Geo backend, if provided
    fn create_geo_backend(&self) -> Option<Arc<dyn GeoBackend>> {
        None
    }
}

/// Exported by every plugin library under [`DECLARATION_SYMBOL`].
#[repr(C)]
pub struct PluginDeclaration {
    /// Must equal the host's [`PLUGIN_ABI_VERSION`]
    pub abi_version: u32,
    /// `strata-accel-core` version the plugin was built against
    pub core_version: &'static str,
    /// Constructor of the plugin instance
    pub register: fn() -> Box<dyn BackendPlugin>,
}

/// True when a plugin built against `plugin_core` can run inside a host
/// built against `host_core`: same major version, and for `0.x` releases
/// also the same minor version.
pub fn core_versions_compatible(host_core: &str, plugin_core: &str) -> bool {
    fn leading(version: &str) -> (Option<&str>, Option<&str>) {
        let mut parts = version.split('.');
        (parts.next(), parts.next())
    }
    let (host_major, host_minor) = leading(host_core);
    let (plugin_major, plugin_minor) = leading(plugin_core);
    if host_major.is_none() || host_major != plugin_major {
        return false;
    }
    host_major != Some("0") || host_minor == plugin_minor
}

/// Export `$plugin` (an expression constructing a [`BackendPlugin`]) as
/// this library's plugin declaration.
#[macro_export]
macro_rules! export_backend_plugin {
    ($plugin:expr) => {
        #[allow(non_upper_case_globals)]
        #[no_mangle]
        pub static strata_accel_plugin_declaration: $crate::PluginDeclaration =
            $crate::PluginDeclaration {
                abi_version: $crate::PLUGIN_ABI_VERSION,
                core_version: $crate::CORE_VERSION,
                register: {
                    fn __strata_accel_register() -> ::std::boxed::Box<dyn $crate::BackendPlugin> {
                        ::std::boxed::Box::new($plugin)
                    }
                    __strata_accel_register
                },
            };
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_version_compatibility() {
        assert!(core_versions_compatible("0.1.0", "0.1.7"));
        assert!(!core_versions_compatible("0.1.0", "0.2.0"));
        assert!(core_versions_compatible("1.2.0", "1.5.3"));
        assert!(!core_versions_compatible("1.2.0", "2.0.0"));
        assert!(!core_versions_compatible("", "0.1.0"));
    }

    #[test]
    fn test_declaration_symbol_matches_macro_static() {
        assert_eq!(
            DECLARATION_SYMBOL.to_str().ok(),
            Some("strata_accel_plugin_declaration")
        );
    }
}
