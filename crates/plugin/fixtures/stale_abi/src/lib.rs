//! Plugin declaration one ABI version ahead of the host.
//!
//! The host must reject it after reading `abi_version` and never call
//! `register`.

use strata_accel_plugin::{BackendPlugin, PluginDeclaration, CORE_VERSION, PLUGIN_ABI_VERSION};

fn register() -> Box<dyn BackendPlugin> {
    panic!("constructor of a plugin with a foreign ABI was called");
}

#[allow(non_upper_case_globals)]
#[no_mangle]
pub static strata_accel_plugin_declaration: PluginDeclaration = PluginDeclaration {
    abi_version: PLUGIN_ABI_VERSION + 1,
    core_version: CORE_VERSION,
    register,
};
