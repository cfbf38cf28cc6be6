//! Loading plugin libraries into the process.
//!
//! Every load goes through the [`PluginSecurityVerifier`] first; the library
//! is only opened once the verifier accepts it. A loaded plugin is kept as a
//! handle owning the plugin instance and an `Arc<PluginLibrary>`. That `Arc`
//! is the ownership token: every backend the plugin produces travels with a
//! clone of it, so the library stays mapped while any of those backends is
//! alive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use strata_accel_core::{
    AccelError, AccelResult, BackendType, DynLib, GeoBackend, GraphBackend, VectorBackend,
    CORE_VERSION,
};

use crate::abi::{
    core_versions_compatible, BackendPlugin, PluginDeclaration, DECLARATION_SYMBOL,
    PLUGIN_ABI_VERSION,
};
use crate::backed::PluginBacked;
use crate::audit::{PluginSecurityEvent, SecurityEventKind, Severity};
use crate::policy::PluginTrustLevel;
use crate::verifier::{PluginSecurityVerifier, VerificationOutcome};

/// File name prefix of plugin libraries.
pub const PLUGIN_PREFIX: &str = "strata_accel_";

/// True when `path` names a plugin library for this platform:
/// `strata_accel_*` or `libstrata_accel_*` with the native extension.
pub fn is_plugin_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let prefixed = name.starts_with(PLUGIN_PREFIX)
        || name
            .strip_prefix("lib")
            .is_some_and(|rest| rest.starts_with(PLUGIN_PREFIX));
    prefixed
        && path
            .extension()
            .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
}

/// Ownership token of a loaded plugin.
///
/// Holds the dynamic library (absent for statically linked plugins). The
/// library is closed when the last clone is dropped.
pub struct PluginLibrary {
    plugin_name: String,
    path: Option<PathBuf>,
    lib: Option<DynLib>,
}

impl PluginLibrary {
    /// Name of the plugin this library belongs to
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Path the library was loaded from, `None` for static plugins
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True when backed by a dynamically loaded library
    pub fn is_dynamic(&self) -> bool {
        self.lib.is_some()
    }
}

impl std::fmt::Debug for PluginLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLibrary")
            .field("plugin_name", &self.plugin_name)
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for PluginLibrary {
    fn drop(&mut self) {
        if let Some(lib) = self.lib.take() {
            tracing::debug!(
                target: "strata::accel::plugin",
                plugin = %self.plugin_name,
                library = lib.name(),
                "Closing plugin library"
            );
        }
    }
}

/// Read-only description of a loaded plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    /// Declared plugin name
    pub name: String,
    /// Declared plugin version
    pub version: String,
    /// Technology of the plugin's backends
    pub backend_type: BackendType,
    /// Library path, `None` for static plugins
    pub path: Option<PathBuf>,
    /// Hex SHA-256 of the library file
    pub hash: Option<String>,
    /// Trust level granted at verification
    pub trust_level: Option<PluginTrustLevel>,
}

/// Backends produced by one plugin, with the token that keeps its code mapped.
pub struct PluginBackends {
    /// Vector backend, if the plugin provides one
    pub vector: Option<Arc<dyn VectorBackend>>,
    /// Graph backend, if the plugin provides one
    pub graph: Option<Arc<dyn GraphBackend>>,
    /// Geo backend, if the plugin provides one
    pub geo: Option<Arc<dyn GeoBackend>>,
    /// Ownership token
    pub library: Arc<PluginLibrary>,
}

impl PluginBackends {
    /// Number of backends produced
    pub fn count(&self) -> usize {
        usize::from(self.vector.is_some())
            + usize::from(self.graph.is_some())
            + usize::from(self.geo.is_some())
    }
}

struct PluginHandle {
    // Field order is drop order: the instance goes before its library.
    plugin: Box<dyn BackendPlugin>,
    library: Arc<PluginLibrary>,
    info: PluginInfo,
}

impl PluginHandle {
    fn live_backends(&self) -> usize {
        Arc::strong_count(&self.library) - 1
    }
}

/// Loads, tracks and unloads backend plugins.
pub struct PluginLoader {
    verifier: Arc<PluginSecurityVerifier>,
    plugins: Mutex<BTreeMap<String, PluginHandle>>,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new(Arc::new(PluginSecurityVerifier::default()))
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("plugins", &self.plugins.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginLoader {
    /// Loader gated by `verifier`.
    pub fn new(verifier: Arc<PluginSecurityVerifier>) -> Self {
        Self {
            verifier,
            plugins: Mutex::new(BTreeMap::new()),
        }
    }

    /// The verifier every load goes through
    pub fn verifier(&self) -> &Arc<PluginSecurityVerifier> {
        &self.verifier
    }

    /// Verify, open and instantiate the plugin at `path`; returns its name.
    ///
    /// On any failure the library is closed again and nothing is retained.
    /// The path is resolved to an absolute one first, so the file that is
    /// hashed is the file handed to the dynamic loader. A bare file name
    /// never reaches the system library search.
    pub fn load_plugin(&self, path: &Path) -> AccelResult<String> {
        let resolved = std::fs::canonicalize(path).ok();
        let path = resolved.as_deref().unwrap_or(path);
        let outcome = self.verifier.verify_plugin(path);
        if !outcome.accepted {
            tracing::warn!(
                target: "strata::accel::plugin",
                path = %path.display(),
                reason = %outcome.reason,
                "Plugin rejected by security verifier"
            );
            return Err(AccelError::PolicyRejected(format!(
                "{}: {}",
                path.display(),
                outcome.reason
            )));
        }

        let opened = match resolved.as_deref() {
            Some(resolved) => self.open_verified(resolved, &outcome),
            None => Err(AccelError::plugin(format!(
                "{}: plugin path cannot be resolved",
                path.display()
            ))),
        };
        match opened {
            Ok(name) => Ok(name),
            Err(e) => {
                self.audit(
                    SecurityEventKind::PluginLoadFailed,
                    Severity::Error,
                    path,
                    &outcome.hash,
                    e.to_string(),
                );
                tracing::warn!(
                    target: "strata::accel::plugin",
                    path = %path.display(),
                    error = %e,
                    "Failed to load plugin"
                );
                Err(e)
            }
        }
    }

    fn open_verified(&self, path: &Path, outcome: &VerificationOutcome) -> AccelResult<String> {
        let lib = DynLib::open_path(path).map_err(AccelError::plugin)?;

        // SAFETY: the symbol is only read as a `PluginDeclaration` after the
        // leading `abi_version` field, whose offset is fixed by `repr(C)`,
        // matches this build.
        let register = unsafe {
            let decl = lib
                .sym(DECLARATION_SYMBOL)
                .map_err(|e| AccelError::plugin(format!("{}: not a plugin: {}", path.display(), e)))?
                as *const PluginDeclaration;
            let abi_version = std::ptr::addr_of!((*decl).abi_version).read();
            if abi_version != PLUGIN_ABI_VERSION {
                return Err(AccelError::plugin(format!(
                    "{}: plugin ABI version {} does not match host ABI version {}",
                    path.display(),
                    abi_version,
                    PLUGIN_ABI_VERSION
                )));
            }
            let decl = &*decl;
            if !core_versions_compatible(CORE_VERSION, decl.core_version) {
                return Err(AccelError::plugin(format!(
                    "{}: built against core {}, host core is {}",
                    path.display(),
                    decl.core_version,
                    CORE_VERSION
                )));
            }
            decl.register
        };

        let plugin = std::panic::catch_unwind(register)
            .map_err(|_| AccelError::plugin(format!("{}: plugin constructor panicked", path.display())))?;

        let name = self.insert(
            plugin,
            Some(lib),
            Some(path.to_path_buf()),
            Some(outcome.hash.clone()),
            Some(outcome.trust_level),
        )?;
        tracing::info!(
            target: "strata::accel::plugin",
            plugin = %name,
            path = %path.display(),
            trust = %outcome.trust_level,
            "Loaded plugin"
        );
        Ok(name)
    }

    /// Register a plugin linked into the host binary. No verification runs
    /// since the code is already part of the process.
    pub fn adopt_plugin(&self, plugin: Box<dyn BackendPlugin>) -> AccelResult<String> {
        let name = self.insert(plugin, None, None, None, None)?;
        tracing::info!(target: "strata::accel::plugin", plugin = %name, "Adopted static plugin");
        Ok(name)
    }

    fn insert(
        &self,
        plugin: Box<dyn BackendPlugin>,
        lib: Option<DynLib>,
        path: Option<PathBuf>,
        hash: Option<String>,
        trust_level: Option<PluginTrustLevel>,
    ) -> AccelResult<String> {
        let name = plugin.plugin_name().to_string();
        let info = PluginInfo {
            name: name.clone(),
            version: plugin.plugin_version().to_string(),
            backend_type: plugin.backend_type(),
            path: path.clone(),
            hash,
            trust_level,
        };
        let handle = PluginHandle {
            plugin,
            library: Arc::new(PluginLibrary {
                plugin_name: name.clone(),
                path,
                lib,
            }),
            info,
        };

        if name.is_empty() {
            return Err(AccelError::plugin("plugin declares an empty name"));
        }
        let mut plugins = self.plugins.lock();
        if plugins.contains_key(&name) {
            return Err(AccelError::plugin(format!("plugin '{}' is already loaded", name)));
        }
        plugins.insert(name.clone(), handle);
        Ok(name)
    }

    /// Verify and load every plugin file in `dir`; returns the names loaded.
    ///
    /// Files are tried in name order. A failing file is logged and skipped.
    pub fn load_directory(&self, dir: &Path) -> Vec<String> {
        if !dir.is_dir() {
            tracing::debug!(target: "strata::accel::plugin", dir = %dir.display(), "Plugin directory absent");
            return Vec::new();
        }
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    target: "strata::accel::plugin",
                    dir = %dir.display(),
                    error = %e,
                    "Cannot read plugin directory"
                );
                return Vec::new();
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_plugin_file(path))
            .collect();
        candidates.sort();

        let loaded: Vec<String> = candidates
            .iter()
            .filter_map(|path| self.load_plugin(path).ok())
            .collect();
        tracing::info!(
            target: "strata::accel::plugin",
            dir = %dir.display(),
            candidates = candidates.len(),
            loaded = loaded.len(),
            "Scanned plugin directory"
        );
        loaded
    }

    /// Verify and load every plugin file in `dir`; returns how many loaded.
    pub fn load_plugins_from_directory(&self, dir: &Path) -> usize {
        self.load_directory(dir).len()
    }

    /// Instantiate the backends of plugin `name`.
    ///
    /// Each backend is wrapped in a [`PluginBacked`], so every clone of it
    /// keeps the plugin library mapped.
    pub fn instantiate(&self, name: &str) -> AccelResult<PluginBackends> {
        let plugins = self.plugins.lock();
        let handle = plugins
            .get(name)
            .ok_or_else(|| AccelError::plugin(format!("plugin '{}' is not loaded", name)))?;
        let library = &handle.library;
        Ok(PluginBackends {
            vector: handle.plugin.create_vector_backend().map(|backend| {
                Arc::new(PluginBacked::new(backend, Arc::clone(library))) as Arc<dyn VectorBackend>
            }),
            graph: handle.plugin.create_graph_backend().map(|backend| {
                Arc::new(PluginBacked::new(backend, Arc::clone(library))) as Arc<dyn GraphBackend>
            }),
            geo: handle.plugin.create_geo_backend().map(|backend| {
                Arc::new(PluginBacked::new(backend, Arc::clone(library))) as Arc<dyn GeoBackend>
            }),
            library: Arc::clone(library),
        })
    }

    /// Unload plugin `name`.
    ///
    /// Refused while any backend produced by the plugin is still alive.
    pub fn unload_plugin(&self, name: &str) -> AccelResult<()> {
        let handle = {
            let mut plugins = self.plugins.lock();
            let handle = plugins
                .get(name)
                .ok_or_else(|| AccelError::plugin(format!("plugin '{}' is not loaded", name)))?;
            let live = handle.live_backends();
            if live > 0 {
                return Err(AccelError::plugin(format!(
                    "plugin '{}' still has {} live backend(s)",
                    name, live
                )));
            }
            plugins.remove(name)
        };
        if let Some(handle) = handle {
            self.release(handle);
        }
        Ok(())
    }

    /// Unload every plugin; returns how many were unloaded. Idempotent.
    ///
    /// A library whose backends are still alive stays mapped until the last
    /// of them is dropped.
    pub fn unload_all_plugins(&self) -> usize {
        let handles = std::mem::take(&mut *self.plugins.lock());
        let count = handles.len();
        for handle in handles.into_values() {
            let live = handle.live_backends();
            if live > 0 {
                tracing::warn!(
                    target: "strata::accel::plugin",
                    plugin = %handle.info.name,
                    live,
                    "Plugin unloaded with live backends; library stays mapped until they drop"
                );
            }
            self.release(handle);
        }
        count
    }

    fn release(&self, handle: PluginHandle) {
        let info = handle.info.clone();
        drop(handle);
        if let Some(path) = &info.path {
            self.audit(
                SecurityEventKind::PluginUnloaded,
                Severity::Info,
                path,
                info.hash.as_deref().unwrap_or(""),
                format!("Plugin '{}' unloaded", info.name),
            );
        }
        tracing::info!(target: "strata::accel::plugin", plugin = %info.name, "Unloaded plugin");
    }

    /// Snapshot of every loaded plugin, ordered by name.
    pub fn loaded_plugins(&self) -> Vec<PluginInfo> {
        self.plugins.lock().values().map(|h| h.info.clone()).collect()
    }

    /// Description of plugin `name`.
    pub fn get_plugin(&self, name: &str) -> Option<PluginInfo> {
        self.plugins.lock().get(name).map(|h| h.info.clone())
    }

    /// Whether plugin `name` is loaded
    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins.lock().contains_key(name)
    }

    fn audit(&self, kind: SecurityEventKind, severity: Severity, path: &Path, hash: &str, message: String) {
        self.verifier.auditor().log_event(PluginSecurityEvent::new(
            kind,
            path.display().to_string(),
            hash,
            message,
            severity,
        ));
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        self.unload_all_plugins();
    }
}
