//! The backend registry.
//!
//! Owns every backend instance, built-in and plugin-provided, and answers
//! "which backend should run operation X". Selection walks
//! [`BackendType::PRIORITY`] (fastest technology first, CPU last) and returns
//! the first registered backend of that type whose capability flag is set.
//! The order is the same for vector, graph and geo selection. The built-in
//! CPU backends are registered at construction, so selection never comes up
//! empty until [`BackendRegistry::shutdown_all`].
//!
//! Registration is gated: a backend is admitted only after `is_available()`
//! returned true and `initialize()` succeeded. Discarding an unavailable
//! backend is not an error. The registry never retries a failed operation
//! on another backend; callers decide whether to fall back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use strata_accel_core::{
    AccelResult, BackendCapabilities, BackendType, ComputeBackend, GeoBackend, GraphBackend,
    VectorBackend,
};
use strata_accel_cpu::cpu_backends;
use strata_accel_plugin::{
    BackendPlugin, PluginBackends, PluginLoader, PluginSecurityAuditor, PluginSecurityVerifier,
};

use crate::config::AccelConfig;
use crate::report::{self, Capability, CapabilityReport, RegisteredBackend, UnavailableBackend};

/// Identity used to detect duplicate registrations.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BackendKey {
    backend_type: BackendType,
    name: String,
    device_name: String,
}

struct Registered<B: ?Sized> {
    backend: Arc<B>,
    key: BackendKey,
    plugin: Option<String>,
}

#[derive(Default)]
struct Backends {
    vector: Vec<Registered<dyn VectorBackend>>,
    graph: Vec<Registered<dyn GraphBackend>>,
    geo: Vec<Registered<dyn GeoBackend>>,
}

/// One capability's slot in the registry.
trait Slot: ComputeBackend {
    const CAPABILITY: Capability;
    fn list(backends: &Backends) -> &Vec<Registered<Self>>;
    fn list_mut(backends: &mut Backends) -> &mut Vec<Registered<Self>>;
    fn supports(caps: &BackendCapabilities) -> bool;
}

impl Slot for dyn VectorBackend {
    const CAPABILITY: Capability = Capability::Vector;

    fn list(backends: &Backends) -> &Vec<Registered<Self>> {
        &backends.vector
    }

    fn list_mut(backends: &mut Backends) -> &mut Vec<Registered<Self>> {
        &mut backends.vector
    }

    fn supports(caps: &BackendCapabilities) -> bool {
        caps.supports_vector_ops
    }
}

impl Slot for dyn GraphBackend {
    const CAPABILITY: Capability = Capability::Graph;

    fn list(backends: &Backends) -> &Vec<Registered<Self>> {
        &backends.graph
    }

    fn list_mut(backends: &mut Backends) -> &mut Vec<Registered<Self>> {
        &mut backends.graph
    }

    fn supports(caps: &BackendCapabilities) -> bool {
        caps.supports_graph_ops
    }
}

impl Slot for dyn GeoBackend {
    const CAPABILITY: Capability = Capability::Geo;

    fn list(backends: &Backends) -> &Vec<Registered<Self>> {
        &backends.geo
    }

    fn list_mut(backends: &mut Backends) -> &mut Vec<Registered<Self>> {
        &mut backends.geo
    }

    fn supports(caps: &BackendCapabilities) -> bool {
        caps.supports_geo_ops
    }
}

/// A registered backend of any capability, as returned by
/// [`BackendRegistry::get_backend`].
#[derive(Clone)]
pub enum BackendHandle {
    /// Vector backend
    Vector(Arc<dyn VectorBackend>),
    /// Graph backend
    Graph(Arc<dyn GraphBackend>),
    /// Geo backend
    Geo(Arc<dyn GeoBackend>),
}

impl BackendHandle {
    /// Capability the backend is registered for
    pub fn capability(&self) -> Capability {
        match self {
            BackendHandle::Vector(_) => Capability::Vector,
            BackendHandle::Graph(_) => Capability::Graph,
            BackendHandle::Geo(_) => Capability::Geo,
        }
    }

    /// Backend name
    pub fn name(&self) -> &str {
        match self {
            BackendHandle::Vector(b) => b.name(),
            BackendHandle::Graph(b) => b.name(),
            BackendHandle::Geo(b) => b.name(),
        }
    }

    /// Technology
    pub fn backend_type(&self) -> BackendType {
        match self {
            BackendHandle::Vector(b) => b.backend_type(),
            BackendHandle::Graph(b) => b.backend_type(),
            BackendHandle::Geo(b) => b.backend_type(),
        }
    }

    /// Fresh capability record
    pub fn capabilities(&self) -> BackendCapabilities {
        match self {
            BackendHandle::Vector(b) => b.capabilities(),
            BackendHandle::Graph(b) => b.capabilities(),
            BackendHandle::Geo(b) => b.capabilities(),
        }
    }

    /// The vector backend, if this is one
    pub fn as_vector(&self) -> Option<&Arc<dyn VectorBackend>> {
        match self {
            BackendHandle::Vector(b) => Some(b),
            _ => None,
        }
    }

    /// The graph backend, if this is one
    pub fn as_graph(&self) -> Option<&Arc<dyn GraphBackend>> {
        match self {
            BackendHandle::Graph(b) => Some(b),
            _ => None,
        }
    }

    /// The geo backend, if this is one
    pub fn as_geo(&self) -> Option<&Arc<dyn GeoBackend>> {
        match self {
            BackendHandle::Geo(b) => Some(b),
            _ => None,
        }
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("capability", &self.capability())
            .field("name", &self.name())
            .field("backend_type", &self.backend_type())
            .finish()
    }
}

/// What [`BackendRegistry::auto_detect`] found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionSummary {
    /// GPU backends registered
    pub gpu_backends: usize,
    /// Plugin libraries loaded
    pub plugins_loaded: usize,
    /// Backends registered from those plugins
    pub plugin_backends: usize,
    /// Registered backends of all kinds afterwards
    pub total_backends: usize,
}

static GLOBAL: Lazy<BackendRegistry> = Lazy::new(|| BackendRegistry::new(AccelConfig::default()));

/// Registry of compute backends.
pub struct BackendRegistry {
    config: AccelConfig,
    backends: RwLock<Backends>,
    loader: PluginLoader,
    unavailable: Mutex<Vec<UnavailableBackend>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backends = self.backends.read();
        f.debug_struct("BackendRegistry")
            .field("vector", &backends.vector.len())
            .field("graph", &backends.graph.len())
            .field("geo", &backends.geo.len())
            .field("loader", &self.loader)
            .finish()
    }
}

impl BackendRegistry {
    /// Registry recording plugin decisions into the global auditor.
    pub fn new(config: AccelConfig) -> Self {
        Self::with_auditor(config, PluginSecurityAuditor::global())
    }

    /// Registry recording plugin decisions into `auditor`.
    ///
    /// Registers the built-in CPU backends described by `config.cpu`.
    pub fn with_auditor(config: AccelConfig, auditor: Arc<PluginSecurityAuditor>) -> Self {
        let verifier = Arc::new(PluginSecurityVerifier::new(config.security.clone(), auditor));
        let registry = Self {
            config,
            backends: RwLock::new(Backends::default()),
            loader: PluginLoader::new(verifier),
            unavailable: Mutex::new(Vec::new()),
        };
        registry.register_builtin_cpu();
        registry
    }

    /// Process-wide registry with the default configuration.
    ///
    /// Prefer constructing a registry at the composition root and passing it
    /// down; this accessor exists for call sites that cannot.
    pub fn global() -> &'static BackendRegistry {
        &GLOBAL
    }

    fn register_builtin_cpu(&self) {
        let cpu = cpu_backends(&self.config.cpu);
        self.register_vector_backend(cpu.vector);
        self.register_graph_backend(cpu.graph);
        self.register_geo_backend(cpu.geo);
    }

    /// Configuration the registry was built with
    pub fn config(&self) -> &AccelConfig {
        &self.config
    }

    /// Plugin loader
    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    /// Plugin verifier, for runtime policy changes
    pub fn verifier(&self) -> &Arc<PluginSecurityVerifier> {
        self.loader.verifier()
    }

    /// Security audit trail
    pub fn auditor(&self) -> &Arc<PluginSecurityAuditor> {
        self.loader.verifier().auditor()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register `backend` if it is available and initializes.
    ///
    /// Returns false when it was discarded: unavailable, failed to
    /// initialize, or an equal backend (same type, name and device) is
    /// already registered.
    pub fn register_vector_backend(&self, backend: Arc<dyn VectorBackend>) -> bool {
        self.register(backend, None, false)
    }

    /// Graph counterpart of [`register_vector_backend`](Self::register_vector_backend).
    pub fn register_graph_backend(&self, backend: Arc<dyn GraphBackend>) -> bool {
        self.register(backend, None, false)
    }

    /// Geo counterpart of [`register_vector_backend`](Self::register_vector_backend).
    pub fn register_geo_backend(&self, backend: Arc<dyn GeoBackend>) -> bool {
        self.register(backend, None, false)
    }

    /// Register `backend`, shutting down and replacing an equal registered one.
    pub fn replace_vector_backend(&self, backend: Arc<dyn VectorBackend>) -> bool {
        self.register(backend, None, true)
    }

    /// Graph counterpart of [`replace_vector_backend`](Self::replace_vector_backend).
    pub fn replace_graph_backend(&self, backend: Arc<dyn GraphBackend>) -> bool {
        self.register(backend, None, true)
    }

    /// Geo counterpart of [`replace_vector_backend`](Self::replace_vector_backend).
    pub fn replace_geo_backend(&self, backend: Arc<dyn GeoBackend>) -> bool {
        self.register(backend, None, true)
    }

    fn register<B: ?Sized + Slot>(&self, backend: Arc<B>, plugin: Option<&str>, replace: bool) -> bool {
        let capability = B::CAPABILITY;
        if !backend.is_available() {
            self.note_unavailable(backend.backend_type(), backend.name(), "not available".to_string());
            tracing::debug!(
                target: "strata::accel::registry",
                backend = backend.name(),
                %capability,
                "Discarded unavailable backend"
            );
            return false;
        }

        let key = BackendKey {
            backend_type: backend.backend_type(),
            name: backend.name().to_string(),
            device_name: backend.capabilities().device_name,
        };
        if !replace && B::list(&self.backends.read()).iter().any(|e| e.key == key) {
            tracing::debug!(
                target: "strata::accel::registry",
                backend = %key.name,
                %capability,
                "Backend already registered"
            );
            return false;
        }

        if let Err(e) = backend.initialize() {
            tracing::warn!(
                target: "strata::accel::registry",
                backend = %key.name,
                %capability,
                error = %e,
                "Backend failed to initialize"
            );
            self.note_unavailable(key.backend_type, &key.name, e.to_string());
            return false;
        }

        let replaced = {
            let mut backends = self.backends.write();
            let list = B::list_mut(&mut backends);
            let mut replaced = Vec::new();
            if replace {
                let mut i = 0;
                while i < list.len() {
                    if list[i].key == key {
                        replaced.push(list.remove(i));
                    } else {
                        i += 1;
                    }
                }
            } else if list.iter().any(|e| e.key == key) {
                // Lost a race with an equal registration.
                return false;
            }
            list.push(Registered {
                backend: Arc::clone(&backend),
                key: key.clone(),
                plugin: plugin.map(str::to_string),
            });
            replaced
        };
        for old in replaced {
            if !Arc::ptr_eq(&old.backend, &backend) {
                old.backend.shutdown();
            }
        }
        self.unavailable
            .lock()
            .retain(|u| !(u.backend_type == key.backend_type && u.name == key.name));

        tracing::info!(
            target: "strata::accel::registry",
            backend = %key.name,
            backend_type = %key.backend_type,
            device = %key.device_name,
            %capability,
            plugin = plugin.unwrap_or("built-in"),
            "Registered backend"
        );
        true
    }

    fn note_unavailable(&self, backend_type: BackendType, name: &str, reason: String) {
        let mut unavailable = self.unavailable.lock();
        match unavailable
            .iter_mut()
            .find(|u| u.backend_type == backend_type && u.name == name)
        {
            Some(existing) => existing.reason = reason,
            None => unavailable.push(UnavailableBackend {
                backend_type,
                name: name.to_string(),
                reason,
            }),
        }
    }

    // ========================================================================
    // Selection
    // ========================================================================

    fn best<B: ?Sized + Slot>(&self) -> Option<Arc<B>> {
        let backends = self.backends.read();
        let list = B::list(&backends);
        BackendType::PRIORITY.iter().find_map(|ty| {
            list.iter()
                .filter(|e| e.key.backend_type == *ty)
                .find(|e| B::supports(&e.backend.capabilities()))
                .map(|e| Arc::clone(&e.backend))
        })
    }

    /// Highest-priority backend supporting vector operations.
    pub fn get_best_vector_backend(&self) -> Option<Arc<dyn VectorBackend>> {
        self.best::<dyn VectorBackend>()
    }

    /// Highest-priority backend supporting graph operations.
    pub fn get_best_graph_backend(&self) -> Option<Arc<dyn GraphBackend>> {
        self.best::<dyn GraphBackend>()
    }

    /// Highest-priority backend supporting geo operations.
    pub fn get_best_geo_backend(&self) -> Option<Arc<dyn GeoBackend>> {
        self.best::<dyn GeoBackend>()
    }

    /// First registered backend of exactly `backend_type`, looking at vector,
    /// then graph, then geo registrations.
    pub fn get_backend(&self, backend_type: BackendType) -> Option<BackendHandle> {
        let backends = self.backends.read();
        let find = |key: &BackendKey| key.backend_type == backend_type;
        if let Some(e) = backends.vector.iter().find(|e| find(&e.key)) {
            return Some(BackendHandle::Vector(Arc::clone(&e.backend)));
        }
        if let Some(e) = backends.graph.iter().find(|e| find(&e.key)) {
            return Some(BackendHandle::Graph(Arc::clone(&e.backend)));
        }
        backends
            .geo
            .iter()
            .find(|e| find(&e.key))
            .map(|e| BackendHandle::Geo(Arc::clone(&e.backend)))
    }

    /// Types with at least one registered backend, in priority order.
    pub fn available_backends(&self) -> Vec<BackendType> {
        let backends = self.backends.read();
        BackendType::PRIORITY
            .iter()
            .copied()
            .filter(|ty| {
                backends.vector.iter().any(|e| e.key.backend_type == *ty)
                    || backends.graph.iter().any(|e| e.key.backend_type == *ty)
                    || backends.geo.iter().any(|e| e.key.backend_type == *ty)
            })
            .collect()
    }

    /// Number of registered backends of all capabilities
    pub fn backend_count(&self) -> usize {
        let backends = self.backends.read();
        backends.vector.len() + backends.graph.len() + backends.geo.len()
    }

    // ========================================================================
    // Plugins
    // ========================================================================

    /// Load the plugin at `path` and register its backends.
    ///
    /// Returns how many backends were registered. Backends registered before
    /// a later one is discarded stay registered.
    pub fn load_plugin(&self, path: &Path) -> AccelResult<usize> {
        let name = self.loader.load_plugin(path)?;
        self.register_plugin_backends(&name)
    }

    /// Load every plugin in `dir` and register their backends.
    ///
    /// Returns how many plugins were loaded.
    pub fn load_plugins(&self, dir: &Path) -> usize {
        self.load_plugins_counting(dir).0
    }

    fn load_plugins_counting(&self, dir: &Path) -> (usize, usize) {
        let names = self.loader.load_directory(dir);
        let backends = names
            .iter()
            .filter_map(|name| self.register_plugin_backends(name).ok())
            .sum();
        (names.len(), backends)
    }

    /// Adopt a plugin linked into the host and register its backends.
    pub fn register_static_plugin(&self, plugin: Box<dyn BackendPlugin>) -> AccelResult<usize> {
        let name = self.loader.adopt_plugin(plugin)?;
        self.register_plugin_backends(&name)
    }

    fn register_plugin_backends(&self, name: &str) -> AccelResult<usize> {
        let PluginBackends {
            vector,
            graph,
            geo,
            library,
        } = self.loader.instantiate(name)?;
        let offered =
            usize::from(vector.is_some()) + usize::from(graph.is_some()) + usize::from(geo.is_some());

        let mut registered = 0;
        if let Some(backend) = vector {
            registered += usize::from(self.register(backend, Some(name), false));
        }
        if let Some(backend) = graph {
            registered += usize::from(self.register(backend, Some(name), false));
        }
        if let Some(backend) = geo {
            registered += usize::from(self.register(backend, Some(name), false));
        }
        drop(library);

        tracing::info!(
            target: "strata::accel::registry",
            plugin = name,
            offered,
            registered,
            "Registered plugin backends"
        );
        Ok(registered)
    }

    /// Unregister and shut down plugin `name`'s backends, then unload it.
    ///
    /// Unloading is refused while a caller still holds one of its backends;
    /// the backends stay unregistered and the unload can be retried.
    pub fn unload_plugin(&self, name: &str) -> AccelResult<()> {
        let removed = self.unregister_where(|plugin| plugin == Some(name));
        tracing::debug!(
            target: "strata::accel::registry",
            plugin = name,
            removed,
            "Unregistered plugin backends"
        );
        self.loader.unload_plugin(name)
    }

    /// Remove every registration whose plugin `matches`, shutting each down.
    fn unregister_where(&self, matches: impl Fn(Option<&str>) -> bool) -> usize {
        let (vector, graph, geo) = {
            let mut backends = self.backends.write();
            (
                drain_where(&mut backends.vector, &matches),
                drain_where(&mut backends.graph, &matches),
                drain_where(&mut backends.geo, &matches),
            )
        };
        let count = vector.len() + graph.len() + geo.len();
        vector.iter().for_each(|e| e.backend.shutdown());
        graph.iter().for_each(|e| e.backend.shutdown());
        geo.iter().for_each(|e| e.backend.shutdown());
        count
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Initialize and register every compiled-in GPU backend that probes
    /// available and is not disabled by configuration. Returns how many
    /// were registered.
    pub fn detect_gpu_backends(&self) -> usize {
        #[cfg(feature = "gpu")]
        {
            if !self.config.gpu.enabled {
                tracing::info!(target: "strata::accel::registry", "GPU detection disabled by configuration");
                return 0;
            }

            let mut registered = 0;
            for backend in strata_accel_gpu::gpu_vector_backends() {
                let ty = backend.backend_type();
                if self.config.gpu.is_disabled(ty) {
                    self.note_unavailable(ty, backend.name(), "disabled by configuration".to_string());
                    continue;
                }
                if self.register_vector_backend(backend) {
                    registered += 1;
                }
            }

            let available = self.available_backends();
            for probe in strata_accel_gpu::probe_all() {
                if available.contains(&probe.backend_type) || self.config.gpu.is_disabled(probe.backend_type) {
                    continue;
                }
                let reason = if probe.runtime.is_some() && !probe.compute_pipeline {
                    format!("{} (probe only, no compute pipeline)", probe.detail)
                } else {
                    probe.detail.clone()
                };
                self.note_unavailable(probe.backend_type, probe.backend_type.as_str(), reason);
            }
            registered
        }

        #[cfg(not(feature = "gpu"))]
        {
            tracing::debug!(target: "strata::accel::registry", "GPU support not compiled in");
            0
        }
    }

    /// Plugin directories scanned by [`auto_detect`](Self::auto_detect):
    /// configured directories first, then `./plugins`,
    /// `<executable dir>/plugins` and the platform's system directories.
    pub fn plugin_search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.config.plugins.search_dirs.clone();
        dirs.push(PathBuf::from("plugins"));
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            dirs.push(exe_dir.join("plugins"));
        }
        #[cfg(unix)]
        {
            dirs.push(PathBuf::from("/usr/local/lib/strata/plugins"));
            dirs.push(PathBuf::from("/opt/strata/plugins"));
        }
        #[cfg(windows)]
        {
            if let Some(program_files) = std::env::var_os("ProgramFiles") {
                dirs.push(PathBuf::from(program_files).join("Strata").join("plugins"));
            }
        }
        let mut unique = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if !unique.contains(&dir) {
                unique.push(dir);
            }
        }
        unique
    }

    /// Startup discovery: GPU detection, then plugin directories, then a
    /// summary log line.
    pub fn auto_detect(&self) -> DetectionSummary {
        let mut summary = DetectionSummary {
            gpu_backends: self.detect_gpu_backends(),
            ..DetectionSummary::default()
        };

        if self.config.plugins.auto_detect {
            for dir in self.plugin_search_dirs() {
                let (plugins, backends) = self.load_plugins_counting(&dir);
                summary.plugins_loaded += plugins;
                summary.plugin_backends += backends;
            }
        }
        summary.total_backends = self.backend_count();

        let available: Vec<&str> = self
            .available_backends()
            .iter()
            .map(BackendType::as_str)
            .collect();
        tracing::info!(
            target: "strata::accel::registry",
            gpu_backends = summary.gpu_backends,
            plugins = summary.plugins_loaded,
            plugin_backends = summary.plugin_backends,
            total = summary.total_backends,
            available = ?available,
            "Backend auto-detection complete"
        );
        summary
    }

    // ========================================================================
    // Reporting and teardown
    // ========================================================================

    /// Registered backends with fresh capabilities, plus why others are
    /// missing.
    pub fn capability_report(&self) -> CapabilityReport {
        let mut registered = Vec::new();
        {
            let backends = self.backends.read();
            for e in &backends.vector {
                registered.push(describe(Capability::Vector, e, e.backend.capabilities()));
            }
            for e in &backends.graph {
                registered.push(describe(Capability::Graph, e, e.backend.capabilities()));
            }
            for e in &backends.geo {
                registered.push(describe(Capability::Geo, e, e.backend.capabilities()));
            }
        }
        registered.sort_by_key(|r| (r.backend_type.priority_rank(), r.capability as u8));

        CapabilityReport {
            registered,
            unavailable: self.unavailable.lock().clone(),
            plugins: self.loader.loaded_plugins(),
            rejected_plugins: report::rejected_plugins(&self.auditor().events()),
        }
    }

    /// Shut down and unregister every backend, then unload every plugin.
    /// Idempotent.
    pub fn shutdown_all(&self) {
        let removed = self.unregister_where(|_| true);
        let unloaded = self.loader.unload_all_plugins();
        if removed > 0 || unloaded > 0 {
            tracing::info!(
                target: "strata::accel::registry",
                backends = removed,
                plugins = unloaded,
                "Registry shut down"
            );
        }
    }
}

impl Drop for BackendRegistry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

fn drain_where<B: ?Sized>(
    list: &mut Vec<Registered<B>>,
    matches: &impl Fn(Option<&str>) -> bool,
) -> Vec<Registered<B>> {
    let mut removed = Vec::new();
    let mut i = 0;
    while i < list.len() {
        if matches(list[i].plugin.as_deref()) {
            removed.push(list.remove(i));
        } else {
            i += 1;
        }
    }
    removed
}

fn describe<B: ?Sized>(
    capability: Capability,
    entry: &Registered<B>,
    capabilities: BackendCapabilities,
) -> RegisteredBackend {
    RegisteredBackend {
        capability,
        name: entry.key.name.clone(),
        backend_type: entry.key.backend_type,
        plugin: entry.plugin.clone(),
        capabilities,
    }
}
