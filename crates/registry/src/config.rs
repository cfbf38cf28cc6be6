//! Acceleration configuration via `strata-accel.toml`
//!
//! One file with four sections: `[cpu]`, `[gpu]`, `[plugins]` and
//! `[security]`. Every field has a default, so an empty file is valid. To
//! change settings, edit the file and restart.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_accel_core::{AccelError, AccelResult, BackendType};
use strata_accel_cpu::CpuOptions;
use strata_accel_plugin::PluginSecurityPolicy;

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "strata-accel.toml";

/// `[gpu]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuConfig {
    /// Run GPU detection at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Backend names skipped by detection, e.g. `["opencl"]`
    #[serde(default)]
    pub disabled_backends: Vec<String>,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled_backends: Vec::new(),
        }
    }
}

impl GpuConfig {
    /// Parse `disabled_backends`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unknown backend.
    pub fn disabled_types(&self) -> AccelResult<Vec<BackendType>> {
        self.disabled_backends
            .iter()
            .map(|name| {
                name.parse::<BackendType>().map_err(|e| {
                    AccelError::Config(format!("[gpu] disabled_backends: {}", e))
                })
            })
            .collect()
    }

    /// Whether detection should skip `backend_type`.
    pub fn is_disabled(&self, backend_type: BackendType) -> bool {
        !self.enabled
            || self
                .disabled_backends
                .iter()
                .any(|name| name.parse::<BackendType>().ok() == Some(backend_type))
    }
}

/// `[plugins]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Scan plugin directories during `auto_detect`
    #[serde(default = "default_true")]
    pub auto_detect: bool,
    /// Extra directories, scanned before the platform defaults
    #[serde(default)]
    pub search_dirs: Vec<PathBuf>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            auto_detect: true,
            search_dirs: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Acceleration configuration loaded from `strata-accel.toml`.
///
/// # Example
///
/// ```toml
/// [cpu]
/// strategy = "simd"
///
/// [gpu]
/// disabled_backends = ["opencl"]
///
/// [security]
/// allow_unsigned = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccelConfig {
    /// Built-in CPU backends
    #[serde(default)]
    pub cpu: CpuOptions,
    /// GPU detection
    #[serde(default)]
    pub gpu: GpuConfig,
    /// Plugin discovery
    #[serde(default)]
    pub plugins: PluginConfig,
    /// Plugin verification policy
    #[serde(default)]
    pub security: PluginSecurityPolicy,
}

impl AccelConfig {
    /// Check values serde cannot check.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown backend names in `[gpu] disabled_backends`.
    pub fn validate(&self) -> AccelResult<()> {
        self.gpu.disabled_types().map(|_| ())
    }

    /// Parse a config from TOML text and validate it.
    pub fn from_toml(text: &str) -> AccelResult<Self> {
        let config: AccelConfig =
            toml::from_str(text).map_err(|e| AccelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Strata acceleration layer configuration

[cpu]
# Vector strategy of the built-in CPU backend: "scalar", "simd" or "parallel"
strategy = "parallel"
# Worker threads for "parallel" (0 = one per logical CPU)
threads = 0
# Use AVX2/NEON kernels when the CPU supports them
simd = true

[gpu]
# Detect GPU backends at startup
enabled = true
# Backends to skip, e.g. ["opencl", "zluda"]
disabled_backends = []

[plugins]
# Scan plugin directories at startup
auto_detect = true
# Extra directories scanned before ./plugins, <exe dir>/plugins and the
# system plugin directories
search_dirs = []

[security]
# Reject plugins without a valid signature
require_signature = true
# Accept plugins that have no metadata sidecar at all
allow_unsigned = false
# Compare the plugin hash with the sha256 declared in its metadata
verify_file_hash = true
# Reject signatures made with a revoked certificate
check_revocation = true
# Minimum trust level: "blocked", "untrusted" or "trusted"
min_trust_level = "trusted"
# Issuers matched as substrings of the signature issuer
trusted_issuers = ["CN=Strata Official Plugins, O=Strata"]
# Base64 Ed25519 public keys accepted as signing certificates
trusted_certificates = []
revoked_certificates = []
# Lowercase hex SHA-256 hashes of plugin binaries
blacklisted_hashes = []
whitelisted_hashes = []
# Days a signature stays valid (0 = never expires)
signature_validity_days = 365
# Whitelisted hashes skip metadata and signature checks
whitelist_bypasses_signature = true
# Audit events kept in memory before the oldest are evicted (0 = keep all).
# Export the log periodically when a cap is set.
max_audit_events = 0
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> AccelResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AccelError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content).map_err(|e| {
            AccelError::Config(format!(
                "Invalid config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> AccelResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                AccelError::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> AccelResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AccelError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            AccelError::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
