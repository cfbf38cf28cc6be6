//! Metadata sidecar files.
//!
//! A plugin's descriptor lives next to the binary, either as
//! `<plugin-file>.json` or `<stem>.json`, so its trust status can change
//! without rebuilding it. The file wraps the descriptor in a `plugin` object:
//!
//! ```json
//! {
//!   "plugin": {
//!     "name": "example",
//!     "version": "1.0.0",
//!     "signature": { "sha256": "..", "signature": "..", "certificate": "..",
//!                    "issuer": "..", "subject": "..", "timestamp": 1700000000 },
//!     "permissions": ["gpu"]
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_accel_core::{AccelError, AccelResult};

/// Signature algorithm written by the signer and accepted by the verifier.
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

fn default_algorithm() -> String {
    SIGNATURE_ALGORITHM.to_string()
}

/// Signature block of a sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSignature {
    /// Hex SHA-256 of the plugin binary
    #[serde(default)]
    pub sha256: String,
    /// Base64 signature over the raw digest bytes
    #[serde(default)]
    pub signature: String,
    /// Base64 public key of the signer
    #[serde(default)]
    pub certificate: String,
    /// Issuer distinguished name
    #[serde(default)]
    pub issuer: String,
    /// Subject distinguished name
    #[serde(default)]
    pub subject: String,
    /// Signing time, seconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
    /// Signature algorithm
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

impl Default for PluginSignature {
    fn default() -> Self {
        Self {
            sha256: String::new(),
            signature: String::new(),
            certificate: String::new(),
            issuer: String::new(),
            subject: String::new(),
            timestamp: 0,
            algorithm: default_algorithm(),
        }
    }
}

impl PluginSignature {
    /// True when a signature value is present
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }
}

/// Plugin descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Plugin name
    #[serde(default)]
    pub name: String,
    /// Plugin version
    #[serde(default)]
    pub version: String,
    /// Author
    #[serde(default)]
    pub author: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// License identifier
    #[serde(default)]
    pub license: String,
    /// Signature block
    #[serde(default)]
    pub signature: PluginSignature,
    /// Requested permissions
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Serialize)]
struct SidecarOut<'a> {
    plugin: &'a PluginMetadata,
}

impl PluginMetadata {
    /// Candidate sidecar paths for `plugin_path`, in lookup order.
    pub fn sidecar_paths(plugin_path: &Path) -> Vec<PathBuf> {
        let mut appended = plugin_path.as_os_str().to_owned();
        appended.push(".json");
        let mut paths = vec![PathBuf::from(appended)];
        if plugin_path.extension().is_some() {
            let beside = plugin_path.with_extension("json");
            if !paths.contains(&beside) {
                paths.push(beside);
            }
        }
        paths
    }

    /// Load the sidecar of `plugin_path`.
    ///
    /// Returns `Ok(None)` when no sidecar exists and an error when one exists
    /// but cannot be parsed.
    pub fn load_for(plugin_path: &Path) -> AccelResult<Option<Self>> {
        for candidate in Self::sidecar_paths(plugin_path) {
            if candidate.is_file() {
                let text = std::fs::read_to_string(&candidate)?;
                return Self::from_json(&text)
                    .map(Some)
                    .map_err(|e| AccelError::Serialization(format!("{}: {}", candidate.display(), e)));
            }
        }
        Ok(None)
    }

    /// Parse a sidecar, accepting both the `{"plugin": {..}}` wrapper and a
    /// bare descriptor object.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("plugin").is_some_and(|inner| inner.is_object()) {
            value = value["plugin"].take();
        }
        serde_json::from_value(value)
    }

    /// Serialize in the wrapped form.
    pub fn to_json(&self) -> AccelResult<String> {
        serde_json::to_string_pretty(&SidecarOut { plugin: self })
            .map_err(|e| AccelError::Serialization(e.to_string()))
    }
}

/// Write `metadata` as the primary sidecar of `plugin_path` and return its path.
pub fn write_metadata(plugin_path: &Path, metadata: &PluginMetadata) -> AccelResult<PathBuf> {
    let path = PluginMetadata::sidecar_paths(plugin_path).remove(0);
    std::fs::write(&path, metadata.to_json()?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_paths_order() {
        let paths = PluginMetadata::sidecar_paths(Path::new("/p/libstrata_accel_x.so"));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/p/libstrata_accel_x.so.json"),
                PathBuf::from("/p/libstrata_accel_x.json"),
            ]
        );
    }

    #[test]
    fn test_parse_wrapped_and_bare() {
        let wrapped = r#"{"plugin": {"name": "a", "signature": {"sha256": "ff"}, "permissions": ["gpu"]}}"#;
        let meta = PluginMetadata::from_json(wrapped).unwrap();
        assert_eq!(meta.name, "a");
        assert_eq!(meta.signature.sha256, "ff");
        assert_eq!(meta.signature.algorithm, "ed25519");
        assert_eq!(meta.permissions, vec!["gpu".to_string()]);

        let bare = PluginMetadata::from_json(r#"{"name": "b", "version": "2"}"#).unwrap();
        assert_eq!(bare.version, "2");
        assert!(!bare.signature.is_signed());
    }

    #[test]
    fn test_load_prefers_appended_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = dir.path().join("strata_accel_demo.so");
        std::fs::write(&plugin, b"binary").unwrap();
        std::fs::write(dir.path().join("strata_accel_demo.json"), r#"{"plugin": {"name": "stem"}}"#)
            .unwrap();
        assert_eq!(PluginMetadata::load_for(&plugin).unwrap().unwrap().name, "stem");

        let meta = PluginMetadata {
            name: "appended".into(),
            ..Default::default()
        };
        write_metadata(&plugin, &meta).unwrap();
        assert_eq!(PluginMetadata::load_for(&plugin).unwrap().unwrap(), meta);
    }

    #[test]
    fn test_missing_and_malformed_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = dir.path().join("strata_accel_none.so");
        assert!(PluginMetadata::load_for(&plugin).unwrap().is_none());

        std::fs::write(dir.path().join("strata_accel_none.so.json"), "{not json").unwrap();
        assert!(matches!(
            PluginMetadata::load_for(&plugin),
            Err(AccelError::Serialization(_))
        ));
    }
}
