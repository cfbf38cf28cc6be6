//! Plugin subsystem of the Strata acceleration layer
//!
//! - [`abi`]: the contract a plugin library exports ([`BackendPlugin`],
//!   [`PluginDeclaration`], [`export_backend_plugin!`])
//! - [`loader`]: verified loading, ownership tokens, unloading
//! - [`backed`]: plugin backends that pin their library while alive
//! - [`verifier`]: hash, blacklist/whitelist, Ed25519 signature and trust checks
//! - [`audit`]: append-only security event log with JSON export
//! - [`metadata`]: `<plugin>.json` sidecar descriptors
//! - [`signer`]: producing signed sidecars for release tooling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abi;
pub mod audit;
pub mod backed;
pub mod loader;
pub mod metadata;
pub mod policy;
pub mod signer;
pub mod verifier;

pub use abi::{BackendPlugin, PluginDeclaration, DECLARATION_SYMBOL, PLUGIN_ABI_VERSION};
pub use backed::PluginBacked;
pub use audit::{PluginSecurityAuditor, PluginSecurityEvent, SecurityEventKind, Severity};
pub use loader::{is_plugin_file, PluginBackends, PluginInfo, PluginLibrary, PluginLoader, PLUGIN_PREFIX};
pub use metadata::{write_metadata, PluginMetadata, PluginSignature};
pub use policy::{PluginSecurityPolicy, PluginTrustLevel};
pub use signer::{certificate_for, sign_plugin, SignerIdentity};
pub use verifier::{hash_file, PluginSecurityVerifier, VerificationOutcome};

/// Core version plugins are built against; read by [`export_backend_plugin!`].
pub use strata_accel_core::CORE_VERSION;
