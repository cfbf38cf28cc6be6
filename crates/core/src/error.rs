//! Error types for the acceleration layer
//!
//! Every fallible operation in the workspace returns [`AccelResult`]. The
//! variants follow the failure taxonomy of the layer: absence of a device,
//! policy rejection of a plugin, operational failure inside a backend, and
//! programmer error caught by precondition checks.

use std::io;
use thiserror::Error;

/// Result type alias for acceleration operations
pub type AccelResult<T> = std::result::Result<T, AccelError>;

/// Error types for the acceleration layer
#[derive(Debug, Error)]
pub enum AccelError {
    /// I/O error (plugin files, metadata sidecars, audit export)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Caller passed malformed input (dimension mismatch, bad lengths, bad vertex id)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation invoked on a backend that is not in the initialized state
    #[error("Backend '{backend}' is not initialized")]
    NotInitialized {
        /// Backend name
        backend: String,
    },

    /// Required device, driver or runtime is not present
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Device allocation, transfer, compilation or dispatch failed
    #[error("Device error in '{backend}': {message}")]
    Device {
        /// Backend name
        backend: String,
        /// Driver-level failure description
        message: String,
    },

    /// Plugin library could not be loaded or is ABI-incompatible
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Plugin rejected by the security policy
    #[error("Rejected by security policy: {0}")]
    PolicyRejected(String),

    /// Serialization or deserialization failure (metadata, audit export)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AccelError {
    /// Build an [`AccelError::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        AccelError::InvalidInput(message.into())
    }

    /// Build an [`AccelError::NotInitialized`].
    pub fn not_initialized(backend: impl Into<String>) -> Self {
        AccelError::NotInitialized {
            backend: backend.into(),
        }
    }

    /// Build an [`AccelError::Device`].
    pub fn device(backend: impl Into<String>, message: impl Into<String>) -> Self {
        AccelError::Device {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Build an [`AccelError::Unavailable`].
    pub fn unavailable(message: impl Into<String>) -> Self {
        AccelError::Unavailable(message.into())
    }

    /// Build an [`AccelError::Plugin`].
    pub fn plugin(message: impl Into<String>) -> Self {
        AccelError::Plugin(message.into())
    }

    /// True for failures the caller may answer by trying the next backend.
    pub fn is_fallback_condition(&self) -> bool {
        matches!(
            self,
            AccelError::Device { .. } | AccelError::Unavailable(_) | AccelError::NotInitialized { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = AccelError::Io(io::Error::new(io::ErrorKind::NotFound, "plugin missing"));
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("plugin missing"));
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = AccelError::invalid_input("dimension must be > 0");
        assert!(err.to_string().contains("Invalid input"));
        assert!(err.to_string().contains("dimension must be > 0"));
    }

    #[test]
    fn test_error_display_device() {
        let err = AccelError::device("cuda", "cuMemAlloc_v2 failed");
        let msg = err.to_string();
        assert!(msg.contains("cuda"));
        assert!(msg.contains("cuMemAlloc_v2"));
    }

    #[test]
    fn test_error_display_not_initialized() {
        let err = AccelError::not_initialized("cpu-scalar");
        assert_eq!(err.to_string(), "Backend 'cpu-scalar' is not initialized");
    }

    #[test]
    fn test_fallback_condition() {
        assert!(AccelError::device("hip", "oom").is_fallback_condition());
        assert!(AccelError::unavailable("no device").is_fallback_condition());
        assert!(!AccelError::invalid_input("bad dim").is_fallback_condition());
        assert!(!AccelError::PolicyRejected("blacklisted".into()).is_fallback_condition());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: AccelError = io_err.into();
        assert!(matches!(err, AccelError::Io(_)));
    }
}
