//! Error types and handling infrastructure for pyvsi-handle.
//!
//! Failures of the host object inside a [`VirtualHandle`](crate::vsi::VirtualHandle)
//! operation never surface here: the handle absorbs them and reports native
//! return codes. This module covers everything around the handle, namely
//! construction, registration under a synthetic path, the owning
//! [`HostFile`](crate::vsi::HostFile) wrapper and configuration.
//!
//! ## Design Principles
//!
//! - **User-friendly messages**: Errors name the path or method involved
//! - **Context preservation**: Host errors are kept as the `source`
//! - **Consistency**: Standardized Result type across all modules

use thiserror::Error;

/// A failure raised on the host side of the boundary.
///
/// Mirrors an exception object of the host runtime: a type name such as
/// `ValueError` and its message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct HostError {
    pub kind: String,
    pub message: String,
}

impl HostError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Placeholder for a call that reported failure without setting an error.
    pub fn unset(method: &str) -> Self {
        Self::new(
            "SystemError",
            format!("{method}() failed without setting an error"),
        )
    }
}

/// The main error type for pyvsi-handle operations.
#[derive(Error, Debug)]
pub enum VsiError {
    /// A null host reference was supplied where an object was required
    #[error("Host object reference is null")]
    NullHostObject,

    /// The host object lacks a method required of file-like objects
    #[error("Host object is not file-like: missing `{method}` method")]
    NotFileLike { method: String },

    /// A host method call failed outside of handle translation
    #[error("Host call `{method}` failed")]
    Host {
        method: String,
        #[source]
        source: HostError,
    },

    /// Path does not live under the in-memory prefix
    #[error("Path {path} is outside of {prefix}")]
    OutsidePrefix { path: String, prefix: String },

    /// A handle is already installed at this path
    #[error("Path already in use: {path}")]
    PathInUse { path: String },

    /// No handle installed at this path
    #[error("No such virtual file: {path}")]
    NotFound { path: String },

    /// Installing or reopening a handle under a synthetic path failed
    #[error("Failed to register handle at {path}")]
    Registration { path: String },

    /// Operation on a closed file
    #[error("I/O operation on closed file: {path}")]
    Closed { path: String },

    /// Configuration related errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File system related errors
    #[error("File operation failed: {message}")]
    FileError {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Standard Result type for pyvsi-handle operations.
pub type Result<T> = std::result::Result<T, VsiError>;

impl VsiError {
    /// Create a FileError from an io::Error with additional context
    pub fn file_error(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::FileError {
            message: message.into(),
            source,
        }
    }

    /// Create a ConfigError with a descriptive message
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn host(method: impl Into<String>, source: HostError) -> Self {
        Self::Host {
            method: method.into(),
            source,
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn closed(path: impl Into<String>) -> Self {
        Self::Closed { path: path.into() }
    }
}

impl From<VsiError> for std::io::Error {
    fn from(err: VsiError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            VsiError::NotFound { .. } => ErrorKind::NotFound,
            VsiError::PathInUse { .. } => ErrorKind::AlreadyExists,
            VsiError::NullHostObject
            | VsiError::NotFileLike { .. }
            | VsiError::OutsidePrefix { .. } => ErrorKind::InvalidInput,
            VsiError::FileError { source, .. } => source.kind(),
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = VsiError::NotFileLike {
            method: "seek".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Host object is not file-like: missing `seek` method"
        );

        let err = VsiError::OutsidePrefix {
            path: "/tmp/a.tif".to_string(),
            prefix: "/vsimem/".to_string(),
        };
        assert_eq!(err.to_string(), "Path /tmp/a.tif is outside of /vsimem/");

        let err = VsiError::closed("/vsimem/x/y.tif");
        assert_eq!(
            err.to_string(),
            "I/O operation on closed file: /vsimem/x/y.tif"
        );
    }

    #[test]
    fn test_host_error_display_and_source() {
        let host = HostError::new("ValueError", "I/O operation on closed file.");
        assert_eq!(host.to_string(), "ValueError: I/O operation on closed file.");

        let err = VsiError::host("read", host.clone());
        let source = std::error::Error::source(&err).expect("source is kept");
        assert_eq!(source.to_string(), host.to_string());
    }

    #[test]
    fn test_unset_host_error_names_method() {
        let err = HostError::unset("tell");
        assert_eq!(err.kind, "SystemError");
        assert!(err.message.starts_with("tell()"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = VsiError::file_error("Failed to read config", io_err);

        let back: std::io::Error = err.into();
        assert_eq!(back.kind(), std::io::ErrorKind::PermissionDenied);

        let missing: std::io::Error = VsiError::not_found("/vsimem/nope").into();
        assert_eq!(missing.kind(), std::io::ErrorKind::NotFound);
    }
}
