//! Common error types for monroot.

use std::io;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`MonrootError`].
pub type MonrootResult<T> = Result<T, MonrootError>;

/// Errors produced while assembling a monitor rootfs or switching into it.
#[derive(Error, Diagnostic, Debug)]
pub enum MonrootError {
    /// Unsupported propagation mode or mount option.
    ///
    /// Raised before any syscall is issued, so nothing is partially applied.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(monroot::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Filesystem operation failed on a specific path.
    #[error("Failed to {operation} {}: {source}", .path.display())]
    #[diagnostic(code(monroot::fs))]
    Fs {
        /// Operation that failed (stat, mkdir, chmod, ...).
        operation: &'static str,
        /// The offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Mount-table or device syscall failed on a specific path.
    #[error("{operation} failed for {}: {source}", .path.display())]
    #[diagnostic(
        code(monroot::syscall),
        help("Mount, pivot_root and mknod require CAP_SYS_ADMIN and CAP_MKNOD")
    )]
    Syscall {
        /// Syscall that failed (mount, umount2, pivot_root, ...).
        operation: &'static str,
        /// The offending path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A rootfs assembly step failed.
    #[error("Rootfs step '{step}' failed: {source}")]
    #[diagnostic(code(monroot::step))]
    Step {
        /// Human readable step name.
        step: String,
        /// The cause.
        #[source]
        source: Box<MonrootError>,
    },

    /// I/O error without path context.
    #[error("I/O error: {0}")]
    #[diagnostic(code(monroot::io))]
    Io(#[from] io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(monroot::serialization))]
    Serialization(String),
}

impl MonrootError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a filesystem error for `path`.
    pub fn fs(operation: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Fs {
            operation,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a syscall error for `path`.
    pub fn syscall(operation: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Syscall {
            operation,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap this error with the name of the assembly step that produced it.
    #[must_use]
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Underlying OS error number, looking through step wrappers.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Fs { source, .. } | Self::Syscall { source, .. } | Self::Io(source) => {
                source.raw_os_error()
            }
            Self::Step { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Whether the root cause is a "does not exist" condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Fs { source, .. } | Self::Syscall { source, .. } | Self::Io(source) => {
                source.kind() == io::ErrorKind::NotFound
            }
            Self::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether a host path could not be stat'ed because it does not exist.
    ///
    /// Only the initial `stat` of a mirror source qualifies. A missing path
    /// met later, by mkdir, mount, chmod or chown, does not.
    #[must_use]
    pub fn is_missing_source(&self) -> bool {
        matches!(
            self,
            Self::Fs { operation: "stat", source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}

impl From<serde_json::Error> for MonrootError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
