//! Unified error types for the vessel workspace.
//!
//! Every library crate returns [`VesselError`]; the binary wraps it in
//! `anyhow` at the top level.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum VesselError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or request is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// No free address is left in a subnet.
    #[error("no free address left in subnet {subnet}")]
    Exhausted {
        /// Canonical CIDR of the exhausted subnet.
        subnet: String,
    },

    /// A namespace, mount, or other kernel-boundary operation failed.
    #[error("system call failed: {message}")]
    Syscall {
        /// Description of the failed operation.
        message: String,
    },

    /// Input could not be parsed.
    #[error("malformed {what}: {message}")]
    Malformed {
        /// What was being parsed.
        what: &'static str,
        /// Parser diagnostic.
        message: String,
    },

    /// An external helper program exited unsuccessfully.
    #[error("`{program}` failed ({status}): {stderr}")]
    Command {
        /// Program and arguments that were run.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// Several independent steps failed during best-effort teardown.
    #[error("{}", Joined(.0))]
    Multiple(Vec<VesselError>),
}

impl VesselError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for [`VesselError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Folds the errors collected by a best-effort sequence into one result.
    ///
    /// # Errors
    ///
    /// Returns the single error unchanged, or [`VesselError::Multiple`] when
    /// more than one step failed.
    pub fn collect(mut errors: Vec<Self>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

struct Joined<'a>(&'a [VesselError]);

impl fmt::Display for Joined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} steps failed", self.0.len())?;
        for err in self.0 {
            write!(f, "; {err}")?;
        }
        Ok(())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, VesselError>;
