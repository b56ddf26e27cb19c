//! Error types for the package manager with clear, actionable messages

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type PmfResult<T> = Result<T, PmfError>;

/// Package manager errors
///
/// Expected outcomes such as "not installed" or "version not found" are
/// reported through [`PackageState`](crate::manager::PackageState) instead.
#[derive(Error, Debug)]
pub enum PmfError {
    /// An operation was invoked before `start` or after `stop`
    #[error("The package manager is not initialized.\n\nCall PackageManager::start before using it, and do not use it after stop.")]
    NotInitialized,

    /// A required argument was missing or malformed
    #[error("Invalid {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// A dependency chain re-entered one of its ancestors
    #[error("Dependency cycle detected: {}", .chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    /// A dependency chain exceeded the nesting limit
    #[error("Dependency chain is too deep (limit {depth})")]
    DependencyTooDeep { depth: usize },

    /// The registry could not be reached or answered with a failure status
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// A registry request did not complete within its deadline
    #[error("Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// Filesystem failure
    #[error("I/O failure at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The local manifest is not valid JSON
    #[error("Failed to parse manifest {path} (corrupted or invalid format)")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The registry returned malformed package metadata
    #[error("Failed to parse registry metadata for package '{id}'")]
    RegistryParse {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// An archive could not be unpacked
    #[error("Failed to extract {archive}: {reason}")]
    Extraction { archive: PathBuf, reason: String },

    /// Configuration is missing or invalid
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PmfError {
    /// Build an `Io` error for a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PmfError::Io {
            path: path.into(),
            source,
        }
    }

    /// Build an `InvalidArgument` error
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        PmfError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// True when the registry was unreachable rather than answering
    pub fn is_transport(&self) -> bool {
        matches!(self, PmfError::Transport { .. } | PmfError::Timeout { .. })
    }

    /// True for errors that must abort a whole dependency chain
    pub fn is_resolution_fatal(&self) -> bool {
        matches!(
            self,
            PmfError::CycleDetected { .. } | PmfError::DependencyTooDeep { .. }
        )
    }
}

/// Reject ids and file names that would escape their parent directory
pub(crate) fn ensure_path_component(name: &'static str, value: &str) -> PmfResult<()> {
    if value.is_empty() {
        return Err(PmfError::invalid(name, "must not be empty"));
    }

    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(PmfError::invalid(
            name,
            format!("'{value}' must be a single path component"),
        ));
    }

    Ok(())
}
