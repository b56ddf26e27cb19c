//! Package manager configuration
//!
//! Process-wide settings, fixed before the manager starts. Hosts either build
//! a [`PmfConfig`] in code or load it from a YAML file:
//!
//! ```yaml
//! manifest_file: manifest.json
//! install_root: packages
//! registry_endpoint: https://registry.example.com/package
//! sdk_version: "1.0"
//! temp_folder: .pmf-temp
//! debug: false
//! request_timeout_secs: 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PmfError, PmfResult};

/// Default manifest file name
pub const DEFAULT_MANIFEST_FILE: &str = "manifest.json";

/// Default installation root
pub const DEFAULT_INSTALL_ROOT: &str = "packages";

/// Default temporary download folder
pub const DEFAULT_TEMP_FOLDER: &str = ".pmf-temp";

/// Default registry request timeout (30 seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_manifest_file() -> PathBuf {
    PathBuf::from(DEFAULT_MANIFEST_FILE)
}

fn default_install_root() -> PathBuf {
    PathBuf::from(DEFAULT_INSTALL_ROOT)
}

fn default_temp_folder() -> PathBuf {
    PathBuf::from(DEFAULT_TEMP_FOLDER)
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Settings shared by every component of the package manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmfConfig {
    /// Where the installed-package manifest lives
    #[serde(default = "default_manifest_file")]
    pub manifest_file: PathBuf,

    /// Packages are extracted to `{install_root}/{id}`
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// Base URL; package metadata is read from `{registry_endpoint}/{id}`
    #[serde(default)]
    pub registry_endpoint: String,

    /// SDK version used by the `*_by_sdk_version` operations
    #[serde(default)]
    pub sdk_version: String,

    /// Staging area for downloads, swept when the manager stops
    #[serde(default = "default_temp_folder")]
    pub temp_folder: PathBuf,

    /// Deliver debug-level notifications to observers
    #[serde(default)]
    pub debug: bool,

    /// Deadline applied to every registry request
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PmfConfig {
    fn default() -> Self {
        Self {
            manifest_file: default_manifest_file(),
            install_root: default_install_root(),
            registry_endpoint: String::new(),
            sdk_version: String::new(),
            temp_folder: default_temp_folder(),
            debug: false,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl PmfConfig {
    /// Create a configuration for a registry endpoint, all else default
    pub fn new(registry_endpoint: impl Into<String>) -> Self {
        Self {
            registry_endpoint: registry_endpoint.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a YAML file, or defaults if it does not exist
    pub fn load_from_path(path: &Path) -> PmfResult<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| PmfError::io(path, e))?;

        serde_yaml_ng::from_str(&content).map_err(|e| {
            PmfError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Write configuration as YAML
    pub fn save_to_path(&self, path: &Path) -> PmfResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PmfError::io(parent, e))?;
        }

        let content = serde_yaml_ng::to_string(self)
            .map_err(|e| PmfError::Config(format!("failed to serialize config: {e}")))?;

        std::fs::write(path, content).map_err(|e| PmfError::io(path, e))
    }

    /// Check the settings an operation cannot run without
    pub fn validate(&self) -> PmfResult<()> {
        if self.registry_endpoint.is_empty() {
            return Err(PmfError::Config("registry_endpoint is not set".to_string()));
        }

        if !self.registry_endpoint.starts_with("http://")
            && !self.registry_endpoint.starts_with("https://")
        {
            return Err(PmfError::Config(
                "registry_endpoint must start with http:// or https://".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(PmfError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Directory a package is installed into
    pub fn install_dir(&self, id: &str) -> PathBuf {
        self.install_root.join(id)
    }

    /// Directory a package's downloads are staged into
    pub fn staging_dir(&self, id: &str) -> PathBuf {
        self.temp_folder.join(id)
    }

    pub fn with_manifest_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_file = path.into();
        self
    }

    pub fn with_install_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_root = path.into();
        self
    }

    pub fn with_sdk_version(mut self, sdk_version: impl Into<String>) -> Self {
        self.sdk_version = sdk_version.into();
        self
    }

    pub fn with_temp_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_folder = path.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Place manifest, install root and temp folder under one directory
    pub fn rooted_at(self, root: &Path) -> Self {
        self.with_manifest_file(root.join(DEFAULT_MANIFEST_FILE))
            .with_install_root(root.join(DEFAULT_INSTALL_ROOT))
            .with_temp_folder(root.join(DEFAULT_TEMP_FOLDER))
    }
}
