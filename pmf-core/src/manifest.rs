//! Installed-package manifest (`manifest.json`)
//!
//! Tracks which packages are installed and at which release. The file holds
//! a JSON array of packages, each carrying exactly one asset: the installed
//! one. It is loaded once when the manager starts, mutated in memory, and
//! written back when the manager stops.

use std::path::{Path, PathBuf};

use crate::config::PmfConfig;
use crate::error::{ensure_path_component, PmfError, PmfResult};
use crate::package::{Asset, Package};

/// Result of checking whether a package is installed
#[derive(Debug, Clone, PartialEq)]
pub struct InstallCheck {
    /// Both the manifest entry and the install directory exist
    pub installed: bool,
    /// The manifest entry, present only when `installed` is true
    pub package: Option<Package>,
    /// Where the package is (or would be) installed
    pub install_dir: PathBuf,
}

/// In-memory manifest bound to its file and the on-disk layout
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    install_root: PathBuf,
    temp_folder: PathBuf,
    packages: Vec<Package>,
}

impl ManifestStore {
    /// Create the manifest file if missing, then load it
    pub fn initialize(config: &PmfConfig) -> PmfResult<Self> {
        let path = config.manifest_file.clone();
        ensure_manifest_file(&path)?;

        let content = std::fs::read_to_string(&path).map_err(|e| PmfError::io(&path, e))?;
        let packages = parse_manifest(&path, &content)?;

        tracing::debug!(
            "Loaded manifest {} ({} packages)",
            path.display(),
            packages.len()
        );

        Ok(Self {
            path,
            install_root: config.install_root.clone(),
            temp_folder: config.temp_folder.clone(),
            packages,
        })
    }

    /// Persist the manifest, then sweep the temporary download area
    ///
    /// Consumes the store, so it cannot be finalized twice.
    pub fn finalize(self) -> PmfResult<()> {
        self.save()?;
        self.sweep_temp()
    }

    /// Remove the temporary download area; a missing folder is fine
    pub fn sweep_temp(&self) -> PmfResult<()> {
        match std::fs::remove_dir_all(&self.temp_folder) {
            Ok(()) => {
                tracing::debug!("Removed temp folder {}", self.temp_folder.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PmfError::io(&self.temp_folder, e)),
        }
    }

    /// Write the in-memory list to the manifest file
    pub fn save(&self) -> PmfResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PmfError::io(parent, e))?;
            }
        }

        let content = serde_json::to_string_pretty(&self.packages).map_err(|source| {
            PmfError::ManifestParse {
                path: self.path.clone(),
                source,
            }
        })?;

        std::fs::write(&self.path, content).map_err(|e| PmfError::io(&self.path, e))
    }

    /// Check whether a package is installed
    ///
    /// A manifest entry without its directory, or a directory without its
    /// entry, counts as not installed.
    pub fn is_installed(&self, id: &str) -> PmfResult<InstallCheck> {
        ensure_path_component("package id", id)?;

        let install_dir = self.install_root.join(id);
        if !install_dir.is_dir() {
            return Ok(InstallCheck {
                installed: false,
                package: None,
                install_dir,
            });
        }

        let package = self.get(id).cloned();
        Ok(InstallCheck {
            installed: package.is_some(),
            package,
            install_dir,
        })
    }

    /// Delete a package's directory and drop its manifest entry
    ///
    /// A directory that cannot be deleted is assumed to be gone already.
    /// Returns whether a manifest entry existed.
    pub fn remove_entry(&mut self, id: &str) -> PmfResult<bool> {
        ensure_path_component("package id", id)?;

        let install_dir = self.install_root.join(id);
        if let Err(e) = std::fs::remove_dir_all(&install_dir) {
            tracing::debug!(
                "Could not remove {} ({}), treating as already removed",
                install_dir.display(),
                e
            );
        }

        let before = self.packages.len();
        self.packages.retain(|p| p.id != id);
        Ok(self.packages.len() != before)
    }

    /// Register a package as installed at `asset`
    pub fn record_installed(&mut self, mut package: Package, asset: Asset) {
        package.assets = vec![asset];

        // Remove existing entry if present
        self.packages.retain(|p| p.id != package.id);
        self.packages.push(package);
    }

    pub fn get(&self, id: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.id == id)
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn ensure_manifest_file(path: &Path) -> PmfResult<()> {
    if path.exists() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| PmfError::io(parent, e))?;
        }
    }

    std::fs::write(path, "[]").map_err(|e| PmfError::io(path, e))?;
    tracing::debug!("Created manifest {}", path.display());
    Ok(())
}

fn parse_manifest(path: &Path, content: &str) -> PmfResult<Vec<Package>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let packages: Option<Vec<Package>> =
        serde_json::from_str(content).map_err(|source| PmfError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(packages.unwrap_or_default())
}
