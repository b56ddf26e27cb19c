//! Package manager
//!
//! Install, update and uninstall state machine composing the manifest
//! store, the registry client and the installer.
//!
//! # Lifecycle
//!
//! ```ignore
//! use pmf_core::{PackageManager, PmfConfig};
//!
//! let config = PmfConfig::new("https://registry.example.com/package").with_sdk_version("1.0");
//! let mut manager = PackageManager::from_config(config)?;
//!
//! manager.start()?;                                  // load manifest.json
//! let state = manager.install("foo", "1.0.0").await?;
//! manager.stop()?;                                   // persist, sweep temp folder
//! ```
//!
//! Every operation returns `NotInitialized` outside the `start`/`stop`
//! window. Dropping a started manager stops it.
//!
//! Operations take `&mut self`, so manifest check-mutate-persist sequences
//! never overlap. Hosts sharing one manager across tasks wrap it in a
//! `tokio::sync::Mutex`.

mod state;

pub use state::PackageState;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::{ArchiveExtractor, TarGzExtractor};
use crate::config::PmfConfig;
use crate::error::{PmfError, PmfResult};
use crate::events::{EventLevel, Notifier, PackageObserver, Phase};
use crate::installer::{InstallContext, Installer};
use crate::manifest::{InstallCheck, ManifestStore};
use crate::package::{Asset, Package, Version};
use crate::registry::{self, RegistryClient};

/// Longest chain of nested package dependencies followed
pub const MAX_DEPENDENCY_DEPTH: usize = 32;

/// How the asset to install is chosen from a remote package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetSelector {
    Exact(Version),
    Latest,
    Sdk,
}

impl AssetSelector {
    fn select<'a>(&self, package: &'a Package, sdk_version: &str) -> Option<&'a Asset> {
        match self {
            AssetSelector::Exact(version) => package.asset(version),
            AssetSelector::Latest => package.latest_asset(),
            AssetSelector::Sdk => package.latest_asset_for_sdk(sdk_version),
        }
    }

    fn describe(&self, sdk_version: &str) -> String {
        match self {
            AssetSelector::Exact(version) => format!("version {version}"),
            AssetSelector::Latest => "any version".to_string(),
            AssetSelector::Sdk => format!("SDK version '{sdk_version}'"),
        }
    }
}

/// Installs, updates and removes registry packages
pub struct PackageManager {
    config: PmfConfig,
    registry: Arc<dyn RegistryClient>,
    extractor: Arc<dyn ArchiveExtractor>,
    notifier: Notifier,
    manifest: Option<ManifestStore>,
    resolving: Vec<String>,
}

impl fmt::Debug for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageManager")
            .field("config", &self.config)
            .field("registry", &self.registry.name())
            .field("started", &self.manifest.is_some())
            .finish()
    }
}

impl PackageManager {
    /// Create a manager around a registry client; call [`start`](Self::start) before use
    pub fn new(config: PmfConfig, registry: Arc<dyn RegistryClient>) -> Self {
        let notifier = Notifier::new(config.debug);
        Self {
            config,
            registry,
            extractor: Arc::new(TarGzExtractor),
            notifier,
            manifest: None,
            resolving: Vec::new(),
        }
    }

    /// Create a manager talking to the configured HTTP registry
    #[cfg(feature = "http")]
    pub fn from_config(config: PmfConfig) -> PmfResult<Self> {
        let client = registry::HttpRegistryClient::from_config(&config)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Replace the archive extractor
    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Register an observer for progress and diagnostic events
    pub fn subscribe(&mut self, observer: Arc<dyn PackageObserver>) {
        self.notifier.subscribe(observer);
    }

    pub fn config(&self) -> &PmfConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.manifest.is_some()
    }

    /// Load the manifest, creating it if missing
    ///
    /// Starting an already started manager does nothing.
    pub fn start(&mut self) -> PmfResult<()> {
        if self.manifest.is_some() {
            return Ok(());
        }

        self.notifier.emit(
            Phase::Manifest,
            EventLevel::Info,
            None,
            format!("Validating manifest {}", self.config.manifest_file.display()),
        );

        match ManifestStore::initialize(&self.config) {
            Ok(store) => {
                self.notifier.emit(
                    Phase::Manifest,
                    EventLevel::Debug,
                    None,
                    format!("{} packages installed", store.packages().len()),
                );
                self.manifest = Some(store);
                Ok(())
            }
            Err(e) => {
                self.notifier.emit(
                    Phase::Manifest,
                    EventLevel::Error,
                    None,
                    format!("Failed to initialize: {e}"),
                );
                Err(e)
            }
        }
    }

    /// Persist the manifest and sweep the temporary download folder
    ///
    /// If the manifest cannot be written the manager stays started, so the
    /// call can be retried.
    pub fn stop(&mut self) -> PmfResult<()> {
        if let Err(e) = self.store()?.save() {
            self.report_cleanup_failure(&e);
            return Err(e);
        }

        let store = self.manifest.take().ok_or(PmfError::NotInitialized)?;
        store.sweep_temp().map_err(|e| {
            self.report_cleanup_failure(&e);
            e
        })
    }

    fn report_cleanup_failure(&self, e: &PmfError) {
        self.notifier.emit(
            Phase::Cleanup,
            EventLevel::Error,
            None,
            format!("Something failed while cleaning up: {e}"),
        );
    }

    /// Whether a package is installed (manifest entry and directory both present)
    pub fn is_installed(&self, id: &str) -> PmfResult<bool> {
        Ok(self.store()?.is_installed(id)?.installed)
    }

    /// The manifest entry of an installed package
    pub fn installed_package(&self, id: &str) -> PmfResult<Option<Package>> {
        Ok(self.store()?.is_installed(id)?.package)
    }

    /// Every package recorded in the manifest
    pub fn list_installed(&self) -> PmfResult<&[Package]> {
        Ok(self.store()?.packages())
    }

    /// Install a package at an exact version
    ///
    /// An installed package is left alone (`AlreadyInstalled`), whatever
    /// version it is at.
    pub async fn install(&mut self, id: &str, version: &str) -> PmfResult<PackageState> {
        let version: Version = version.parse()?;
        self.begin()?;
        self.install_guarded(id, AssetSelector::Exact(version)).await
    }

    /// Install the highest published version of a package
    pub async fn install_latest(&mut self, id: &str) -> PmfResult<PackageState> {
        self.begin()?;
        self.install_guarded(id, AssetSelector::Latest).await
    }

    /// Install the highest version built for the configured SDK version
    pub async fn install_by_sdk_version(&mut self, id: &str) -> PmfResult<PackageState> {
        self.begin()?;
        self.install_guarded(id, AssetSelector::Sdk).await
    }

    /// Remove a package; returns whether it had a manifest entry
    pub fn uninstall(&mut self, id: &str) -> PmfResult<bool> {
        let removed = self.store_mut()?.remove_entry(id)?;

        if removed {
            self.notifier.info(Phase::Uninstall, id, "Package uninstalled");
        } else {
            self.notifier
                .info(Phase::Uninstall, id, "Package was not in the manifest");
        }
        Ok(removed)
    }

    /// Update an installed package to the highest published version
    pub async fn update_latest(&mut self, id: &str) -> PmfResult<PackageState> {
        self.begin()?;

        let Some(local) = self.installed_entry(id)? else {
            return Ok(PackageState::NotInstalled);
        };

        let Some(remote) = self.fetch_remote(id).await? else {
            return Ok(PackageState::NotExisting);
        };

        let Some(asset) = remote.latest_asset().cloned() else {
            self.notifier
                .info(Phase::Update, id, "No published versions available");
            return Ok(PackageState::VersionNotFound);
        };

        if is_at_version(&local, &asset.version) {
            self.notifier.info(Phase::Update, id, "Already up to date");
            return Ok(PackageState::UpToDate);
        }

        self.replace(&local, remote, asset).await
    }

    /// Update (or downgrade) an installed package to an exact version
    ///
    /// Returns `UpToDate` without contacting the registry when the package
    /// is already at `version`. The installed release is only removed once
    /// the requested one has been found.
    pub async fn update_package(&mut self, id: &str, version: &str) -> PmfResult<PackageState> {
        let version: Version = version.parse()?;
        self.begin()?;

        let Some(local) = self.installed_entry(id)? else {
            return Ok(PackageState::NotInstalled);
        };

        if is_at_version(&local, &version) {
            self.notifier.info(Phase::Update, id, "Already up to date");
            return Ok(PackageState::UpToDate);
        }

        let Some(remote) = self.fetch_remote(id).await? else {
            return Ok(PackageState::NotExisting);
        };

        let Some(asset) = remote.asset(&version).cloned() else {
            self.notifier.info(
                Phase::Update,
                id,
                format!("Version {version} not found, keeping installed release"),
            );
            return Ok(PackageState::VersionNotFound);
        };

        self.replace(&local, remote, asset).await
    }

    /// Update an installed package to the highest version for the configured SDK
    pub async fn update_by_sdk_version(&mut self, id: &str) -> PmfResult<PackageState> {
        self.begin()?;

        let Some(local) = self.installed_entry(id)? else {
            return Ok(PackageState::NotInstalled);
        };

        let Some(remote) = self.fetch_remote(id).await? else {
            return Ok(PackageState::NotExisting);
        };

        let Some(asset) = remote
            .latest_asset_for_sdk(&self.config.sdk_version)
            .cloned()
        else {
            self.notifier.info(
                Phase::Update,
                id,
                "Package doesn't exist for provided SDK version",
            );
            return Ok(PackageState::NotExisting);
        };

        if is_at_version(&local, &asset.version) {
            self.notifier.info(Phase::Update, id, "Already up to date");
            return Ok(PackageState::UpToDate);
        }

        self.replace(&local, remote, asset).await
    }

    fn store(&self) -> PmfResult<&ManifestStore> {
        self.manifest.as_ref().ok_or(PmfError::NotInitialized)
    }

    fn store_mut(&mut self) -> PmfResult<&mut ManifestStore> {
        self.manifest.as_mut().ok_or(PmfError::NotInitialized)
    }

    /// Entry point of every public install/update: fresh resolution chain
    fn begin(&mut self) -> PmfResult<()> {
        self.store()?;
        self.resolving.clear();
        Ok(())
    }

    fn check_installed(&self, id: &str) -> PmfResult<InstallCheck> {
        let check = self.store()?.is_installed(id)?;
        self.notifier.debug(
            Phase::CheckInstall,
            id,
            format!(
                "installed: {} ({})",
                check.installed,
                check.install_dir.display()
            ),
        );
        Ok(check)
    }

    fn installed_entry(&self, id: &str) -> PmfResult<Option<Package>> {
        let check = self.check_installed(id)?;
        if check.package.is_none() {
            self.notifier
                .info(Phase::CheckInstall, id, "Package not installed");
        }
        Ok(check.package)
    }

    /// Fetch remote metadata; absence and unreachability both yield `None`
    async fn fetch_remote(&self, id: &str) -> PmfResult<Option<Package>> {
        self.notifier
            .info(Phase::Fetch, id, "Downloading package information");

        match self.registry.fetch_package(id).await {
            Ok(Some(package)) if package.id != id => {
                self.notifier.warn(
                    Phase::Fetch,
                    id,
                    format!("Registry answered with package '{}'", package.id),
                );
                Ok(None)
            }
            Ok(Some(package)) => {
                if !package.is_valid() {
                    self.notifier
                        .debug(Phase::Fetch, id, "Package metadata is incomplete");
                }
                Ok(Some(package))
            }
            Ok(None) => {
                self.notifier
                    .info(Phase::Fetch, id, "Package does not exist in the registry");
                Ok(None)
            }
            Err(e) if e.is_transport() => {
                self.notifier.warn(
                    Phase::Fetch,
                    id,
                    format!("Couldn't download information from the server: {e}"),
                );
                Ok(None)
            }
            Err(e) => {
                self.notifier.error(Phase::Fetch, id, e.to_string());
                Err(e)
            }
        }
    }

    /// Push `id` on the resolution chain, refusing cycles and runaway depth
    fn enter(&mut self, id: &str) -> PmfResult<()> {
        if self.resolving.iter().any(|ancestor| ancestor == id) {
            let mut chain = self.resolving.clone();
            chain.push(id.to_string());
            let err = PmfError::CycleDetected { chain };
            self.notifier.error(Phase::Dependency, id, err.to_string());
            return Err(err);
        }

        if self.resolving.len() >= MAX_DEPENDENCY_DEPTH {
            let err = PmfError::DependencyTooDeep {
                depth: MAX_DEPENDENCY_DEPTH,
            };
            self.notifier.error(Phase::Dependency, id, err.to_string());
            return Err(err);
        }

        self.resolving.push(id.to_string());
        Ok(())
    }

    async fn install_guarded(&mut self, id: &str, selector: AssetSelector) -> PmfResult<PackageState> {
        self.enter(id)?;
        let result = self.install_selected(id, selector).await;
        self.resolving.pop();
        result
    }

    async fn install_selected(&mut self, id: &str, selector: AssetSelector) -> PmfResult<PackageState> {
        if self.check_installed(id)?.installed {
            self.notifier
                .info(Phase::CheckInstall, id, "Package already installed");
            return Ok(PackageState::AlreadyInstalled);
        }

        let Some(remote) = self.fetch_remote(id).await? else {
            return Ok(PackageState::NotExisting);
        };

        let Some(asset) = selector.select(&remote, &self.config.sdk_version).cloned() else {
            self.notifier.info(
                Phase::Fetch,
                id,
                format!(
                    "No asset published for {}",
                    selector.describe(&self.config.sdk_version)
                ),
            );
            return Ok(PackageState::VersionNotFound);
        };

        self.install_resolved(remote, asset).await
    }

    /// Stage `asset`, then swap it in for the installed release
    async fn replace(&mut self, local: &Package, remote: Package, asset: Asset) -> PmfResult<PackageState> {
        let id = local.id.as_str();
        let from = local
            .installed_asset()
            .map(|a| a.version.to_string())
            .unwrap_or_else(|| "?".to_string());
        self.notifier.info(
            Phase::Update,
            id,
            format!("Updating v{from} -> v{}", asset.version),
        );

        self.enter(id)?;
        let result = self.replace_entered(remote, asset).await;
        self.resolving.pop();
        result
    }

    async fn replace_entered(&mut self, remote: Package, asset: Asset) -> PmfResult<PackageState> {
        // The installed release stays until the new one is fully downloaded
        let Some(staging_dir) = self.stage(&remote, &asset).await else {
            return Ok(PackageState::Failed);
        };

        self.store_mut()?.remove_entry(&remote.id)?;
        self.extract_staged(remote, asset, &staging_dir).await
    }

    /// Download, extract and register a resolved asset
    async fn install_resolved(&mut self, package: Package, asset: Asset) -> PmfResult<PackageState> {
        match self.stage(&package, &asset).await {
            Some(staging_dir) => self.extract_staged(package, asset, &staging_dir).await,
            None => Ok(PackageState::Failed),
        }
    }

    /// Download every file of `asset`; `None` once the failure is reported
    async fn stage(&self, package: &Package, asset: &Asset) -> Option<PathBuf> {
        match registry::download_asset(
            self.registry.as_ref(),
            &self.config.temp_folder,
            &package.id,
            asset,
            &self.notifier,
        )
        .await
        {
            Ok(dir) => Some(dir),
            Err(e) => {
                self.notifier
                    .error(Phase::Download, &package.id, format!("Download failed: {e}"));
                None
            }
        }
    }

    async fn extract_staged(
        &mut self,
        package: Package,
        asset: Asset,
        staging_dir: &Path,
    ) -> PmfResult<PackageState> {
        let installer = Installer::new(
            self.config.install_root.clone(),
            self.extractor.clone(),
            self.notifier.clone(),
        );
        installer.install(self, package, asset, staging_dir).await
    }
}

fn is_at_version(local: &Package, version: &Version) -> bool {
    local
        .installed_asset()
        .is_some_and(|installed| installed.version == *version)
}

#[async_trait]
impl InstallContext for PackageManager {
    async fn install_dependency(&mut self, id: &str, version: &Version) -> PmfResult<PackageState> {
        self.install_guarded(id, AssetSelector::Exact(*version)).await
    }

    fn register(&mut self, package: Package, asset: Asset) -> PmfResult<()> {
        self.store_mut()?.record_installed(package, asset);
        Ok(())
    }
}

impl Drop for PackageManager {
    fn drop(&mut self) {
        if let Some(store) = self.manifest.take() {
            if let Err(e) = store.finalize() {
                tracing::warn!("Failed to persist manifest on drop: {}", e);
            }
        }
    }
}
