//! Package installation from staged downloads
//!
//! Extracts a package's primary archive to `{install_root}/{id}`, then
//! materializes each dependency: standalone archives are extracted to
//! `{install_root}/{id}/Dependencies/{dep_id}`, package dependencies are
//! installed through the package manager. Finally the package is recorded
//! in the manifest.
//!
//! Installation is not transactional. A failed dependency downgrades the
//! result to `NotInstalled` but the parent stays extracted and recorded.
//! A dependency cycle or an over-deep chain aborts the install and removes
//! the parent's freshly extracted directory, which is never recorded.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::ArchiveExtractor;
use crate::error::{ensure_path_component, PmfError, PmfResult};
use crate::events::{Notifier, Phase};
use crate::manager::PackageState;
use crate::package::{Asset, Dependency, DependencyType, Package, Version};

/// Name of the folder standalone dependencies are extracted into
pub const DEPENDENCIES_DIR: &str = "Dependencies";

/// Services the installer needs from the package manager
#[async_trait]
pub trait InstallContext: Send {
    /// Install a package dependency at an exact version
    async fn install_dependency(&mut self, id: &str, version: &Version) -> PmfResult<PackageState>;

    /// Record a package as installed at `asset`
    fn register(&mut self, package: Package, asset: Asset) -> PmfResult<()>;
}

/// Extracts staged archives and resolves dependencies
#[derive(Clone)]
pub struct Installer {
    install_root: PathBuf,
    extractor: Arc<dyn ArchiveExtractor>,
    notifier: Notifier,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("install_root", &self.install_root)
            .finish()
    }
}

impl Installer {
    pub fn new(
        install_root: PathBuf,
        extractor: Arc<dyn ArchiveExtractor>,
        notifier: Notifier,
    ) -> Self {
        Self {
            install_root,
            extractor,
            notifier,
        }
    }

    /// Get the installation directory for a package
    pub fn install_path(&self, id: &str) -> PathBuf {
        self.install_root.join(id)
    }

    /// Install `package` at `asset` from files staged in `staging_dir`
    ///
    /// Returns `Failed` if the primary archive cannot be extracted,
    /// `NotInstalled` if any dependency failed, `Installed` otherwise.
    /// Dependency cycles and over-deep chains abort with an error.
    pub async fn install<C>(
        &self,
        ctx: &mut C,
        package: Package,
        asset: Asset,
        staging_dir: &Path,
    ) -> PmfResult<PackageState>
    where
        C: InstallContext + ?Sized,
    {
        let id = package.id.clone();
        let install_dir = self.install_path(&id);

        self.notifier.info(
            Phase::Extract,
            &id,
            format!("Extracting {} to {}", asset.file_name, install_dir.display()),
        );
        let archive = staging_dir.join(&asset.file_name);
        if let Err(e) = self.extractor.extract(&archive, &install_dir) {
            self.notifier
                .error(Phase::Extract, &id, format!("Extraction failed: {e}"));
            return Ok(PackageState::Failed);
        }

        let mut failures = Vec::new();
        for dependency in &asset.dependencies {
            let outcome = match dependency.dependency_type {
                DependencyType::Standalone => {
                    self.extract_standalone(&id, dependency, &install_dir, staging_dir)
                }
                DependencyType::Package => self.install_nested(ctx, &id, dependency).await,
            };

            match outcome {
                Ok(()) => {}
                Err(e) if e.is_resolution_fatal() => {
                    self.discard(&id, &install_dir);
                    return Err(e);
                }
                Err(e) => {
                    self.notifier.error(
                        Phase::Dependency,
                        &id,
                        format!("Dependency '{}' failed: {e}", dependency.id),
                    );
                    failures.push(dependency.id.clone());
                }
            }
        }

        let version = asset.version;
        ctx.register(package, asset)?;

        if failures.is_empty() {
            self.notifier
                .info(Phase::Extract, &id, format!("Installed v{version}"));
            Ok(PackageState::Installed)
        } else {
            self.notifier.warn(
                Phase::Dependency,
                &id,
                format!(
                    "Installed v{version} with failed dependencies: {}",
                    failures.join(", ")
                ),
            );
            Ok(PackageState::NotInstalled)
        }
    }

    /// Remove an extracted but unrecorded package directory
    fn discard(&self, id: &str, install_dir: &Path) {
        if let Err(e) = std::fs::remove_dir_all(install_dir) {
            tracing::debug!(
                "Could not remove {} for {}: {}",
                install_dir.display(),
                id,
                e
            );
        }
    }

    fn extract_standalone(
        &self,
        parent_id: &str,
        dependency: &Dependency,
        install_dir: &Path,
        staging_dir: &Path,
    ) -> PmfResult<()> {
        ensure_path_component("dependency id", &dependency.id)?;

        let dest = install_dir.join(DEPENDENCIES_DIR).join(&dependency.id);
        self.notifier.info(
            Phase::Dependency,
            parent_id,
            format!("Extracting dependency with id: {}", dependency.id),
        );
        self.extractor
            .extract(&staging_dir.join(&dependency.file_name), &dest)
    }

    async fn install_nested<C>(
        &self,
        ctx: &mut C,
        parent_id: &str,
        dependency: &Dependency,
    ) -> PmfResult<()>
    where
        C: InstallContext + ?Sized,
    {
        let version = dependency.version.ok_or_else(|| {
            PmfError::invalid(
                "dependency version",
                format!("package dependency '{}' has no version", dependency.id),
            )
        })?;

        self.notifier.info(
            Phase::Dependency,
            parent_id,
            format!("Installing package dependency {}@{}", dependency.id, version),
        );

        match ctx.install_dependency(&dependency.id, &version).await? {
            PackageState::Installed | PackageState::AlreadyInstalled => Ok(()),
            state => Err(PmfError::invalid(
                "dependency",
                format!("{}@{} ended as {state}", dependency.id, version),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::TarGzExtractor;
    use crate::package::PackageType;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Context that answers dependency installs from a fixed table
    #[derive(Default)]
    struct TableContext {
        outcomes: HashMap<String, PackageState>,
        cycle_on: Option<String>,
        requested: Vec<String>,
        registered: Vec<Package>,
    }

    #[async_trait]
    impl InstallContext for TableContext {
        async fn install_dependency(
            &mut self,
            id: &str,
            version: &Version,
        ) -> PmfResult<PackageState> {
            self.requested.push(format!("{id}@{version}"));
            if self.cycle_on.as_deref() == Some(id) {
                return Err(PmfError::CycleDetected {
                    chain: vec!["app".to_string(), id.to_string(), "app".to_string()],
                });
            }
            Ok(self
                .outcomes
                .get(id)
                .copied()
                .unwrap_or(PackageState::NotExisting))
        }

        fn register(&mut self, mut package: Package, asset: Asset) -> PmfResult<()> {
            package.assets = vec![asset];
            self.registered.push(package);
            Ok(())
        }
    }

    fn write_tarball(path: &Path, file: &str) {
        let out = std::fs::File::create(path).unwrap();
        let encoder = GzEncoder::new(out, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        builder.append_data(&mut header, file, &b"ok"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn dependency(id: &str, kind: DependencyType, version: Option<&str>) -> Dependency {
        Dependency {
            id: id.to_string(),
            checksum: None,
            dependency_type: kind,
            version: version.map(|v| v.parse().unwrap()),
            file_name: format!("{id}.tar.gz"),
            url: format!("mock://{id}"),
        }
    }

    fn app(dependencies: Vec<Dependency>) -> (Package, Asset) {
        let asset = Asset {
            version: "1.0.0".parse().unwrap(),
            sdk_version: "1.0".to_string(),
            checksum: None,
            file_name: "app.tar.gz".to_string(),
            url: "mock://app".to_string(),
            dependencies,
        };
        let package = Package {
            id: "app".to_string(),
            package_type: PackageType::Plugin,
            name: "App".to_string(),
            author: "Tester".to_string(),
            description: "Test app".to_string(),
            assets: vec![asset.clone()],
        };
        (package, asset)
    }

    fn setup() -> (TempDir, Installer, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let staging = temp_dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        write_tarball(&staging.join("app.tar.gz"), "app.txt");
        write_tarball(&staging.join("data.tar.gz"), "data.txt");
        write_tarball(&staging.join("lib.tar.gz"), "lib.txt");

        let installer = Installer::new(
            temp_dir.path().join("packages"),
            Arc::new(TarGzExtractor),
            Notifier::default(),
        );
        (temp_dir, installer, staging)
    }

    #[tokio::test]
    async fn test_install_extracts_standalone_dependencies() {
        let (_temp, installer, staging) = setup();
        let (package, asset) = app(vec![dependency("data", DependencyType::Standalone, None)]);
        let mut ctx = TableContext::default();

        let state = installer
            .install(&mut ctx, package, asset, &staging)
            .await
            .unwrap();

        assert_eq!(state, PackageState::Installed);
        let root = installer.install_path("app");
        assert!(root.join("app.txt").exists());
        assert!(root.join(DEPENDENCIES_DIR).join("data").join("data.txt").exists());
        assert!(ctx.requested.is_empty());
        assert_eq!(ctx.registered.len(), 1);
        assert_eq!(ctx.registered[0].assets.len(), 1);
    }

    #[tokio::test]
    async fn test_package_dependency_goes_through_context() {
        let (_temp, installer, staging) = setup();
        let (package, asset) = app(vec![dependency("lib", DependencyType::Package, Some("1.0"))]);
        let mut ctx = TableContext::default();
        ctx.outcomes.insert("lib".to_string(), PackageState::Installed);

        let state = installer
            .install(&mut ctx, package, asset, &staging)
            .await
            .unwrap();

        assert_eq!(state, PackageState::Installed);
        assert_eq!(ctx.requested, vec!["lib@1.0".to_string()]);
        // Package dependencies are not extracted under the parent
        assert!(!installer.install_path("app").join(DEPENDENCIES_DIR).exists());
    }

    #[tokio::test]
    async fn test_failed_dependency_is_soft() {
        let (_temp, installer, staging) = setup();
        let (package, asset) = app(vec![
            dependency("missing", DependencyType::Package, Some("2.0")),
            dependency("data", DependencyType::Standalone, None),
        ]);
        let mut ctx = TableContext::default();

        let state = installer
            .install(&mut ctx, package, asset, &staging)
            .await
            .unwrap();

        assert_eq!(state, PackageState::NotInstalled);
        // Remaining dependencies were still processed and the parent recorded
        assert!(installer
            .install_path("app")
            .join(DEPENDENCIES_DIR)
            .join("data")
            .exists());
        assert_eq!(ctx.registered.len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_without_version_is_soft_failure() {
        let (_temp, installer, staging) = setup();
        let (package, asset) = app(vec![dependency("lib", DependencyType::Package, None)]);
        let mut ctx = TableContext::default();

        let state = installer
            .install(&mut ctx, package, asset, &staging)
            .await
            .unwrap();

        assert_eq!(state, PackageState::NotInstalled);
        assert!(ctx.requested.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_aborts_install() {
        let (_temp, installer, staging) = setup();
        let (package, asset) = app(vec![dependency("lib", DependencyType::Package, Some("1.0"))]);
        let mut ctx = TableContext {
            cycle_on: Some("lib".to_string()),
            ..Default::default()
        };

        let result = installer.install(&mut ctx, package, asset, &staging).await;

        assert!(matches!(result, Err(PmfError::CycleDetected { .. })));
        assert!(ctx.registered.is_empty());
        assert!(!installer.install_path("app").exists());
    }

    #[tokio::test]
    async fn test_missing_primary_archive_fails() {
        let (_temp, installer, staging) = setup();
        let (package, mut asset) = app(vec![]);
        asset.file_name = "absent.tar.gz".to_string();
        let mut ctx = TableContext::default();

        let state = installer
            .install(&mut ctx, package, asset, &staging)
            .await
            .unwrap();

        assert_eq!(state, PackageState::Failed);
        assert!(ctx.registered.is_empty());
    }
}
