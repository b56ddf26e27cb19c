//! Test helper functions for integration tests
//!
//! Shared across test files using the tests/common/ pattern. Provides an
//! in-memory registry serving package metadata and gzip tarballs, and a
//! manager wired to it inside a temporary directory.

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use pmf_core::{
    Asset, Dependency, DependencyType, Package, PackageManager, PackageType, PmfConfig, PmfError,
    PmfResult, RegistryClient,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Build a gzip tarball holding the given files
pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let encoder = GzEncoder::new(&mut bytes, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }
    bytes
}

pub fn package_dependency(id: &str, version: &str) -> Dependency {
    Dependency {
        id: id.to_string(),
        checksum: None,
        dependency_type: DependencyType::Package,
        version: Some(version.parse().unwrap()),
        file_name: format!("{id}-dep.tar.gz"),
        url: format!("mock://deps/{id}"),
    }
}

pub fn standalone_dependency(id: &str) -> Dependency {
    Dependency {
        id: id.to_string(),
        checksum: None,
        dependency_type: DependencyType::Standalone,
        version: None,
        file_name: format!("{id}-dep.tar.gz"),
        url: format!("mock://deps/{id}"),
    }
}

/// In-memory registry counting every network call
#[derive(Default)]
pub struct MockRegistry {
    packages: Mutex<HashMap<String, Package>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
    downloads: AtomicUsize,
    offline: AtomicBool,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish a release of `id`; the archive contains `{id}.txt` holding the version
    pub fn release(&self, id: &str, version: &str, sdk: &str, dependencies: Vec<Dependency>) {
        let asset = Asset {
            version: version.parse().unwrap(),
            sdk_version: sdk.to_string(),
            checksum: None,
            file_name: format!("{id}-{version}.tar.gz"),
            url: format!("mock://assets/{id}/{version}"),
            dependencies,
        };

        let primary = format!("{id}.txt");
        self.serve(&asset.url, tarball(&[(primary.as_str(), version)]));
        for dependency in &asset.dependencies {
            let name = format!("{}.txt", dependency.id);
            self.serve(&dependency.url, tarball(&[(name.as_str(), "dependency")]));
        }

        let mut packages = self.packages.lock().unwrap();
        let package = packages.entry(id.to_string()).or_insert_with(|| Package {
            id: id.to_string(),
            package_type: PackageType::Plugin,
            name: id.to_uppercase(),
            author: "Registry Tester".to_string(),
            description: format!("The {id} package"),
            assets: Vec::new(),
        });
        package.assets.push(asset);
    }

    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn withdraw_file(&self, url: &str) {
        self.files.lock().unwrap().remove(url);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.fetch_count() + self.download_count()
    }

    fn check_online(&self, url: &str) -> PmfResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PmfError::Timeout {
                url: url.to_string(),
                timeout_secs: 30,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn fetch_package(&self, id: &str) -> PmfResult<Option<Package>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_online(&format!("mock://registry/{id}"))?;
        Ok(self.packages.lock().unwrap().get(id).cloned())
    }

    async fn download(&self, url: &str, dest: &Path) -> PmfResult<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.check_online(url)?;

        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PmfError::Transport {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })?;

        std::fs::write(dest, &bytes).map_err(|e| PmfError::io(dest, e))?;
        Ok(bytes.len() as u64)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// A started manager rooted in a temp dir, plus its registry
///
/// Field order matters: the manager persists on drop, before the temp dir goes.
pub struct TestEnv {
    pub manager: PackageManager,
    pub registry: Arc<MockRegistry>,
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new(sdk_version: &str) -> Self {
        init_test_logging();

        let dir = TempDir::new().unwrap();
        let registry = MockRegistry::new();
        let mut manager = PackageManager::new(
            Self::config(dir.path(), sdk_version),
            registry.clone() as Arc<dyn RegistryClient>,
        );
        manager.start().unwrap();

        Self {
            manager,
            registry,
            dir,
        }
    }

    pub fn config(root: &Path, sdk_version: &str) -> PmfConfig {
        PmfConfig::new("http://registry.test/package")
            .with_sdk_version(sdk_version)
            .with_debug(true)
            .rooted_at(root)
    }

    pub fn install_dir(&self, id: &str) -> std::path::PathBuf {
        self.manager.config().install_dir(id)
    }

    /// Version recorded in the manifest for `id`
    pub fn installed_version(&self, id: &str) -> Option<String> {
        self.manager
            .list_installed()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.assets[0].version.to_string())
    }
}
