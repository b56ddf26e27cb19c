//! PMF CLI commands
//!
//! Each command takes the resolved configuration, starts a package manager,
//! runs one operation and stops the manager so the manifest is persisted.

use anyhow::{bail, Context, Result};
use clap::Args;
use directories::ProjectDirs;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use pmf_core::{EventLevel, PackageEvent, PackageManager, PackageState, PmfConfig};

/// Global overrides collected from the command line
#[derive(Debug, Default)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub install_root: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub sdk_version: Option<String>,
}

/// Which release of a package to install or update to
#[derive(Args, Debug)]
pub struct ReleaseArgs {
    /// Package id
    pub id: String,

    /// Exact version (e.g., 1.2.0)
    #[clap(long, conflicts_with_all = ["latest", "sdk"])]
    pub version: Option<String>,

    /// Highest published version (default)
    #[clap(long, conflicts_with = "sdk")]
    pub latest: bool,

    /// Highest version built for the configured SDK version
    #[clap(long)]
    pub sdk: bool,
}

enum Selection<'a> {
    Exact(&'a str),
    Latest,
    Sdk,
}

impl ReleaseArgs {
    fn selection(&self) -> Selection<'_> {
        match (&self.version, self.sdk) {
            (Some(version), _) => Selection::Exact(version),
            (None, true) => Selection::Sdk,
            (None, false) => Selection::Latest,
        }
    }
}

/// Default config file location, e.g. `~/.config/pmf/config.yaml` on Linux
fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "pmf").map(|dirs| dirs.config_dir().join("config.yaml"))
}

/// Load the config file and apply command line overrides
pub fn load_config(settings: &Settings) -> Result<PmfConfig> {
    let path = settings.config_path.clone().or_else(default_config_path);

    let mut config = match &path {
        Some(path) => PmfConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PmfConfig::default(),
    };

    if let Some(root) = &settings.install_root {
        config.install_root = root.clone();
    }
    if let Some(endpoint) = &settings.endpoint {
        config.registry_endpoint = endpoint.clone();
    }
    if let Some(sdk_version) = &settings.sdk_version {
        config.sdk_version = sdk_version.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_event(event: &PackageEvent) {
    match event.level {
        EventLevel::Debug => println!("  {event}"),
        EventLevel::Info => println!("{event}"),
        EventLevel::Warn => println!("warning: {event}"),
        EventLevel::Error => println!("error: {event}"),
    }
}

/// Start a manager; `verbose` prints its progress events to stdout
fn open_manager(config: PmfConfig, verbose: bool) -> Result<PackageManager> {
    let mut manager =
        PackageManager::from_config(config).context("Failed to create package manager")?;
    if verbose {
        manager.subscribe(Arc::new(print_event));
    }
    manager.start().context("Failed to load the manifest")?;
    Ok(manager)
}

fn report(id: &str, state: PackageState) -> Result<()> {
    if state.is_satisfied() {
        println!("\n{id}: {state}");
        Ok(())
    } else {
        bail!("{id}: {state}")
    }
}

fn require_sdk(config: &PmfConfig) -> Result<()> {
    if config.sdk_version.is_empty() {
        bail!("--sdk needs an SDK version; set sdk_version in the config or pass --sdk-version");
    }
    Ok(())
}

pub async fn execute_install(config: PmfConfig, args: ReleaseArgs) -> Result<()> {
    if matches!(args.selection(), Selection::Sdk) {
        require_sdk(&config)?;
    }

    let mut manager = open_manager(config, true)?;
    let state = match args.selection() {
        Selection::Exact(version) => manager.install(&args.id, version).await,
        Selection::Latest => manager.install_latest(&args.id).await,
        Selection::Sdk => manager.install_by_sdk_version(&args.id).await,
    }
    .with_context(|| format!("Failed to install '{}'", args.id))?;
    manager.stop()?;

    report(&args.id, state)
}

pub async fn execute_update(config: PmfConfig, args: ReleaseArgs) -> Result<()> {
    if matches!(args.selection(), Selection::Sdk) {
        require_sdk(&config)?;
    }

    let mut manager = open_manager(config, true)?;
    let state = match args.selection() {
        Selection::Exact(version) => manager.update_package(&args.id, version).await,
        Selection::Latest => manager.update_latest(&args.id).await,
        Selection::Sdk => manager.update_by_sdk_version(&args.id).await,
    }
    .with_context(|| format!("Failed to update '{}'", args.id))?;
    manager.stop()?;

    report(&args.id, state)
}

pub fn execute_uninstall(config: PmfConfig, id: &str) -> Result<()> {
    let mut manager = open_manager(config, false)?;

    let removed = manager.uninstall(id)?;
    manager.stop()?;

    if removed {
        println!("Uninstalled '{id}'");
    } else {
        println!("Package '{id}' is not installed.");
    }
    Ok(())
}

/// Table row for installed packages
#[derive(Tabled)]
struct InstalledRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    package_type: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "SDK")]
    sdk_version: String,
}

pub fn execute_list(config: PmfConfig, json_output: bool) -> Result<()> {
    let mut manager = open_manager(config, false)?;
    let packages = manager.list_installed()?.to_vec();
    manager.stop()?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&packages)?);
        return Ok(());
    }

    if packages.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }

    let table_rows: Vec<InstalledRow> = packages
        .iter()
        .map(|package| {
            let asset = package.installed_asset();
            InstalledRow {
                id: package.id.clone(),
                name: package.name.clone(),
                package_type: format!("{:?}", package.package_type),
                version: asset
                    .map(|a| format!("v{}", a.version))
                    .unwrap_or_else(|| "-".to_string()),
                sdk_version: asset.map(|a| a.sdk_version.clone()).unwrap_or_default(),
            }
        })
        .collect();

    let table = Table::new(&table_rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();

    println!("Installed packages:\n");
    println!("{table}");

    Ok(())
}
