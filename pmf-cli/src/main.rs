//! PMF - package manager for registry-hosted plugins, libraries and tools
//!
//! Thin command line host around `pmf_core::PackageManager`.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ReleaseArgs, Settings};

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "pmf",
    about = "Install, update and remove packages from a PMF registry",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Configuration file (defaults to the per-user config directory)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Override the directory packages are installed into
    #[clap(long, global = true)]
    install_root: Option<PathBuf>,

    /// Override the registry endpoint
    #[clap(long, global = true)]
    endpoint: Option<String>,

    /// Override the SDK version used by --sdk
    #[clap(long, global = true)]
    sdk_version: Option<String>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Install a package (latest version unless told otherwise)
    Install(ReleaseArgs),

    /// Update an installed package (latest version unless told otherwise)
    Update(ReleaseArgs),

    /// Remove an installed package
    Uninstall {
        /// Package id
        id: String,
    },

    /// List installed packages
    List {
        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },
}

/// Filter directive for `--log-level`, raised to `debug` by the config toggle
fn filter_directive(log_level: &LogLevel, debug: bool) -> &'static str {
    match log_level {
        LogLevel::Trace | LogLevel::Debug => log_level.to_filter_directive(),
        _ if debug => "debug",
        _ => log_level.to_filter_directive(),
    }
}

/// Initialize tracing; logs go to stderr so stdout stays parseable
///
/// `RUST_LOG` takes precedence over both flags.
fn initialize_tracing(log_level: &LogLevel, debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level, debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings {
        config_path: cli.config,
        install_root: cli.install_root,
        endpoint: cli.endpoint,
        sdk_version: cli.sdk_version,
    };

    // The config decides whether debug logging is on, so it loads first
    let config = commands::load_config(&settings)?;
    initialize_tracing(&cli.log_level, config.debug);
    tracing::debug!("Using configuration: {:?}", config);

    match cli.command {
        Command::Install(args) => commands::execute_install(config, args).await,
        Command::Update(args) => commands::execute_update(config, args).await,
        Command::Uninstall { id } => commands::execute_uninstall(config, &id),
        Command::List { json } => commands::execute_list(config, json),
    }
}
