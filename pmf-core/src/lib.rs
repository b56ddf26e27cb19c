//! PMF core library
//!
//! Queries a remote registry for package metadata, downloads the selected
//! release (plus its declared dependencies), extracts it under a local
//! install root and tracks installed packages in `manifest.json`.
//!
//! The entry point is [`PackageManager`].

pub mod archive;
pub mod config;
pub mod error;
pub mod events;
pub mod installer;
pub mod manager;
pub mod manifest;
pub mod package;
pub mod registry;

pub use config::PmfConfig;
pub use error::{PmfError, PmfResult};
pub use events::{ChannelObserver, EventLevel, PackageEvent, PackageObserver, Phase};
pub use manager::{PackageManager, PackageState};
pub use package::{Asset, Dependency, DependencyType, Package, PackageType, Version};
pub use registry::RegistryClient;

#[cfg(feature = "http")]
pub use registry::HttpRegistryClient;
