//! Catalog model
//!
//! Pure data and query layer for packages, their released assets and the
//! dependencies each asset declares. Instances are rebuilt per call from the
//! registry's JSON or from the local manifest.

mod types;
mod version;

pub use types::{Asset, Dependency, DependencyType, Package, PackageType};
pub use version::Version;
