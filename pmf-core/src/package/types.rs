//! Package, asset and dependency records
//!
//! Field names follow the registry's wire format (`ID`, `Name`, `Assets`, ...).

use serde::{Deserialize, Serialize};

use super::Version;
use crate::error::PmfResult;

/// Kind of installable package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PackageType {
    /// Sentinel for "no type"; a package with this type is invalid
    #[default]
    None,
    Plugin,
    Library,
    Tool,
    Asset,
    /// Any type this build does not know about
    #[serde(other)]
    Other,
}

/// How a dependency is materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DependencyType {
    /// A plain archive extracted under the parent's `Dependencies/` folder
    #[default]
    Standalone,
    /// A nested package installed through the package manager
    Package,
}

/// A file or nested package an asset requires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(rename = "ID")]
    pub id: String,

    /// Reserved, not verified
    #[serde(rename = "Checksum", default)]
    pub checksum: Option<String>,

    #[serde(rename = "Type", default)]
    pub dependency_type: DependencyType,

    /// Only meaningful when `dependency_type` is `Package`
    #[serde(rename = "Version", default)]
    pub version: Option<Version>,

    #[serde(rename = "FileName")]
    pub file_name: String,

    #[serde(rename = "Url")]
    pub url: String,
}

/// One downloadable release of a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Asset {
    pub version: Version,

    #[serde(default)]
    pub sdk_version: String,

    /// Reserved, not verified
    #[serde(default)]
    pub checksum: Option<String>,

    pub file_name: String,

    pub url: String,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// A uniquely identified installable artifact
///
/// Remote packages list every published asset; a package recorded in the
/// local manifest carries exactly one, the installed release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Type", default)]
    pub package_type: PackageType,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Author", default)]
    pub author: String,

    #[serde(rename = "Description", default)]
    pub description: String,

    #[serde(rename = "Assets", default)]
    pub assets: Vec<Asset>,
}

impl Package {
    /// Find the asset published for an exact version string
    ///
    /// An empty or malformed `version` is an `InvalidArgument` error; a
    /// well-formed version with no matching asset is `Ok(None)`.
    pub fn asset_for_version(&self, version: &str) -> PmfResult<Option<&Asset>> {
        let version: Version = version.parse()?;
        Ok(self.asset(&version))
    }

    /// Find the asset published for an exact version
    pub fn asset(&self, version: &Version) -> Option<&Asset> {
        self.assets.iter().find(|a| a.version == *version)
    }

    /// Asset with the highest version; the first one listed wins ties
    pub fn latest_asset(&self) -> Option<&Asset> {
        latest(self.assets.iter())
    }

    /// Highest-versioned asset built for the given SDK version
    pub fn latest_asset_for_sdk(&self, sdk_version: &str) -> Option<&Asset> {
        latest(self.assets.iter().filter(|a| a.sdk_version == sdk_version))
    }

    /// The installed release of a local package
    pub fn installed_asset(&self) -> Option<&Asset> {
        self.assets.first()
    }

    /// A valid package has an id, a type, a name, an author and a description
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && self.package_type != PackageType::None
            && !self.name.is_empty()
            && !self.author.is_empty()
            && !self.description.is_empty()
    }
}

fn latest<'a>(assets: impl Iterator<Item = &'a Asset>) -> Option<&'a Asset> {
    assets.fold(None, |best: Option<&Asset>, asset| match best {
        Some(b) if b.version >= asset.version => Some(b),
        _ => Some(asset),
    })
}
