//! Terminal outcome of a package manager operation

use std::fmt;

/// Outcome of an install or update call
///
/// Returned per call and never persisted. `NotInstalled` after an install
/// means "possibly partial": the package itself may be extracted and
/// recorded while one of its dependencies failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageState {
    // Local
    NotInstalled,
    UpToDate,
    Installed,
    AlreadyInstalled,

    // Remote
    NotExisting,
    VersionNotFound,

    // Common
    Failed,
}

impl PackageState {
    /// True when the package is present at the requested release afterwards
    pub fn is_satisfied(&self) -> bool {
        matches!(
            self,
            PackageState::Installed | PackageState::AlreadyInstalled | PackageState::UpToDate
        )
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageState::NotInstalled => "not installed",
            PackageState::UpToDate => "up to date",
            PackageState::Installed => "installed",
            PackageState::AlreadyInstalled => "already installed",
            PackageState::NotExisting => "not existing",
            PackageState::VersionNotFound => "version not found",
            PackageState::Failed => "failed",
        };
        f.write_str(s)
    }
}
