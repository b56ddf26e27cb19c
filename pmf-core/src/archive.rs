//! Archive extraction
//!
//! The installer only needs "unpack this file into that directory"; the
//! [`ArchiveExtractor`] trait keeps the format swappable and testable.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{PmfError, PmfResult};

/// Unpacks a downloaded archive into a directory
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `dest`, creating `dest` if needed
    fn extract(&self, archive: &Path, dest: &Path) -> PmfResult<()>;
}

/// Extractor for gzip-compressed tarballs
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzExtractor;

impl ArchiveExtractor for TarGzExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> PmfResult<()> {
        let file = File::open(archive).map_err(|e| PmfError::io(archive, e))?;

        std::fs::create_dir_all(dest).map_err(|e| PmfError::io(dest, e))?;

        let gz_decoder = flate2::read::GzDecoder::new(BufReader::new(file));
        let mut tarball = tar::Archive::new(gz_decoder);

        tarball.unpack(dest).map_err(|e| PmfError::Extraction {
            archive: archive.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
