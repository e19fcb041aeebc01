use flate2::read::GzDecoder;
use std::fs::File;
use std::path::Path;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
#[error("extract error: {0}")]
pub struct ExtractError(pub String);

/// Extracts a tar.gz archive located at `archive_path` into the directory at
/// `destination_path`. Entries with a '..' in their path are skipped during
/// the unpacking process, so nothing is written outside the destination.
#[instrument(skip_all, fields(archive_path = %archive_path.to_string_lossy()), name = "extracting_archive")]
pub fn extract_tar_gz(archive_path: &Path, destination_path: &Path) -> Result<(), ExtractError> {
    debug!("Extracting tar.gz archive to '{:?}'", destination_path);

    let tar_gz =
        File::open(archive_path).map_err(|e| ExtractError(format!("opening tar.gz file: {e}")))?;
    let tar = GzDecoder::new(tar_gz);
    Archive::new(tar)
        .unpack(destination_path)
        .map_err(|e| ExtractError(format!("extracting tar.gz file: {e}")))
}
