//! Archive extraction with path-escape protection.

mod extract;
mod path;
mod tar_gz;
mod zip_ops;

use std::path::Path;

use crate::error::{FleetError, Result};

use tar_gz::extract_tar_gz;
use zip_ops::extract_zip;

/// Extract a `.zip` or `.tar.gz` archive, picking the format from the file name.
pub(crate) fn extract_archive(archive_path: &Path, dest_dir: &Path, flatten: bool) -> Result<usize> {
    let name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if name.ends_with(".zip") {
        extract_zip(archive_path, dest_dir, flatten)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive_path, dest_dir, flatten)
    } else {
        Err(FleetError::io(format!(
            "unsupported archive format: {}",
            archive_path.display()
        )))
    }
}
