use std::fs;
use std::io;
use std::path::Path;

use crate::error::{FleetError, Result};

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| FleetError::io(format!("failed to set mode on {}: {}", path.display(), e)))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

pub(super) fn create_dir_entry(out_path: &Path) -> Result<()> {
    fs::create_dir_all(out_path)
        .map_err(|e| FleetError::io(format!("failed to create {}: {}", out_path.display(), e)))
}

/// Write one archive file entry, checking the byte count against the header.
pub(super) fn write_file_entry<R>(
    out_path: &Path,
    reader: &mut R,
    unix_mode: Option<u32>,
    declared_size: u64,
) -> Result<u64>
where
    R: io::Read,
{
    if let Some(parent) = out_path.parent() {
        create_dir_entry(parent)?;
    }

    let mut outfile = fs::File::create(out_path)
        .map_err(|e| FleetError::io(format!("failed to create {}: {}", out_path.display(), e)))?;
    let written = io::copy(reader, &mut outfile)?;
    if written != declared_size {
        return Err(FleetError::io(format!(
            "archive entry {} size mismatch: expected {} bytes, wrote {}",
            out_path.display(),
            declared_size,
            written
        )));
    }
    apply_mode(out_path, unix_mode)?;
    Ok(written)
}
