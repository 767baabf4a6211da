use std::fs;
use std::path::Path;

use crate::error::{FleetError, Result};

use super::extract::{create_dir_entry, write_file_entry};
use super::path::{parse_entry_rel_path, resolve_within_dir, strip_top_dir, TopDirScan};

fn open_archive(archive_path: &Path) -> Result<tar::Archive<flate2::read::GzDecoder<fs::File>>> {
    let file = fs::File::open(archive_path)?;
    Ok(tar::Archive::new(flate2::read::GzDecoder::new(file)))
}

fn entry_name<R: std::io::Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let path = entry.path()?;
    path.to_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| FleetError::io(format!("archive entry path is not valid UTF-8: {:?}", path)))
}

fn scan_top_dir(archive_path: &Path) -> Result<Option<String>> {
    let mut archive = open_archive(archive_path)?;
    let mut scan = TopDirScan::default();
    for entry in archive.entries()? {
        let entry = entry?;
        scan.observe(&entry_name(&entry)?);
    }
    Ok(scan.finish())
}

/// Extract a gzip-compressed tarball into `dest_dir`.
///
/// Same flattening rule as the zip variant. Symlinks and hard links are
/// skipped. Returns the number of files written.
pub(crate) fn extract_tar_gz(archive_path: &Path, dest_dir: &Path, flatten: bool) -> Result<usize> {
    fs::create_dir_all(dest_dir)?;
    let top_dir = if flatten {
        scan_top_dir(archive_path)?
    } else {
        None
    };

    let mut archive = open_archive(archive_path)?;
    let mut files = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_name = entry_name(&entry)?;

        if parse_entry_rel_path(&raw_name).is_none() {
            return Err(FleetError::io(format!(
                "archive contains unsafe entry path: {raw_name:?}"
            )));
        }
        let Some(relative) = strip_top_dir(&raw_name, top_dir.as_deref()) else {
            continue;
        };
        let out_path = resolve_within_dir(dest_dir, &relative)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            create_dir_entry(&out_path)?;
        } else if entry_type.is_file() {
            let mode = entry.header().mode().ok();
            let size = entry.header().size()?;
            write_file_entry(&out_path, &mut entry, mode, size)?;
            files += 1;
        } else if entry_type.is_symlink() || entry_type.is_hard_link() {
            log::warn!("Skipping link {:?} in {}", raw_name, archive_path.display());
        } else {
            return Err(FleetError::io(format!(
                "unsupported tar entry type at {raw_name:?}: {entry_type:?}"
            )));
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, *body).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extracts_flat_steamcmd_layout() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("steamcmd_linux.tar.gz");
        build_tar_gz(
            &archive,
            &[("steamcmd.sh", b"#!/bin/sh\n"), ("linux32/steamcmd", b"bin")],
        );
        let dest = dir.path().join("steamcmd");

        let written = extract_tar_gz(&archive, &dest, true).unwrap();

        assert_eq!(written, 2);
        assert!(dest.join("steamcmd.sh").exists());
        assert!(dest.join("linux32/steamcmd").exists());
    }

    #[cfg(unix)]
    #[test]
    fn keeps_executable_bit() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("tool.tar.gz");
        build_tar_gz(&archive, &[("tool/run.sh", b"echo")]);
        let dest = dir.path().join("out");

        extract_tar_gz(&archive, &dest, true).unwrap();

        let mode = fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
