use std::fs;
use std::path::Path;

use crate::error::{FleetError, Result};

use super::extract::{create_dir_entry, write_file_entry};
use super::path::{parse_entry_rel_path, resolve_within_dir, strip_top_dir, TopDirScan};

/// Extract a zip archive into `dest_dir`.
///
/// When `flatten` is set and every entry shares one top-level directory, that
/// directory is dropped. Returns the number of files written.
pub(crate) fn extract_zip(archive_path: &Path, dest_dir: &Path, flatten: bool) -> Result<usize> {
    fs::create_dir_all(dest_dir)?;
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let top_dir = if flatten {
        let mut scan = TopDirScan::default();
        for name in archive.file_names() {
            scan.observe(name);
        }
        scan.finish()
    } else {
        None
    };

    let mut files = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw_name = entry.name().to_string();

        if parse_entry_rel_path(&raw_name).is_none() {
            return Err(FleetError::io(format!(
                "archive contains unsafe zip path: {raw_name:?}"
            )));
        }
        let Some(relative) = strip_top_dir(&raw_name, top_dir.as_deref()) else {
            continue;
        };
        let out_path = resolve_within_dir(dest_dir, &relative)?;

        if entry.is_symlink() {
            log::warn!("Skipping symlink {:?} in {}", raw_name, archive_path.display());
        } else if entry.is_dir() {
            create_dir_entry(&out_path)?;
        } else {
            let mode = entry.unix_mode();
            let size = entry.size();
            write_file_entry(&out_path, &mut entry, mode, size)?;
            files += 1;
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn build_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn flattens_single_top_dir() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("launchpad.zip");
        build_zip(
            &archive,
            &[
                ("StationeersLaunchPad-main/LaunchPad.dll", "dll"),
                ("StationeersLaunchPad-main/cfg/settings.cfg", "cfg"),
            ],
        );
        let dest = dir.path().join("out");

        let written = extract_zip(&archive, &dest, true).unwrap();

        assert_eq!(written, 2);
        assert_eq!(fs::read_to_string(dest.join("LaunchPad.dll")).unwrap(), "dll");
        assert!(dest.join("cfg/settings.cfg").exists());
    }

    #[test]
    fn keeps_layout_without_flatten() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bepinex.zip");
        build_zip(
            &archive,
            &[("BepInEx/core/BepInEx.dll", "core"), ("BepInEx/config/a.cfg", "a")],
        );
        let dest = dir.path().join("out");

        extract_zip(&archive, &dest, false).unwrap();

        assert!(dest.join("BepInEx/core/BepInEx.dll").exists());
    }
}
