use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{FleetError, Result};

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Convert an archive entry name to a relative path.
///
/// Returns `None` for empty names, absolute names, drive-prefixed names and
/// anything containing a `..` segment.
pub(crate) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Canonicalize the longest existing prefix of a path and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut current = path.to_path_buf();
    let mut missing: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match current.canonicalize() {
            Ok(mut canonical) => {
                for part in missing.into_iter().rev() {
                    canonical.push(part);
                }
                return Ok(canonical);
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                let Some(name) = current.file_name().map(ToOwned::to_owned) else {
                    return Err(FleetError::io(format!(
                        "cannot resolve {}: reached filesystem root",
                        path.display()
                    )));
                };
                missing.push(name);
                current.pop();
            }
            Err(error) => {
                return Err(FleetError::io(format!(
                    "cannot resolve {}: {}",
                    current.display(),
                    error
                )));
            }
        }
    }
}

/// Resolve `relative` under `base_dir`, failing if the result escapes it.
pub(super) fn resolve_within_dir(base_dir: &Path, relative: &Path) -> Result<PathBuf> {
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(FleetError::io(format!(
            "archive entry {} is not a plain relative path",
            relative.display()
        )));
    }

    let canonical_base = base_dir
        .canonicalize()
        .map_err(|e| FleetError::io(format!("cannot resolve {}: {}", base_dir.display(), e)))?;
    let candidate = canonicalize_existing_prefix(&canonical_base.join(relative))?;

    if !candidate.starts_with(&canonical_base) {
        return Err(FleetError::io(format!(
            "archive entry {} escapes {}",
            relative.display(),
            base_dir.display()
        )));
    }

    Ok(candidate)
}

/// Tracks whether every entry of an archive lives under one top-level directory.
#[derive(Debug, Default)]
pub(super) struct TopDirScan {
    candidate: Option<String>,
    nested: bool,
    mixed: bool,
}

impl TopDirScan {
    pub(super) fn observe(&mut self, raw: &str) {
        if self.mixed {
            return;
        }
        let Some(relative) = parse_entry_rel_path(raw) else {
            return;
        };
        let mut parts = relative.components();
        let Some(first) = parts.next().and_then(|c| c.as_os_str().to_str()) else {
            self.mixed = true;
            return;
        };
        if parts.next().is_some() {
            self.nested = true;
        }
        match self.candidate.as_deref() {
            None => self.candidate = Some(first.to_string()),
            Some(existing) if existing == first => {}
            Some(_) => self.mixed = true,
        }
    }

    /// The shared top-level directory, if there is exactly one and it holds nested entries.
    pub(super) fn finish(self) -> Option<String> {
        if self.mixed || !self.nested {
            None
        } else {
            self.candidate
        }
    }
}

/// Map an entry name to its path below the destination, dropping `top_dir` when set.
/// Returns `None` for the top directory entry itself and for unsafe names.
pub(super) fn strip_top_dir(raw: &str, top_dir: Option<&str>) -> Option<PathBuf> {
    let relative = parse_entry_rel_path(raw)?;
    let Some(top) = top_dir else {
        return Some(relative);
    };
    let stripped = relative.strip_prefix(top).ok()?;
    if stripped.as_os_str().is_empty() {
        None
    } else {
        Some(stripped.to_path_buf())
    }
}
