//! Server file deployment: copy the shared game build and mods into a server's game dir.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::supervisor::ServerSupervisor;
use crate::component::Component;
use crate::error::{FleetError, Result};
use crate::paths::FleetPaths;

pub const STAGE_PREPARING: &str = "Preparing files";
pub const STAGE_COPYING: &str = "Copying files";

/// Written to `deploy.json` after every successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySnapshot {
    pub channel: String,
    pub files_total: u64,
    pub files_copied: u64,
    pub deployed_at: DateTime<Utc>,
}

struct CopyPlan {
    from: PathBuf,
    to: PathBuf,
}

/// The snapshot of the last successful deploy of server `id`, if any.
pub fn read_deploy_snapshot(paths: &FleetPaths, id: u32) -> Option<DeploySnapshot> {
    let bytes = fs::read(paths.server_deploy_snapshot(id)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Channel name the server's files are built from.
pub fn channel_name(beta: bool) -> &'static str {
    if beta {
        "beta"
    } else {
        "release"
    }
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

fn count_files(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .count() as u64
}

fn modified(meta: &fs::Metadata) -> Option<SystemTime> {
    meta.modified().ok()
}

/// A file is copied when the target is missing, differs in size, or is older.
fn needs_copy(src: &fs::Metadata, dst: &Path) -> bool {
    let Ok(dst_meta) = fs::metadata(dst) else {
        return true;
    };
    if src.len() != dst_meta.len() {
        return true;
    }
    match (modified(src), modified(&dst_meta)) {
        (Some(s), Some(d)) => s > d,
        _ => true,
    }
}

fn copy_tree<F>(plan: &CopyPlan, force: bool, on_file: &mut F) -> Result<u64>
where
    F: FnMut(),
{
    let mut copied = 0u64;
    for entry in WalkDir::new(&plan.from).min_depth(1) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(&plan.from)
            .map_err(|e| FleetError::io(e.to_string()))?;
        let target = plan.to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let meta = entry.metadata()?;
        if force || needs_copy(&meta, &target) {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).map_err(|e| {
                FleetError::io(format!("Failed to copy {}: {}", entry.path().display(), e))
            })?;
            copied += 1;
        }
        on_file();
    }
    Ok(copied)
}

/// Lay out the game files for server `id` from the installed shared components.
///
/// Every file is rewritten when the previous deploy came from the other channel.
///
/// The game build for the selected channel and BepInEx are required; LaunchPad
/// and the console tool are copied when installed.
pub fn deploy_server_files(
    paths: &FleetPaths,
    id: u32,
    beta: bool,
    report: &dyn Fn(&str, u64, u64),
) -> Result<DeploySnapshot> {
    let channel = channel_name(beta);
    let (game_component, game_src) = if beta {
        (Component::Beta, paths.beta_dir())
    } else {
        (Component::Release, paths.release_dir())
    };
    if !has_entries(&game_src) {
        return Err(FleetError::component_missing(game_component.display_name()));
    }
    let bepinex = paths.bepinex_dir();
    if !has_entries(&bepinex) {
        return Err(FleetError::component_missing(
            Component::BepInEx.display_name(),
        ));
    }

    let game_dir = paths.server_game_dir(id);
    let plugins_dir = game_dir.join("BepInEx").join("plugins");
    fs::create_dir_all(&game_dir)?;
    fs::create_dir_all(paths.server_logs_dir(id))?;

    let mut plans = vec![
        CopyPlan {
            from: game_src,
            to: game_dir.clone(),
        },
        CopyPlan {
            from: bepinex,
            to: game_dir,
        },
    ];
    let launchpad = paths.launchpad_dir();
    if has_entries(&launchpad) {
        plans.push(CopyPlan {
            from: launchpad,
            to: plugins_dir.join("StationeersLaunchPad"),
        });
    }
    let console_tool = paths.console_tool_dir();
    if has_entries(&console_tool) {
        plans.push(CopyPlan {
            from: console_tool,
            to: plugins_dir,
        });
    }

    let switched = read_deploy_snapshot(paths, id).is_some_and(|s| s.channel != channel);
    if switched {
        log::info!("Server {} switched to the {} channel, rewriting all files", id, channel);
    }

    let total: u64 = plans.iter().map(|p| count_files(&p.from)).sum();
    report(STAGE_PREPARING, 0, total);

    let mut processed = 0u64;
    let mut copied = 0u64;
    for plan in &plans {
        copied += copy_tree(plan, switched, &mut || {
            processed += 1;
            report(STAGE_COPYING, processed, total);
        })?;
    }

    let snapshot = DeploySnapshot {
        channel: channel.to_string(),
        files_total: total,
        files_copied: copied,
        deployed_at: Utc::now(),
    };
    let snapshot_path = paths.server_deploy_snapshot(id);
    match serde_json::to_vec_pretty(&snapshot) {
        Ok(bytes) => {
            if let Err(e) = fs::write(&snapshot_path, bytes) {
                log::warn!("Failed to write {}: {}", snapshot_path.display(), e);
            }
        }
        Err(e) => log::warn!("Failed to serialize deploy snapshot: {}", e),
    }

    log::info!(
        "Server {} deployed from {} ({} of {} files copied)",
        id,
        channel,
        copied,
        total
    );
    Ok(snapshot)
}

impl ServerSupervisor {
    /// Redeploy this server's files from the channel in its current settings.
    /// Blocking; run state is left untouched.
    pub fn deploy(&self, report: &dyn Fn(&str, u64, u64)) -> Result<DeploySnapshot> {
        let beta = self.settings().beta;
        deploy_server_files(&self.ctx().paths, self.id(), beta, report)
    }
}
