//! Download and install shared components.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt as _;
use reqwest::Client;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;

use super::types::Component;
use crate::archive::extract_archive;
use crate::config::ConfigStore;
use crate::download::download_file;
use crate::error::{FleetError, Result};
use crate::github::{branch_archive_url, fetch_latest_release, wrap_with_proxy, GitHubAsset};
use crate::paths::FleetPaths;
use crate::platform::{
    find_bepinex_asset, find_zip_asset, server_executable_name, steamcmd_download_url,
    steamcmd_executable_name,
};
use crate::task::join_guarded;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub const STAGE_DOWNLOADING: &str = "Downloading";
pub const STAGE_EXTRACTING: &str = "Extracting";
pub const STAGE_UPDATING: &str = "Updating";

/// Progress callback: `(stage, processed, total)`.
pub type ProgressFn = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

/// Installs shared components on disk.
pub trait Installer: Send + Sync {
    fn is_installed(&self, component: Component) -> bool;

    /// Install or update `component`, replacing what is there.
    fn install(&self, component: Component, progress: ProgressFn) -> BoxFuture<'_, Result<()>>;
}

/// Display names of components that still need installing.
/// The beta build only counts when some server runs the beta channel.
pub fn missing_components(installer: &dyn Installer, needs_beta: bool) -> Vec<String> {
    Component::all()
        .iter()
        .copied()
        .filter(|c| *c != Component::Beta || needs_beta)
        .filter(|c| !installer.is_installed(*c))
        .map(|c| c.display_name().to_string())
        .collect()
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

/// Parse a SteamCMD `progress: 12.34 (1234 / 10000)` line into `(done, total)`.
pub fn parse_steamcmd_progress(line: &str) -> Option<(u64, u64)> {
    let lower = line.to_ascii_lowercase();
    let idx = lower.find("progress:")?;
    let rest = &line[idx + "progress:".len()..];
    let open = rest.find('(')?;
    let close = rest[open..].find(')')? + open;
    let (done, total) = rest[open + 1..close].split_once('/')?;
    let done = done.trim().parse().ok()?;
    let total = total.trim().parse().ok()?;
    Some((done, total))
}

/// Installer backed by GitHub releases, SteamCMD and the network.
pub struct NativeInstaller {
    client: Client,
    paths: FleetPaths,
    config: Arc<ConfigStore>,
}

impl NativeInstaller {
    pub fn new(paths: FleetPaths, config: Arc<ConfigStore>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            paths,
            config,
        })
    }

    fn component_dir(&self, component: Component) -> PathBuf {
        match component {
            Component::SteamCmd => self.paths.steamcmd_dir(),
            Component::Release => self.paths.release_dir(),
            Component::Beta => self.paths.beta_dir(),
            Component::BepInEx => self.paths.bepinex_dir(),
            Component::LaunchPad => self.paths.launchpad_dir(),
            Component::ConsoleTool => self.paths.console_tool_dir(),
        }
    }

    async fn run(&self, component: Component, progress: ProgressFn) -> Result<()> {
        log::info!("Installing {}", component.display_name());
        match component {
            Component::SteamCmd => {
                let url = steamcmd_download_url();
                self.install_archive(component, url, false, &progress).await?;
                let exe = self.paths.steamcmd_dir().join(steamcmd_executable_name());
                if !exe.exists() {
                    return Err(FleetError::deploy(format!(
                        "SteamCMD extracted but {} is missing",
                        exe.display()
                    )));
                }
            }
            Component::Release => self.steam_app_update(component, "public", &progress).await?,
            Component::Beta => self.steam_app_update(component, "beta", &progress).await?,
            Component::BepInEx => {
                let (proxy, repo) = self.repo(|c| c.bepinex_repo.clone());
                let release = fetch_latest_release(&self.client, &proxy, &repo).await?;
                let asset = find_bepinex_asset(&release.assets).ok_or_else(|| {
                    FleetError::github(format!(
                        "no BepInEx asset for this platform in {}",
                        release.tag_name
                    ))
                })?;
                let url = wrap_with_proxy(&proxy, &asset.browser_download_url);
                self.install_archive(component, &url, false, &progress).await?;
            }
            Component::LaunchPad => {
                let (proxy, repo) = self.repo(|c| c.launchpad_repo.clone());
                let url = match self.latest_zip(&proxy, &repo).await {
                    Ok(asset) => wrap_with_proxy(&proxy, &asset.browser_download_url),
                    Err(e) => {
                        log::warn!("No LaunchPad release asset ({}), using main branch", e);
                        branch_archive_url(&proxy, &repo, "main")
                    }
                };
                self.install_archive(component, &url, true, &progress).await?;
            }
            Component::ConsoleTool => {
                let (proxy, repo) = self.repo(|c| c.console_tool_repo.clone());
                let asset = self.latest_zip(&proxy, &repo).await?;
                let url = wrap_with_proxy(&proxy, &asset.browser_download_url);
                self.install_archive(component, &url, false, &progress).await?;
            }
        }
        log::info!("{} installed", component.display_name());
        Ok(())
    }

    fn repo<F>(&self, pick: F) -> (String, String)
    where
        F: FnOnce(&crate::config::FleetConfig) -> String,
    {
        let config = self.config.load();
        (config.github_proxy.clone(), pick(&config))
    }

    async fn latest_zip(&self, proxy: &str, repo: &str) -> Result<GitHubAsset> {
        let release = fetch_latest_release(&self.client, proxy, repo).await?;
        find_zip_asset(&release.assets)
            .cloned()
            .ok_or_else(|| FleetError::github(format!("no .zip asset in {} {}", repo, release.tag_name)))
    }

    /// Download `url`, extract into a staging dir, then swap it into place.
    async fn install_archive(
        &self,
        component: Component,
        url: &str,
        flatten: bool,
        progress: &ProgressFn,
    ) -> Result<()> {
        let downloads = self.paths.downloads_dir();
        fs::create_dir_all(&downloads)?;

        let file_name = url
            .rsplit('/')
            .next()
            .filter(|n| n.ends_with(".zip") || n.ends_with(".tar.gz") || n.ends_with(".tgz"))
            .unwrap_or("download.zip");
        let archive = downloads.join(format!("{:?}-{}", component, file_name));

        let report = Arc::clone(progress);
        download_file(&self.client, url, &archive, move |done, total| {
            report(STAGE_DOWNLOADING, done, total);
        })
        .await?;

        progress(STAGE_EXTRACTING, 0, 0);
        let target = self.component_dir(component);
        let staging = downloads.join(format!("{:?}.staging", component));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        let archive_for_task = archive.clone();
        let staging_for_task = staging.clone();
        let handle = tokio::task::spawn_blocking(move || {
            extract_archive(&archive_for_task, &staging_for_task, flatten)
        });
        let extracted = join_guarded(handle, "extract").await?;
        progress(STAGE_EXTRACTING, extracted as u64, extracted as u64);

        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&staging, &target)?;

        if let Err(e) = fs::remove_file(&archive) {
            log::warn!("Failed to remove archive {}: {}", archive.display(), e);
        }
        Ok(())
    }

    async fn steam_app_update(
        &self,
        component: Component,
        branch: &str,
        progress: &ProgressFn,
    ) -> Result<()> {
        let steamcmd = self.paths.steamcmd_dir().join(steamcmd_executable_name());
        if !steamcmd.exists() {
            return Err(FleetError::component_missing(
                Component::SteamCmd.display_name(),
            ));
        }
        let target = self.component_dir(component);
        fs::create_dir_all(&target)?;
        let app_id = self.config.load().steam_app_id.clone();

        let mut cmd = Command::new(&steamcmd);
        cmd.arg("+force_install_dir")
            .arg(&target)
            .args(["+login", "anonymous", "+app_update", app_id.as_str(), "-beta", branch])
            .args(["validate", "+quit"])
            .current_dir(self.paths.steamcmd_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| FleetError::process(format!("Failed to start SteamCMD: {}", e)))?;

        progress(STAGE_UPDATING, 0, 0);
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    log::warn!("[steamcmd stderr] {}", line);
                }
            });
        }
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                log::debug!("[steamcmd] {}", line);
                if let Some((done, total)) = parse_steamcmd_progress(&line) {
                    progress(STAGE_UPDATING, done, total);
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| FleetError::process(format!("Failed to wait for SteamCMD: {}", e)))?;
        let exe = target.join(server_executable_name());
        if !status.success() {
            // SteamCMD reports odd exit codes after successful updates.
            if exe.exists() {
                log::warn!(
                    "SteamCMD exited with {:?} but {} is present",
                    status.code(),
                    component.display_name()
                );
            } else {
                return Err(FleetError::deploy(format!(
                    "SteamCMD failed for {} (exit code {:?})",
                    component.display_name(),
                    status.code()
                )));
            }
        }
        if !exe.exists() {
            return Err(FleetError::deploy(format!(
                "{} updated but {} is missing",
                component.display_name(),
                exe.display()
            )));
        }
        Ok(())
    }
}

impl Installer for NativeInstaller {
    fn is_installed(&self, component: Component) -> bool {
        let dir = self.component_dir(component);
        match component {
            Component::SteamCmd => dir.join(steamcmd_executable_name()).exists(),
            Component::Release | Component::Beta => dir.join(server_executable_name()).exists(),
            Component::BepInEx | Component::LaunchPad | Component::ConsoleTool => has_entries(&dir),
        }
    }

    fn install(&self, component: Component, progress: ProgressFn) -> BoxFuture<'_, Result<()>> {
        self.run(component, progress).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;

    #[test]
    fn steamcmd_progress_lines() {
        assert_eq!(
            parse_steamcmd_progress(
                " Update state (0x61) downloading, progress: 45.20 (1130000 / 2500000)"
            ),
            Some((1_130_000, 2_500_000))
        );
        assert_eq!(parse_steamcmd_progress("Success! App '600760' fully installed."), None);
        assert_eq!(parse_steamcmd_progress("progress: 1.0 (x / y)"), None);
    }

    #[test]
    fn installed_checks_follow_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = FleetPaths::new(tmp.path());
        let store = Arc::new(ConfigStore::with_config(
            tmp.path().join("fleet.toml"),
            FleetConfig::with_root(tmp.path()),
        ));
        let installer = NativeInstaller::new(paths.clone(), store).unwrap();

        assert!(!installer.is_installed(Component::Release));
        fs::create_dir_all(paths.release_dir()).unwrap();
        fs::write(paths.release_dir().join(server_executable_name()), b"").unwrap();
        assert!(installer.is_installed(Component::Release));

        fs::create_dir_all(paths.bepinex_dir()).unwrap();
        assert!(!installer.is_installed(Component::BepInEx));
        fs::write(paths.bepinex_dir().join("winhttp.dll"), b"").unwrap();
        assert!(installer.is_installed(Component::BepInEx));

        let missing = missing_components(&installer, false);
        assert_eq!(
            missing,
            vec!["SteamCMD", "Stationeers LaunchPad", "SCON"]
        );
        assert!(missing_components(&installer, true).contains(&"Stationeers Beta".to_string()));
    }
}
