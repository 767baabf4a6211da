//! Centralized path layout for the fleet data directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FleetError, Result};
use crate::platform::server_executable_name;

/// File the game writes its own log to, inside each server's logs dir.
pub const SERVER_OUTPUT_LOG: &str = "output.log";

/// Every on-disk location derived from the fleet root directory.
#[derive(Debug, Clone)]
pub struct FleetPaths {
    root: PathBuf,
}

impl FleetPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure all shared directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [
            self.root.clone(),
            self.steamcmd_dir(),
            self.release_dir(),
            self.beta_dir(),
            self.bepinex_dir(),
            self.launchpad_dir(),
            self.console_tool_dir(),
            self.servers_dir(),
            self.downloads_dir(),
        ];
        for dir in &dirs {
            fs::create_dir_all(dir)
                .map_err(|e| FleetError::io(format!("{}: {}", dir.display(), e)))?;
        }
        Ok(())
    }

    pub fn roster_path(&self) -> PathBuf {
        self.root.join("servers.json")
    }

    /// Scratch space for downloads and staged extractions.
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn steamcmd_dir(&self) -> PathBuf {
        self.root.join("steamcmd")
    }

    pub fn release_dir(&self) -> PathBuf {
        self.root.join("release")
    }

    pub fn beta_dir(&self) -> PathBuf {
        self.root.join("beta")
    }

    pub fn bepinex_dir(&self) -> PathBuf {
        self.root.join("bepinex")
    }

    pub fn launchpad_dir(&self) -> PathBuf {
        self.root.join("launchpad")
    }

    pub fn console_tool_dir(&self) -> PathBuf {
        self.root.join("scon")
    }

    pub fn servers_dir(&self) -> PathBuf {
        self.root.join("servers")
    }

    pub fn server_dir(&self, id: u32) -> PathBuf {
        self.servers_dir().join(id.to_string())
    }

    pub fn server_game_dir(&self, id: u32) -> PathBuf {
        self.server_dir(id).join("game")
    }

    pub fn server_logs_dir(&self, id: u32) -> PathBuf {
        self.server_dir(id).join("logs")
    }

    pub fn server_output_file(&self, id: u32) -> PathBuf {
        self.server_logs_dir(id).join(SERVER_OUTPUT_LOG)
    }

    pub fn server_settings_file(&self, id: u32) -> PathBuf {
        self.server_dir(id).join("settings.xml")
    }

    pub fn server_deploy_snapshot(&self, id: u32) -> PathBuf {
        self.server_dir(id).join("deploy.json")
    }

    pub fn server_executable(&self, id: u32) -> PathBuf {
        self.server_game_dir(id).join(server_executable_name())
    }

    /// Resolve a client-supplied log name to a file inside the server's logs dir.
    ///
    /// Only plain `*.log` file names are accepted; anything with a directory
    /// component is rejected.
    pub fn resolve_server_log(&self, id: u32, name: &str) -> Result<PathBuf> {
        let trimmed = name.trim();
        let is_plain = !trimmed.is_empty()
            && Path::new(trimmed).file_name().and_then(|n| n.to_str()) == Some(trimmed)
            && !trimmed.contains(['/', '\\']);
        if !is_plain || !trimmed.ends_with(".log") || trimmed == ".log" {
            return Err(FleetError::invalid_settings(
                "log",
                format!("invalid log name {:?}", name),
            ));
        }
        Ok(self.server_logs_dir(id).join(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_layout_is_nested_under_id() {
        let paths = FleetPaths::new("/srv/fleet");
        assert_eq!(
            paths.server_output_file(7),
            PathBuf::from("/srv/fleet/servers/7/logs/output.log")
        );
        assert_eq!(
            paths.server_game_dir(7),
            PathBuf::from("/srv/fleet/servers/7/game")
        );
    }

    #[test]
    fn log_names_must_be_plain_log_files() {
        let paths = FleetPaths::new("/srv/fleet");
        assert!(paths.resolve_server_log(1, "output.log").is_ok());
        assert!(paths.resolve_server_log(1, "players.log").is_ok());
        assert!(paths.resolve_server_log(1, "../servers.json").is_err());
        assert!(paths.resolve_server_log(1, "../../x.log").is_err());
        assert!(paths.resolve_server_log(1, "settings.xml").is_err());
        assert!(paths.resolve_server_log(1, ".log").is_err());
        assert!(paths.resolve_server_log(1, "").is_err());
    }
}
