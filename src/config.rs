use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Fleet-wide settings, stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_steam_app_id")]
    pub steam_app_id: String,
    #[serde(default)]
    pub github_proxy: String,
    #[serde(default = "default_bepinex_repo")]
    pub bepinex_repo: String,
    #[serde(default = "default_launchpad_repo")]
    pub launchpad_repo: String,
    #[serde(default = "default_console_tool_repo")]
    pub console_tool_repo: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_graceful_stop_timeout_secs")]
    pub graceful_stop_timeout_secs: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default)]
    pub update_on_launch: bool,
}

/// Data directory used when the config does not name one (~/.stationeers_fleet).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".stationeers_fleet")
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("fleet.toml")
}

fn default_root_dir() -> PathBuf {
    default_data_dir()
}

fn default_steam_app_id() -> String {
    "600760".to_string()
}

fn default_bepinex_repo() -> String {
    "BepInEx/BepInEx".to_string()
}

fn default_launchpad_repo() -> String {
    "StationeersLaunchPad/StationeersLaunchPad".to_string()
}

fn default_console_tool_repo() -> String {
    "JonVT/SCON".to_string()
}

fn default_base_port() -> u16 {
    27016
}

fn default_graceful_stop_timeout_secs() -> u64 {
    60
}

fn default_progress_interval_ms() -> u64 {
    2000
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            steam_app_id: default_steam_app_id(),
            github_proxy: String::new(),
            bepinex_repo: default_bepinex_repo(),
            launchpad_repo: default_launchpad_repo(),
            console_tool_repo: default_console_tool_repo(),
            base_port: default_base_port(),
            graceful_stop_timeout_secs: default_graceful_stop_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            update_on_launch: false,
        }
    }
}

impl FleetConfig {
    /// Config rooted at `root_dir` with every other field at its default.
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn graceful_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

/// Owns the config file and a cached copy of its contents.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    cache: RwLock<Arc<FleetConfig>>,
}

impl ConfigStore {
    /// Load the config at `path`, creating it with defaults if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| FleetError::config(format!("{}: {}", path.display(), e)))?;
            toml::from_str(&content)?
        } else {
            let config = FleetConfig::default();
            save_config_to_disk(&path, &config)?;
            config
        };
        log::info!("Loaded fleet config from {}", path.display());
        Ok(Self::with_config(path, config))
    }

    /// Wrap an already-built config. Nothing is written until the first mutation.
    pub fn with_config(path: impl Into<PathBuf>, config: FleetConfig) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(config)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Arc<FleetConfig> {
        let config = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&config)
    }

    /// Execute a read-modify-write operation on the config file while holding a lock.
    pub fn with_config_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut FleetConfig) -> Result<T>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.load();

        let mut updated = (*current).clone();
        let result = f(&mut updated)?;
        save_config_to_disk(&self.path, &updated)?;

        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(updated);

        Ok(result)
    }
}

fn save_config_to_disk(path: &Path, config: &FleetConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FleetError::config(e.to_string()))?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content).map_err(|e| FleetError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fleet.toml");

        let store = ConfigStore::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(store.load().steam_app_id, "600760");
        assert_eq!(store.load().base_port, 27016);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        fs::write(&path, "github_proxy = \"https://proxy.example\"\n").unwrap();

        let store = ConfigStore::open(&path).unwrap();
        let config = store.load();

        assert_eq!(config.github_proxy, "https://proxy.example");
        assert_eq!(config.graceful_stop_timeout_secs, 60);
        assert_eq!(config.progress_interval_ms, 2000);
    }

    #[test]
    fn mutation_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        let store = ConfigStore::with_config(&path, FleetConfig::with_root(dir.path()));

        store
            .with_config_mut(|config| {
                config.base_port = 28000;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.load().base_port, 28000);
        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.load().base_port, 28000);
    }

    #[test]
    fn failed_mutation_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::with_config(
            dir.path().join("fleet.toml"),
            FleetConfig::with_root(dir.path()),
        );

        let result: Result<()> = store.with_config_mut(|config| {
            config.base_port = 1;
            Err(FleetError::config("rejected"))
        });

        assert!(result.is_err());
        assert_eq!(store.load().base_port, 27016);
    }
}
