//! Server settings, runtime state and the shapes reported to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::ports::DEFAULT_BASE_PORT;

pub const MAX_WELCOME_LEN: usize = 250;
pub const CHAT_RETENTION: usize = 200;

/// Persisted, user-editable configuration of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub name: String,
    #[serde(default = "default_world")]
    pub world: String,
    #[serde(default)]
    pub world_id: String,
    #[serde(default = "default_start_option")]
    pub start_location: String,
    #[serde(default = "default_start_option")]
    pub start_condition: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Console protocol port; `port + 1` when unset.
    #[serde(default)]
    pub console_port: Option<u16>,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub auth_secret: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
    #[serde(default = "default_shutdown_delay_secs")]
    pub shutdown_delay_secs: u64,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub beta: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default = "default_true")]
    pub auto_save: bool,
    #[serde(default = "default_true")]
    pub auto_pause: bool,
    #[serde(default)]
    pub welcome_message: String,
    #[serde(default)]
    pub welcome_back_message: String,
}

fn default_world() -> String {
    "Moon".to_string()
}

fn default_start_option() -> String {
    "Default".to_string()
}

fn default_difficulty() -> String {
    "Normal".to_string()
}

fn default_port() -> u16 {
    DEFAULT_BASE_PORT
}

fn default_max_clients() -> u32 {
    10
}

fn default_save_interval_secs() -> u64 {
    300
}

fn default_restart_delay_secs() -> u64 {
    10
}

fn default_shutdown_delay_secs() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn sanitize_welcome(raw: &str) -> String {
    let single_line = raw.replace(['\r', '\n'], " ");
    let trimmed = single_line.trim();
    trimmed.chars().take(MAX_WELCOME_LEN).collect()
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(FleetError::invalid_settings(field, "is required"))
    } else {
        Ok(())
    }
}

fn require_range<T>(field: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        Err(FleetError::invalid_settings(
            field,
            format!("{} is outside {}..={}", value, min, max),
        ))
    } else {
        Ok(())
    }
}

impl ServerSettings {
    /// Settings for a new server with every optional field at its default.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            world: default_world(),
            world_id: String::new(),
            start_location: default_start_option(),
            start_condition: default_start_option(),
            difficulty: default_difficulty(),
            port,
            console_port: None,
            password: String::new(),
            auth_secret: String::new(),
            max_clients: default_max_clients(),
            save_interval_secs: default_save_interval_secs(),
            restart_delay_secs: default_restart_delay_secs(),
            shutdown_delay_secs: default_shutdown_delay_secs(),
            visible: true,
            beta: false,
            auto_start: false,
            auto_update: false,
            auto_save: true,
            auto_pause: true,
            welcome_message: String::new(),
            welcome_back_message: String::new(),
        }
    }

    /// Trim free-text fields and flatten welcome messages to one clamped line.
    pub fn sanitize(&mut self) {
        self.name = self.name.trim().to_string();
        self.world = self.world.trim().to_string();
        self.world_id = self.world_id.trim().to_string();
        self.start_location = self.start_location.trim().to_string();
        self.start_condition = self.start_condition.trim().to_string();
        self.difficulty = self.difficulty.trim().to_string();
        self.welcome_message = sanitize_welcome(&self.welcome_message);
        self.welcome_back_message = sanitize_welcome(&self.welcome_back_message);
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("name", &self.name)?;
        require_non_empty("world", &self.world)?;
        require_non_empty("start_location", &self.start_location)?;
        require_non_empty("start_condition", &self.start_condition)?;
        require_non_empty("difficulty", &self.difficulty)?;
        if self.port == 0 {
            return Err(FleetError::invalid_settings("port", "must be non-zero"));
        }
        require_range("max_clients", self.max_clients, 1, 100)?;
        require_range("save_interval_secs", self.save_interval_secs, 60, 3600)?;
        require_range("restart_delay_secs", self.restart_delay_secs, 0, 3600)?;
        require_range("shutdown_delay_secs", self.shutdown_delay_secs, 0, 3600)?;
        Ok(())
    }

    pub fn console_port(&self) -> u16 {
        self.console_port
            .unwrap_or_else(|| self.port.saturating_add(1))
    }

    /// World identifier handed to the game, preferring the explicit id.
    pub fn world_identifier(&self) -> &str {
        if self.world_id.trim().is_empty() {
            &self.world
        } else {
            &self.world_id
        }
    }

    /// Whether switching to `other` invalidates existing save data.
    pub fn start_parameters_differ(&self, other: &Self) -> bool {
        self.world != other.world
            || self.start_location != other.start_location
            || self.start_condition != other.start_condition
    }
}

/// Roster entry as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    #[serde(default)]
    pub id: u32,
    #[serde(flatten)]
    pub settings: ServerSettings,
    #[serde(default)]
    pub banned: Vec<String>,
    #[serde(default)]
    pub pending_save_purge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Paused,
}

impl RunState {
    /// Whether a process exists (or is being brought up) for this state.
    pub fn is_alive(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSession {
    pub steam_id: String,
    pub name: String,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl ClientSession {
    pub fn is_online(&self) -> bool {
        self.disconnected_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub at: DateTime<Utc>,
    pub name: String,
    pub message: String,
}

/// Point-in-time view of one server for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub id: u32,
    pub name: String,
    pub port: u16,
    pub world: String,
    pub state: RunState,
    pub running: bool,
    pub starting: bool,
    pub stopping: bool,
    pub paused: bool,
    pub stopping_ends: Option<DateTime<Utc>>,
    /// Seconds until a scheduled stop fires.
    pub stopping_eta: Option<i64>,
    pub player_count: usize,
    pub max_players: u32,
    pub updating: bool,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub pending_save_purge: bool,
}
