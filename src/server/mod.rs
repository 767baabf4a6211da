//! Managed servers.
//!
//! Layout per server under `<root>/servers/<id>/`:
//! - `game/` deployed game files, BepInEx and plugins
//! - `logs/` game log files, including `output.log`
//! - `settings.xml` and `deploy.json`

mod deploy;
mod log_events;
mod roster;
mod supervisor;
mod types;
mod update;

use std::sync::Arc;
use std::time::Duration;

use crate::events::EventSink;
use crate::paths::FleetPaths;
use crate::process::ProcessControl;

pub use deploy::{channel_name, deploy_server_files, read_deploy_snapshot, DeploySnapshot};
pub use log_events::{classify, LogEvent};
pub use roster::{name_taken, next_id, port_map, Roster};
pub use supervisor::ServerSupervisor;
pub use types::{
    ChatMessage, ClientSession, RunState, ServerRecord, ServerSettings, ServerStatus,
};
pub use update::{UpdateGuard, UpdateOutcome};

/// Collaborators shared by every server.
#[derive(Clone)]
pub struct ServerContext {
    pub paths: FleetPaths,
    pub control: Arc<dyn ProcessControl>,
    pub events: Arc<dyn EventSink>,
    pub graceful_stop_timeout: Duration,
}
