//! Fleet coordinator: the roster of servers plus everything shared between them.

mod crud;
mod lifecycle;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::component::{Installer, NativeInstaller};
use crate::config::ConfigStore;
use crate::deploy::DeploymentOrchestrator;
use crate::error::{FleetError, Result};
use crate::events::{publish, EventSink, FleetEvent, FleetStats, RosterEntry};
use crate::logtail::{read_chunk, LogChunk, LogReadRequest};
use crate::paths::{FleetPaths, SERVER_OUTPUT_LOG};
use crate::process::{NativeProcessControl, ProcessControl};
use crate::progress::{ProgressBoard, ProgressTracker};
use crate::server::{RunState, Roster, ServerContext, ServerSupervisor, ServerStatus};
use crate::store::{JsonRosterStore, RosterStore};

/// External collaborators a coordinator is built from.
pub struct FleetParts {
    pub config: Arc<ConfigStore>,
    pub control: Arc<dyn ProcessControl>,
    pub installer: Arc<dyn Installer>,
    pub store: Arc<dyn RosterStore>,
    pub events: Arc<dyn EventSink>,
}

pub struct FleetCoordinator {
    config: Arc<ConfigStore>,
    ctx: ServerContext,
    roster: Arc<Roster>,
    progress: Arc<ProgressTracker>,
    orchestrator: Arc<DeploymentOrchestrator>,
    store: Arc<dyn RosterStore>,
}

pub(crate) fn fleet_stats(roster: &Roster) -> FleetStats {
    let servers = roster.snapshot();
    FleetStats {
        total_servers: servers.len(),
        active_servers: servers
            .iter()
            .filter(|s| s.state() == RunState::Running)
            .count(),
        total_players: servers.iter().map(|s| s.client_count()).sum(),
    }
}

impl FleetCoordinator {
    /// Build a coordinator and load the persisted roster.
    pub fn new(parts: FleetParts) -> Result<Arc<Self>> {
        let config = parts.config.load();
        let paths = FleetPaths::new(&config.root_dir);
        paths.ensure_dirs()?;

        let ctx = ServerContext {
            paths,
            control: parts.control,
            events: Arc::clone(&parts.events),
            graceful_stop_timeout: config.graceful_stop_timeout(),
        };

        let roster = Arc::new(Roster::new());
        let records = parts.store.load()?;
        {
            let mut servers = roster.write();
            for record in records {
                log::info!("Loaded server {} ({})", record.id, record.settings.name);
                servers.push(ServerSupervisor::new(ctx.clone(), record));
            }
        }

        let progress = Arc::new(ProgressTracker::new());
        let orchestrator = DeploymentOrchestrator::new(
            parts.installer,
            Arc::clone(&progress),
            Arc::clone(&roster),
            parts.events,
        );

        Ok(Arc::new(Self {
            config: parts.config,
            ctx,
            roster,
            progress,
            orchestrator,
            store: parts.store,
        }))
    }

    /// Coordinator wired to real processes, the network and `servers.json`.
    pub fn native(config: Arc<ConfigStore>, events: Arc<dyn EventSink>) -> Result<Arc<Self>> {
        let paths = FleetPaths::new(&config.load().root_dir);
        let installer = Arc::new(NativeInstaller::new(paths.clone(), Arc::clone(&config))?);
        Self::new(FleetParts {
            store: Arc::new(JsonRosterStore::new(paths.roster_path())),
            config,
            control: Arc::new(NativeProcessControl::new()),
            installer,
            events,
        })
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn paths(&self) -> &FleetPaths {
        &self.ctx.paths
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn orchestrator(&self) -> &Arc<DeploymentOrchestrator> {
        &self.orchestrator
    }

    pub fn server_count(&self) -> usize {
        self.roster.len()
    }

    /// Servers in the Running state.
    pub fn server_count_active(&self) -> usize {
        self.roster.count_in_state(RunState::Running)
    }

    pub fn total_players(&self) -> usize {
        self.roster
            .snapshot()
            .iter()
            .map(|s| s.client_count())
            .sum()
    }

    pub fn server_by_id(&self, id: u32) -> Option<Arc<ServerSupervisor>> {
        self.roster.find(id)
    }

    fn require(&self, id: u32) -> Result<Arc<ServerSupervisor>> {
        self.roster
            .find(id)
            .ok_or_else(|| FleetError::server_not_found(id))
    }

    pub fn servers(&self) -> Vec<Arc<ServerSupervisor>> {
        self.roster.snapshot()
    }

    pub fn stats(&self) -> FleetStats {
        fleet_stats(&self.roster)
    }

    pub fn statuses(&self) -> Vec<ServerStatus> {
        self.roster.snapshot().iter().map(|s| s.status()).collect()
    }

    fn events(&self) -> &dyn EventSink {
        self.ctx.events.as_ref()
    }

    pub(crate) fn publish_stats(&self) {
        publish(self.events(), &FleetEvent::Stats(self.stats()));
    }

    pub(crate) fn publish_roster(&self) {
        let entries = self
            .roster
            .snapshot()
            .iter()
            .map(|s| RosterEntry {
                id: s.id(),
                name: s.name(),
                port: s.port(),
            })
            .collect();
        publish(self.events(), &FleetEvent::Roster(entries));
    }

    /// Persist the roster. Failures are logged, never returned.
    pub fn save(&self) {
        let records = self.roster.records();
        match self.store.save(&records) {
            Ok(()) => log::debug!("Saved roster ({} servers)", records.len()),
            Err(e) => log::warn!("Failed to save roster: {}", e),
        }
    }

    /// Read a window of one of a server's log files; `output.log` when `name` is empty.
    pub fn read_server_log(
        &self,
        id: u32,
        name: &str,
        request: &LogReadRequest,
    ) -> Result<LogChunk> {
        self.require(id)?;
        request.validate()?;
        let name = if name.trim().is_empty() {
            SERVER_OUTPUT_LOG
        } else {
            name
        };
        let path = self.paths().resolve_server_log(id, name)?;
        read_chunk(&path, request)
    }

    /// Push the progress board to `observer` until it disconnects.
    pub fn progress_stream(&self, observer: mpsc::Sender<ProgressBoard>) -> JoinHandle<()> {
        let interval = self.config.load().progress_interval();
        self.progress.spawn_stream(interval, observer)
    }
}
