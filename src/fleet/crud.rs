//! Adding, editing and removing servers.

use std::sync::Arc;
use std::time::Duration;

use super::FleetCoordinator;
use crate::error::{FleetError, Result};
use crate::ports::{is_port_available, next_available_port};
use crate::progress::ProgressKey;
use crate::server::{
    name_taken, next_id, port_map, ServerRecord, ServerSettings, ServerStatus, ServerSupervisor,
    UpdateOutcome,
};

/// Extra wait after a force kill during delete.
const DELETE_KILL_GRACE: Duration = Duration::from_secs(5);

impl FleetCoordinator {
    /// Port conflict error for `port`, carrying the next free port if there is one.
    fn port_conflict(&self, ports: &[(u32, u16)], port: u16) -> FleetError {
        let base = self.config.load().base_port;
        FleetError::port_unavailable(port, next_available_port(ports, port, base))
    }

    /// Validate and register a new server, then persist the roster.
    ///
    /// A zero port picks the next free port from the configured base.
    pub fn add_server(&self, mut settings: ServerSettings) -> Result<Arc<ServerSupervisor>> {
        settings.sanitize();
        let base = self.config.load().base_port;

        let server = {
            let mut servers = self.roster.write();
            let ports = port_map(&servers);
            if settings.port == 0 {
                settings.port = next_available_port(&ports, 0, base)
                    .ok_or_else(|| FleetError::port_unavailable(0, None))?;
            }
            settings.validate()?;
            if name_taken(&servers, &settings.name, None) {
                return Err(FleetError::name_unavailable(&settings.name));
            }
            if !is_port_available(&ports, settings.port, None) {
                return Err(self.port_conflict(&ports, settings.port));
            }

            let id = next_id(&servers);
            let server = ServerSupervisor::new(
                self.ctx.clone(),
                ServerRecord {
                    id,
                    settings,
                    banned: Vec::new(),
                    pending_save_purge: false,
                },
            );
            servers.push(Arc::clone(&server));
            server
        };

        let id = server.id();
        let dirs = [self.paths().server_game_dir(id), self.paths().server_logs_dir(id)];
        for dir in &dirs {
            if let Err(e) = std::fs::create_dir_all(dir) {
                self.roster.remove(id);
                return Err(FleetError::io(format!("{}: {}", dir.display(), e)));
            }
        }

        log::info!(
            "Added server {} ({}) on port {}",
            id,
            server.name(),
            server.port()
        );
        self.save();
        self.publish_roster();
        self.publish_stats();
        Ok(server)
    }

    /// Replace a server's settings. Takes effect on the next start.
    ///
    /// A channel switch on a stopped server redeploys its files in the
    /// background; a live server is redeployed by its next start. Call from
    /// inside a tokio runtime.
    pub fn update_settings(&self, id: u32, mut settings: ServerSettings) -> Result<ServerStatus> {
        settings.sanitize();
        settings.validate()?;
        let beta = settings.beta;

        let (server, channel_changed) = {
            let servers = self.roster.write();
            let server = servers
                .iter()
                .find(|s| s.id() == id)
                .map(Arc::clone)
                .ok_or_else(|| FleetError::server_not_found(id))?;
            if name_taken(&servers, &settings.name, Some(id)) {
                return Err(FleetError::name_unavailable(&settings.name));
            }
            let ports = port_map(&servers);
            if !is_port_available(&ports, settings.port, Some(id)) {
                return Err(self.port_conflict(&ports, settings.port));
            }
            let channel_changed = server.settings().beta != beta;
            if server.apply_settings(settings) {
                log::info!("Server {} start parameters changed, save purge pending", id);
            }
            (server, channel_changed)
        };

        self.save();
        if channel_changed {
            if server.state().is_alive() {
                log::info!("Server {} channel changed, files redeploy on next start", id);
            } else {
                log::info!("Server {} channel changed, redeploying files", id);
                if server.start_update_async(&self.progress) == UpdateOutcome::AlreadyRunning {
                    log::info!("Server {} files redeploy on next start", id);
                }
            }
        }
        self.publish_roster();
        Ok(server.status())
    }

    /// Stop a server if needed, then remove it and its files.
    ///
    /// Takes the server's update slot first and never gives it back, so no
    /// redeploy can write into the directory while or after it is removed.
    pub async fn delete_server(&self, id: u32) -> Result<()> {
        let server = self.require(id)?;
        let Some(update_guard) = server.try_begin_update() else {
            return Err(FleetError::update_in_progress(id));
        };

        if server.state().is_alive() {
            server.stop()?;
            let timeout = self.ctx.graceful_stop_timeout;
            if !server.wait_for_stopped(timeout).await {
                if let Some(pid) = server.pid() {
                    log::warn!("Server {} ignored stop, force killing before delete", id);
                    self.ctx.control.force_kill(pid)?;
                }
                if !server.wait_for_stopped(DELETE_KILL_GRACE).await {
                    return Err(FleetError::server_running(id));
                }
            }
        }

        if self.roster.remove(id).is_none() {
            return Err(FleetError::server_not_found(id));
        }
        self.progress.forget(ProgressKey::Server(id));

        let dir = self.paths().server_dir(id);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                log::warn!("Failed to remove {}: {}", dir.display(), e);
            }
        }

        // Stale handles to this server must never redeploy into its old directory.
        update_guard.retire();

        log::info!("Deleted server {}", id);
        self.save();
        self.publish_roster();
        self.publish_stats();
        Ok(())
    }

    pub fn ban(&self, id: u32, steam_id: &str) -> Result<bool> {
        let changed = self.require(id)?.ban(steam_id);
        if changed {
            self.save();
        }
        Ok(changed)
    }

    pub fn unban(&self, id: u32, steam_id: &str) -> Result<bool> {
        let changed = self.require(id)?.unban(steam_id);
        if changed {
            self.save();
        }
        Ok(changed)
    }
}
