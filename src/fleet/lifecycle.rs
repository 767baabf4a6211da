//! Start, stop and update servers through the coordinator.

use std::sync::Arc;

use futures_util::future::join_all;

use super::{fleet_stats, FleetCoordinator};
use crate::error::{FleetError, Result};
use crate::events::{publish, FleetEvent};
use crate::server::UpdateOutcome;

impl FleetCoordinator {
    /// Start a server. A pending delayed stop is cancelled instead.
    pub async fn start_server(&self, id: u32) -> Result<()> {
        let server = self.require(id)?;
        if server.has_pending_stop() && server.cancel_stop() {
            log::info!("Server {} start requested during delayed stop, stop cancelled", id);
            self.publish_stats();
            return Ok(());
        }
        let result = server.start().await;
        // Start clears the save purge flag.
        self.save();
        self.publish_stats();
        result
    }

    /// Stop a server after its shutdown delay.
    ///
    /// A second request while the delay runs, or a stop during startup,
    /// stops immediately. Returns whether a delayed stop was scheduled.
    pub fn stop_server(&self, id: u32) -> Result<bool> {
        let server = self.require(id)?;
        let roster = Arc::clone(&self.roster);
        let events = Arc::clone(&self.ctx.events);
        let scheduled = server.stop_async(move |status| {
            publish(events.as_ref(), &FleetEvent::ServerStatus(status));
            publish(events.as_ref(), &FleetEvent::Stats(fleet_stats(&roster)));
        })?;
        if scheduled {
            return Ok(server.has_pending_stop());
        }
        if !server.state().is_alive() {
            return Err(FleetError::server_not_running(id));
        }
        server.stop()?;
        self.publish_stats();
        Ok(false)
    }

    /// Cancel a delayed stop.
    pub fn cancel_stop(&self, id: u32) -> Result<()> {
        let server = self.require(id)?;
        if server.cancel_stop() {
            self.publish_stats();
            Ok(())
        } else {
            Err(FleetError::no_pending_stop(id))
        }
    }

    pub async fn restart_server(&self, id: u32) -> Result<()> {
        let server = self.require(id)?;
        let result = server.restart().await;
        self.publish_stats();
        result
    }

    /// Redeploy a server's files in the background.
    pub fn update_server_files(&self, id: u32) -> Result<UpdateOutcome> {
        let server = self.require(id)?;
        Ok(server.start_update_async(&self.progress))
    }

    /// Start every server flagged to start with the fleet.
    pub async fn autostart(&self) {
        for server in self.roster.snapshot() {
            if !server.settings().auto_start {
                continue;
            }
            if let Err(e) = server.start().await {
                log::error!("Autostart of server {} failed: {}", server.id(), e);
            }
        }
        self.publish_stats();
    }

    /// Stop every live server at once and wait for them to exit.
    /// Returns how many servers were still alive after the wait.
    pub async fn stop_all(&self) -> usize {
        let alive: Vec<_> = self
            .roster
            .snapshot()
            .into_iter()
            .filter(|s| s.state().is_alive())
            .collect();
        for server in &alive {
            if let Err(e) = server.stop() {
                log::error!("Failed to stop server {}: {}", server.id(), e);
            }
        }

        let timeout = self.ctx.graceful_stop_timeout;
        let exited = join_all(alive.iter().map(|s| s.wait_for_stopped(timeout))).await;
        let remaining = exited.iter().filter(|done| !**done).count();
        if remaining > 0 {
            log::warn!("{} servers still running after stop_all", remaining);
        } else {
            log::info!("All servers stopped");
        }
        self.publish_stats();
        remaining
    }
}
