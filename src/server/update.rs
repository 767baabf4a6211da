//! Background "update server files" with a per-server single-flight guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::supervisor::ServerSupervisor;
use crate::error::Result;
use crate::progress::{ProgressKey, ProgressTracker, STAGE_COMPLETED, STAGE_FAILED, STAGE_QUEUED};
use crate::task::join_guarded;

/// Held while a server's files are being rewritten. Releases on drop.
#[derive(Debug)]
pub struct UpdateGuard {
    flag: Arc<AtomicBool>,
    release: bool,
}

impl UpdateGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
                release: true,
            })
    }

    /// Keep the slot taken for good. Used once a server is deleted.
    pub fn retire(mut self) {
        self.release = false;
    }
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        if self.release {
            self.flag.store(false, Ordering::Release);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Started,
    AlreadyRunning,
}

impl ServerSupervisor {
    pub fn try_begin_update(&self) -> Option<UpdateGuard> {
        UpdateGuard::try_acquire(&self.updating)
    }

    /// Redeploy on a blocking thread, reporting through `progress`.
    /// The caller holds the server's [`UpdateGuard`] for the duration.
    pub async fn redeploy_tracked(self: &Arc<Self>, progress: &Arc<ProgressTracker>) -> Result<()> {
        let key = ProgressKey::Server(self.id());
        let this = Arc::clone(self);
        let tracker = Arc::clone(progress);
        let handle = tokio::task::spawn_blocking(move || {
            this.deploy(&|stage, done, total| tracker.update(key, stage, done, total))
                .map(|_| ())
        });
        join_guarded(handle, "server update").await
    }

    /// Start a background redeploy. A second request while one runs is refused.
    pub fn start_update_async(self: &Arc<Self>, progress: &Arc<ProgressTracker>) -> UpdateOutcome {
        let Some(guard) = self.try_begin_update() else {
            log::info!("Server {} update already running", self.id());
            return UpdateOutcome::AlreadyRunning;
        };

        let key = ProgressKey::Server(self.id());
        progress.begin(key, STAGE_QUEUED);

        let this = Arc::clone(self);
        let tracker = Arc::clone(progress);
        tokio::spawn(async move {
            let _guard = guard;
            match this.redeploy_tracked(&tracker).await {
                Ok(()) => tracker.complete(key, STAGE_COMPLETED, None),
                Err(e) => {
                    log::error!("Server {} update failed: {}", this.id(), e);
                    tracker.complete(key, STAGE_FAILED, Some(e.message()));
                }
            }
        });
        UpdateOutcome::Started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_frees_the_slot_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = UpdateGuard::try_acquire(&flag).unwrap();
        assert!(UpdateGuard::try_acquire(&flag).is_none());
        drop(guard);
        assert!(UpdateGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn retired_guard_keeps_the_slot() {
        let flag = Arc::new(AtomicBool::new(false));
        UpdateGuard::try_acquire(&flag).unwrap().retire();
        assert!(flag.load(Ordering::Acquire));
        assert!(UpdateGuard::try_acquire(&flag).is_none());
    }
}
