//! In-memory progress of background operations.
//!
//! Each key owns its own slot, so writers on different keys never contend
//! beyond the short map lookup.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::component::DeployKind;

pub const STAGE_IDLE: &str = "Idle";
pub const STAGE_QUEUED: &str = "Queued";
pub const STAGE_PROCESSING: &str = "Processing";
pub const STAGE_COMPLETED: &str = "Completed";
pub const STAGE_FAILED: &str = "Failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKey {
    Deploy(DeployKind),
    Server(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub stage: String,
    pub processed: u64,
    pub total: u64,
    pub percent: u8,
    pub running: bool,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// Value reported for a key that has never been used.
    pub fn idle() -> Self {
        Self {
            stage: STAGE_IDLE.to_string(),
            processed: 0,
            total: 0,
            percent: 0,
            running: false,
            error: None,
            updated_at: None,
        }
    }
}

fn normalize_stage(stage: &str) -> String {
    let stage = stage.trim();
    if stage.is_empty() {
        STAGE_PROCESSING.to_string()
    } else {
        stage.to_string()
    }
}

/// Percentage of `processed` over `total`, clamped to 0..=100.
/// With an unknown total, any progress counts as done.
pub fn calculate_percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return if processed > 0 { 100 } else { 0 };
    }
    let pct = processed.saturating_mul(100) / total;
    pct.min(100) as u8
}

/// Everything tracked, in a shape observers can serialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressBoard {
    pub deploy: BTreeMap<String, ProgressSnapshot>,
    pub servers: BTreeMap<u32, ProgressSnapshot>,
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: RwLock<HashMap<ProgressKey, Arc<Mutex<ProgressSnapshot>>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: ProgressKey) -> Arc<Mutex<ProgressSnapshot>> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(slot) = entries.get(&key) {
                return Arc::clone(slot);
            }
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let slot = entries
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(ProgressSnapshot::idle())));
        Arc::clone(slot)
    }

    fn modify<F>(&self, key: ProgressKey, f: F)
    where
        F: FnOnce(&mut ProgressSnapshot),
    {
        let slot = self.slot(key);
        let mut snapshot = slot.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut snapshot);
        snapshot.updated_at = Some(Utc::now());
    }

    /// Start (or restart) the operation for `key`, discarding any previous result.
    pub fn begin(&self, key: ProgressKey, stage: &str) {
        let stage = normalize_stage(stage);
        self.modify(key, |s| {
            s.stage = stage;
            s.processed = 0;
            s.total = 0;
            s.percent = 0;
            s.running = true;
            s.error = None;
        });
    }

    pub fn update(&self, key: ProgressKey, stage: &str, processed: u64, total: u64) {
        let stage = normalize_stage(stage);
        self.modify(key, |s| {
            s.stage = stage;
            s.processed = processed;
            s.total = total;
            s.percent = calculate_percent(processed, total);
            s.running = true;
        });
    }

    /// Finalize the operation. An error turns an empty or "Completed" stage into "Failed".
    pub fn complete(&self, key: ProgressKey, stage: &str, error: Option<String>) {
        let stage = match (stage.trim(), &error) {
            ("" | STAGE_COMPLETED, Some(_)) => STAGE_FAILED.to_string(),
            ("", None) => STAGE_COMPLETED.to_string(),
            (other, _) => other.to_string(),
        };
        self.modify(key, |s| {
            if error.is_none() {
                s.percent = 100;
            }
            s.stage = stage;
            s.running = false;
            s.error = error;
        });
    }

    pub fn snapshot(&self, key: ProgressKey) -> ProgressSnapshot {
        let slot = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.get(&key).map(Arc::clone)
        };
        match slot {
            Some(slot) => slot.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            None => ProgressSnapshot::idle(),
        }
    }

    pub fn snapshot_all(&self) -> HashMap<ProgressKey, ProgressSnapshot> {
        let slots: Vec<(ProgressKey, Arc<Mutex<ProgressSnapshot>>)> = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.iter().map(|(k, v)| (*k, Arc::clone(v))).collect()
        };
        slots
            .into_iter()
            .map(|(key, slot)| {
                let snapshot = slot.lock().unwrap_or_else(|e| e.into_inner()).clone();
                (key, snapshot)
            })
            .collect()
    }

    pub fn board(&self) -> ProgressBoard {
        let mut board = ProgressBoard::default();
        for (key, snapshot) in self.snapshot_all() {
            match key {
                ProgressKey::Deploy(kind) => {
                    board.deploy.insert(kind.as_str().to_string(), snapshot);
                }
                ProgressKey::Server(id) => {
                    board.servers.insert(id, snapshot);
                }
            }
        }
        board
    }

    /// Drop the entry for a server that left the roster.
    pub fn forget(&self, key: ProgressKey) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&key);
    }

    /// Push the board to `observer` every `interval`, skipping unchanged boards.
    /// The task ends once the observer's receiver is dropped.
    pub fn spawn_stream(
        self: &Arc<Self>,
        interval: Duration,
        observer: mpsc::Sender<ProgressBoard>,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<ProgressBoard> = None;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = observer.closed() => break,
                }
                let board = tracker.board();
                if last.as_ref() != Some(&board) {
                    if observer.send(board.clone()).await.is_err() {
                        break;
                    }
                    last = Some(board);
                }
            }
            log::debug!("Progress stream observer disconnected");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: ProgressKey = ProgressKey::Deploy(DeployKind::Release);

    #[test]
    fn unknown_key_is_idle() {
        let tracker = ProgressTracker::new();
        let snapshot = tracker.snapshot(ProgressKey::Server(9));
        assert_eq!(snapshot, ProgressSnapshot::idle());
        assert_eq!(snapshot.stage, "Idle");
    }

    #[test]
    fn lifecycle_keeps_error_until_next_begin() {
        let tracker = ProgressTracker::new();

        tracker.begin(KEY, "Queued");
        assert_eq!(tracker.snapshot(KEY).stage, "Queued");
        assert!(tracker.snapshot(KEY).running);

        tracker.update(KEY, "Downloading", 50, 200);
        let mid = tracker.snapshot(KEY);
        assert_eq!((mid.processed, mid.total, mid.percent), (50, 200, 25));

        tracker.complete(KEY, "Failed", Some("disk full".to_string()));
        let done = tracker.snapshot(KEY);
        assert_eq!(done.stage, "Failed");
        assert_eq!(done.error.as_deref(), Some("disk full"));
        assert!(!done.running);

        tracker.update(KEY, "Downloading", 1, 2);
        assert_eq!(tracker.snapshot(KEY).error.as_deref(), Some("disk full"));

        tracker.begin(KEY, "Queued");
        assert_eq!(tracker.snapshot(KEY).error, None);
        assert_eq!(tracker.snapshot(KEY).processed, 0);
    }

    #[test]
    fn completion_stage_normalization() {
        let tracker = ProgressTracker::new();
        tracker.complete(KEY, "Completed", Some("boom".to_string()));
        assert_eq!(tracker.snapshot(KEY).stage, "Failed");

        tracker.complete(KEY, "", None);
        let ok = tracker.snapshot(KEY);
        assert_eq!(ok.stage, "Completed");
        assert_eq!(ok.percent, 100);

        tracker.begin(KEY, "  ");
        assert_eq!(tracker.snapshot(KEY).stage, "Processing");
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(calculate_percent(0, 0), 0);
        assert_eq!(calculate_percent(5, 0), 100);
        assert_eq!(calculate_percent(300, 200), 100);
        assert_eq!(calculate_percent(1, 3), 33);
    }

    #[test]
    fn board_splits_keys() {
        let tracker = ProgressTracker::new();
        tracker.begin(KEY, "Queued");
        tracker.begin(ProgressKey::Server(3), "Queued");

        let board = tracker.board();
        assert!(board.deploy.contains_key("Release"));
        assert!(board.servers.contains_key(&3));
        assert_eq!(tracker.snapshot_all().len(), 2);
    }

    #[test]
    fn concurrent_writers_on_distinct_keys() {
        let tracker = Arc::new(ProgressTracker::new());
        let handles: Vec<_> = (0..8u32)
            .map(|id| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let key = ProgressKey::Server(id);
                    tracker.begin(key, "Queued");
                    for i in 0..100 {
                        tracker.update(key, "Copying", i, 100);
                    }
                    tracker.complete(key, "Completed", None);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for id in 0..8u32 {
            let snapshot = tracker.snapshot(ProgressKey::Server(id));
            assert_eq!(snapshot.stage, "Completed");
            assert_eq!(snapshot.processed, 99);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stream_pushes_only_changes_and_stops_on_disconnect() {
        let tracker = Arc::new(ProgressTracker::new());
        tracker.begin(KEY, "Queued");
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tracker.spawn_stream(Duration::from_secs(2), tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.deploy["Release"].stage, "Queued");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        tracker.update(KEY, "Downloading", 1, 4);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.deploy["Release"].stage, "Downloading");

        drop(rx);
        handle.await.unwrap();
    }
}
