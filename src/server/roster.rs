use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::supervisor::ServerSupervisor;
use super::types::{RunState, ServerRecord};

/// The set of managed servers, ordered by id.
#[derive(Default)]
pub struct Roster {
    servers: RwLock<Vec<Arc<ServerSupervisor>>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<ServerSupervisor>>> {
        self.servers.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Exclusive access for check-then-insert and removal.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<ServerSupervisor>>> {
        self.servers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Cloned handles; iterate these instead of holding the lock.
    pub fn snapshot(&self) -> Vec<Arc<ServerSupervisor>> {
        self.read().iter().map(Arc::clone).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn find(&self, id: u32) -> Option<Arc<ServerSupervisor>> {
        self.read().iter().find(|s| s.id() == id).map(Arc::clone)
    }

    pub fn remove(&self, id: u32) -> Option<Arc<ServerSupervisor>> {
        let mut servers = self.write();
        let pos = servers.iter().position(|s| s.id() == id)?;
        Some(servers.remove(pos))
    }

    pub fn records(&self) -> Vec<ServerRecord> {
        self.snapshot().iter().map(|s| s.record()).collect()
    }

    pub fn count_in_state(&self, state: RunState) -> usize {
        self.snapshot()
            .iter()
            .filter(|s| s.state() == state)
            .count()
    }
}

/// `(id, port)` pairs for port checks.
pub fn port_map(servers: &[Arc<ServerSupervisor>]) -> Vec<(u32, u16)> {
    servers.iter().map(|s| (s.id(), s.port())).collect()
}

/// Next unused id: one past the highest assigned.
pub fn next_id(servers: &[Arc<ServerSupervisor>]) -> u32 {
    servers.iter().map(|s| s.id()).max().unwrap_or(0) + 1
}

pub fn name_taken(servers: &[Arc<ServerSupervisor>], name: &str, exclude: Option<u32>) -> bool {
    servers
        .iter()
        .filter(|s| Some(s.id()) != exclude)
        .any(|s| s.name().eq_ignore_ascii_case(name.trim()))
}
