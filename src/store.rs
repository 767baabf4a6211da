//! Roster persistence.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::ports::{is_port_available, next_available_port, DEFAULT_BASE_PORT};
use crate::server::ServerRecord;

pub trait RosterStore: Send + Sync {
    fn load(&self) -> Result<Vec<ServerRecord>>;

    fn save(&self, records: &[ServerRecord]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RosterFile {
    #[serde(default)]
    servers: Vec<ServerRecord>,
}

/// Pretty JSON at one path, replaced through a temp file.
#[derive(Debug)]
pub struct JsonRosterStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonRosterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Make ids unique and ports spaced, earlier ids winning.
///
/// Records without an id, or repeating one, get the next free id. A record
/// too close to an earlier port moves to the next free port, or is dropped
/// when none is left.
fn normalize_records(mut records: Vec<ServerRecord>) -> Vec<ServerRecord> {
    records.sort_by_key(|r| r.id);
    let mut next = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
    let mut seen = HashSet::new();
    let mut ports: Vec<(u32, u16)> = Vec::new();
    let mut kept = Vec::with_capacity(records.len());

    for mut record in records {
        if record.id == 0 || !seen.insert(record.id) {
            if record.id != 0 {
                log::warn!(
                    "Server {} ({}) repeats an id in the roster file, now server {}",
                    record.id,
                    record.settings.name,
                    next
                );
            }
            record.id = next;
            seen.insert(next);
            next += 1;
        }

        let port = record.settings.port;
        if !is_port_available(&ports, port, None) {
            match next_available_port(&ports, port, DEFAULT_BASE_PORT) {
                Some(moved) => {
                    log::warn!(
                        "Server {} port {} is too close to another server, moved to {}",
                        record.id,
                        port,
                        moved
                    );
                    record.settings.port = moved;
                }
                None => {
                    log::warn!(
                        "Server {} port {} conflicts and no free port is left, skipping it",
                        record.id,
                        port
                    );
                    continue;
                }
            }
        }
        ports.push((record.id, record.settings.port));
        kept.push(record);
    }

    kept.sort_by_key(|r| r.id);
    kept
}

impl RosterStore for JsonRosterStore {
    fn load(&self) -> Result<Vec<ServerRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| FleetError::config(format!("{}: {}", self.path.display(), e)))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: RosterFile = serde_json::from_str(&content)?;
        Ok(normalize_records(file.servers))
    }

    fn save(&self, records: &[ServerRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = RosterFile {
            servers: records.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerSettings;

    fn record(id: u32, name: &str, port: u16) -> ServerRecord {
        ServerRecord {
            id,
            settings: ServerSettings::new(name, port),
            banned: Vec::new(),
            pending_save_purge: false,
        }
    }

    #[test]
    fn missing_file_is_empty_roster() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRosterStore::new(dir.path().join("servers.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_keeps_bans_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRosterStore::new(dir.path().join("servers.json"));
        let mut alpha = record(1, "Alpha", 27016);
        alpha.banned.push("76561198000000001".to_string());
        alpha.settings.beta = true;
        store.save(&[alpha.clone(), record(2, "Beta", 27019)]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], alpha);
        assert!(!dir.path().join("servers.json.tmp").exists());
    }

    #[test]
    fn records_without_ids_get_fresh_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        fs::write(
            &path,
            r#"{"servers":[{"id":3,"name":"A","port":27016},{"name":"B","port":27019},{"name":"C","port":27022}]}"#,
        )
        .unwrap();

        let ids: Vec<u32> = JsonRosterStore::new(&path)
            .load()
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn repeated_ids_and_crowded_ports_are_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        fs::write(
            &path,
            r#"{"servers":[
                {"id":2,"name":"A","port":27016},
                {"id":2,"name":"B","port":27030},
                {"id":5,"name":"C","port":27017}
            ]}"#,
        )
        .unwrap();

        let loaded = JsonRosterStore::new(&path).load().unwrap();
        let summary: Vec<(u32, &str, u16)> = loaded
            .iter()
            .map(|r| (r.id, r.settings.name.as_str(), r.settings.port))
            .collect();
        assert_eq!(
            summary,
            vec![(2, "A", 27016), (5, "C", 27020), (6, "B", 27030)]
        );
    }
}
