#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt as _;
use stationeers_fleet::component::{Component, Installer, ProgressFn, STAGE_DOWNLOADING};
use stationeers_fleet::config::{ConfigStore, FleetConfig};
use stationeers_fleet::error::{FleetError, Result};
use stationeers_fleet::events::{EventHub, EventSink};
use stationeers_fleet::process::{ExitInfo, LaunchSpec, ProcessControl, SpawnedProcess};
use stationeers_fleet::store::JsonRosterStore;
use stationeers_fleet::{FleetCoordinator, FleetParts};
use tokio::sync::{mpsc, oneshot, Notify};

struct FakeProcess {
    lines: mpsc::UnboundedSender<String>,
    exit: Option<oneshot::Sender<ExitInfo>>,
}

/// Process control that hands out in-memory processes the test drives.
#[derive(Default)]
pub struct FakeProcessControl {
    next_pid: AtomicU32,
    processes: Mutex<HashMap<u32, FakeProcess>>,
    pub spawned: Mutex<Vec<LaunchSpec>>,
    pub stop_signals: Mutex<Vec<u32>>,
    pub kills: Mutex<Vec<u32>>,
    /// When set, processes ignore `signal_stop` and only die on `force_kill`.
    pub ignore_stop: AtomicBool,
}

impl FakeProcessControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        })
    }

    /// Feed one output line to `pid`.
    pub fn emit(&self, pid: u32, line: &str) {
        if let Some(process) = self.processes.lock().unwrap().get(&pid) {
            let _ = process.lines.send(line.to_string());
        }
    }

    pub fn exit(&self, pid: u32, info: ExitInfo) {
        let sender = self
            .processes
            .lock()
            .unwrap()
            .get_mut(&pid)
            .and_then(|p| p.exit.take());
        if let Some(sender) = sender {
            let _ = sender.send(info);
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn stop_signal_count(&self) -> usize {
        self.stop_signals.lock().unwrap().len()
    }

    pub fn kill_count(&self) -> usize {
        self.kills.lock().unwrap().len()
    }
}

impl ProcessControl for FakeProcessControl {
    fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedProcess> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        self.processes.lock().unwrap().insert(
            pid,
            FakeProcess {
                lines: line_tx,
                exit: Some(exit_tx),
            },
        );
        self.spawned.lock().unwrap().push(spec.clone());
        Ok(SpawnedProcess {
            pid,
            exit: exit_rx,
            lines: line_rx,
        })
    }

    fn signal_stop(&self, pid: u32) -> Result<()> {
        self.stop_signals.lock().unwrap().push(pid);
        if !self.ignore_stop.load(Ordering::SeqCst) {
            self.exit(pid, ExitInfo::success());
        }
        Ok(())
    }

    fn force_kill(&self, pid: u32) -> Result<()> {
        self.kills.lock().unwrap().push(pid);
        self.exit(pid, ExitInfo::failure(Some(-9)));
        Ok(())
    }
}

#[derive(Clone)]
pub enum InstallMode {
    Succeed,
    Fail(String),
    Panic,
    /// Wait for the notify before succeeding.
    Block(Arc<Notify>),
}

/// Installer that only flips flags.
pub struct FakeInstaller {
    installed: Mutex<HashSet<Component>>,
    mode: Mutex<InstallMode>,
    pub installs: Mutex<Vec<Component>>,
}

impl FakeInstaller {
    pub fn new(installed: &[Component]) -> Arc<Self> {
        Arc::new(Self {
            installed: Mutex::new(installed.iter().copied().collect()),
            mode: Mutex::new(InstallMode::Succeed),
            installs: Mutex::new(Vec::new()),
        })
    }

    /// Every component except the beta build.
    pub fn complete() -> Arc<Self> {
        Self::new(&[
            Component::SteamCmd,
            Component::Release,
            Component::BepInEx,
            Component::LaunchPad,
            Component::ConsoleTool,
        ])
    }

    pub fn set_mode(&self, mode: InstallMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn install_count(&self) -> usize {
        self.installs.lock().unwrap().len()
    }
}

impl Installer for FakeInstaller {
    fn is_installed(&self, component: Component) -> bool {
        self.installed.lock().unwrap().contains(&component)
    }

    fn install(&self, component: Component, progress: ProgressFn) -> BoxFuture<'_, Result<()>> {
        let mode = self.mode.lock().unwrap().clone();
        async move {
            self.installs.lock().unwrap().push(component);
            progress(STAGE_DOWNLOADING, 1, 2);
            match mode {
                InstallMode::Succeed => {}
                InstallMode::Fail(message) => return Err(FleetError::network(message)),
                InstallMode::Panic => panic!("{} archive is corrupt", component.display_name()),
                InstallMode::Block(gate) => gate.notified().await,
            }
            self.installed.lock().unwrap().insert(component);
            Ok(())
        }
        .boxed()
    }
}

pub struct Harness {
    pub fleet: Arc<FleetCoordinator>,
    pub control: Arc<FakeProcessControl>,
    pub installer: Arc<FakeInstaller>,
    pub hub: Arc<EventHub>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_installer(FakeInstaller::complete())
    }

    pub fn with_installer(installer: Arc<FakeInstaller>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FleetConfig::with_root(dir.path().join("fleet"));
        config.graceful_stop_timeout_secs = 5;
        let config = Arc::new(ConfigStore::with_config(
            dir.path().join("config.toml"),
            config,
        ));
        let control = FakeProcessControl::new();
        let hub = Arc::new(EventHub::default());
        let fleet = FleetCoordinator::new(FleetParts {
            config,
            control: Arc::clone(&control) as Arc<dyn ProcessControl>,
            installer: Arc::clone(&installer) as Arc<dyn Installer>,
            store: Arc::new(JsonRosterStore::new(
                dir.path().join("fleet").join("servers.json"),
            )),
            events: Arc::clone(&hub) as Arc<dyn EventSink>,
        })
        .unwrap();
        Self {
            fleet,
            control,
            installer,
            hub,
            dir,
        }
    }

    /// Pid of the server's current process.
    pub fn pid(&self, id: u32) -> u32 {
        self.fleet.server_by_id(id).unwrap().pid().unwrap()
    }
}

/// Put one file under `dir` so the component counts as present on disk.
pub fn seed_component(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// Poll `check` on real time until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
