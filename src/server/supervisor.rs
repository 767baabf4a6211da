//! Per-server process state machine.
//!
//! All mutable runtime state sits behind one mutex per server. Every transition
//! is decided while holding it, so the delayed-stop timer and `cancel_stop`
//! cannot both apply: whichever takes the lock first clears the pending stop
//! and the other sees a stale generation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::deploy::{channel_name, read_deploy_snapshot};
use super::log_events::{classify, LogEvent};
use super::types::{
    ChatMessage, ClientSession, RunState, ServerRecord, ServerSettings, ServerStatus,
    CHAT_RETENTION,
};
use super::ServerContext;
use crate::error::{FleetError, Result};
use crate::events::{publish, FleetEvent};
use crate::process::{ExitInfo, LaunchSpec, SpawnedProcess};

/// How long a restart waits for the old process before force-killing it.
const RESTART_EXIT_TIMEOUT: Duration = Duration::from_secs(15);
/// Grace after a force kill before a restart gives up.
const RESTART_KILL_GRACE: Duration = Duration::from_secs(5);

type StatusCallback = Arc<dyn Fn(ServerStatus) + Send + Sync>;

struct PendingStop {
    generation: u64,
    resume_to: RunState,
    timer: AbortHandle,
}

struct Runtime {
    settings: ServerSettings,
    banned: Vec<String>,
    pending_save_purge: bool,
    state: RunState,
    pid: Option<u32>,
    /// Bumped on every start so late events from an older process are ignored.
    run_id: u64,
    stop_generation: u64,
    pending_stop: Option<PendingStop>,
    stopping_ends: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    clients: Vec<ClientSession>,
    history: Vec<ClientSession>,
    chat: VecDeque<ChatMessage>,
}

impl Runtime {
    fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.last_error_at = Some(Utc::now());
    }

    fn take_pending_stop(&mut self) -> Option<PendingStop> {
        self.stopping_ends = None;
        let pending = self.pending_stop.take();
        if let Some(p) = &pending {
            p.timer.abort();
        }
        pending
    }

    fn disconnect_all(&mut self, at: DateTime<Utc>) {
        for client in self.clients.drain(..) {
            if let Some(entry) = self
                .history
                .iter_mut()
                .rev()
                .find(|h| h.steam_id == client.steam_id && h.is_online())
            {
                entry.disconnected_at = Some(at);
            }
        }
    }
}

pub struct ServerSupervisor {
    id: u32,
    ctx: ServerContext,
    runtime: Mutex<Runtime>,
    state_tx: watch::Sender<RunState>,
    pub(super) updating: Arc<AtomicBool>,
    restart_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ServerSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rt = self.lock();
        f.debug_struct("ServerSupervisor")
            .field("id", &self.id)
            .field("name", &rt.settings.name)
            .field("state", &rt.state)
            .field("pid", &rt.pid)
            .finish_non_exhaustive()
    }
}

impl ServerSupervisor {
    pub fn new(ctx: ServerContext, record: ServerRecord) -> Arc<Self> {
        let (state_tx, _) = watch::channel(RunState::Stopped);
        Arc::new(Self {
            id: record.id,
            ctx,
            runtime: Mutex::new(Runtime {
                settings: record.settings,
                banned: record.banned,
                pending_save_purge: record.pending_save_purge,
                state: RunState::Stopped,
                pid: None,
                run_id: 0,
                stop_generation: 0,
                pending_stop: None,
                stopping_ends: None,
                started_at: None,
                last_error: None,
                last_error_at: None,
                clients: Vec::new(),
                history: Vec::new(),
                chat: VecDeque::new(),
            }),
            state_tx,
            updating: Arc::new(AtomicBool::new(false)),
            restart_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub(super) fn ctx(&self) -> &ServerContext {
        &self.ctx
    }

    pub fn settings(&self) -> ServerSettings {
        self.lock().settings.clone()
    }

    pub fn name(&self) -> String {
        self.lock().settings.name.clone()
    }

    pub fn port(&self) -> u16 {
        self.lock().settings.port
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn clients(&self) -> Vec<ClientSession> {
        self.lock().clients.clone()
    }

    pub fn client_history(&self) -> Vec<ClientSession> {
        self.lock().history.clone()
    }

    pub fn chat(&self) -> Vec<ChatMessage> {
        self.lock().chat.iter().cloned().collect()
    }

    pub fn bans(&self) -> Vec<String> {
        self.lock().banned.clone()
    }

    pub fn is_update_running(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    pub fn record(&self) -> ServerRecord {
        let rt = self.lock();
        ServerRecord {
            id: self.id,
            settings: rt.settings.clone(),
            banned: rt.banned.clone(),
            pending_save_purge: rt.pending_save_purge,
        }
    }

    pub fn status(&self) -> ServerStatus {
        let rt = self.lock();
        let stopping_eta = rt
            .stopping_ends
            .map(|ends| (ends - Utc::now()).num_seconds().max(0));
        ServerStatus {
            id: self.id,
            name: rt.settings.name.clone(),
            port: rt.settings.port,
            world: rt.settings.world.clone(),
            state: rt.state,
            running: matches!(
                rt.state,
                RunState::Running | RunState::Paused | RunState::Stopping
            ),
            starting: rt.state == RunState::Starting,
            stopping: rt.state == RunState::Stopping,
            paused: rt.state == RunState::Paused,
            stopping_ends: rt.stopping_ends,
            stopping_eta,
            player_count: rt.clients.len(),
            max_players: rt.settings.max_clients,
            updating: self.is_update_running(),
            last_error: rt.last_error.clone(),
            last_error_at: rt.last_error_at,
            pending_save_purge: rt.pending_save_purge,
        }
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Replace the settings. Returns true when saved games became stale.
    pub fn apply_settings(&self, settings: ServerSettings) -> bool {
        let purge = {
            let mut rt = self.lock();
            let purge = rt.settings.start_parameters_differ(&settings);
            if purge {
                rt.pending_save_purge = true;
            }
            rt.settings = settings;
            purge
        };
        self.publish_status();
        purge
    }

    pub fn ban(&self, steam_id: &str) -> bool {
        let steam_id = steam_id.trim();
        if steam_id.is_empty() {
            return false;
        }
        let mut rt = self.lock();
        if rt.banned.iter().any(|b| b == steam_id) {
            return false;
        }
        rt.banned.push(steam_id.to_string());
        true
    }

    pub fn unban(&self, steam_id: &str) -> bool {
        let mut rt = self.lock();
        let before = rt.banned.len();
        rt.banned.retain(|b| b != steam_id.trim());
        rt.banned.len() != before
    }

    fn publish_status(&self) {
        publish(
            self.ctx.events.as_ref(),
            &FleetEvent::ServerStatus(self.status()),
        );
    }

    /// Push the current state to watchers and observers. Call without the lock held.
    fn state_changed(&self) {
        let state = self.state();
        self.state_tx.send_replace(state);
        self.publish_status();
    }

    fn launch_spec(&self, settings: &ServerSettings) -> LaunchSpec {
        let paths = &self.ctx.paths;
        let output_log = paths.server_output_file(self.id);
        let flag = |b: bool| b.to_string();

        let mut args: Vec<String> = vec![
            "-FILE".into(),
            "start".into(),
            settings.name.clone(),
            settings.world_identifier().to_string(),
            settings.difficulty.clone(),
            settings.start_condition.clone(),
            settings.start_location.clone(),
            "-logFile".into(),
            output_log.display().to_string(),
            "-SETTINGSPATH".into(),
            paths.server_settings_file(self.id).display().to_string(),
            "-SETTINGS".into(),
        ];
        let pairs: [(&str, String); 12] = [
            ("ServerVisible", flag(settings.visible)),
            ("GamePort", settings.port.to_string()),
            ("ServerName", settings.name.clone()),
            ("ServerPassword", settings.password.clone()),
            ("ServerAuthSecret", settings.auth_secret.clone()),
            ("ServerMaxPlayers", settings.max_clients.to_string()),
            ("AutoSave", flag(settings.auto_save)),
            ("SaveInterval", settings.save_interval_secs.to_string()),
            ("SavePath", paths.server_dir(self.id).display().to_string()),
            ("AutoPauseServer", flag(settings.auto_pause)),
            ("StartLocalHost", flag(true)),
            ("LocalIpAddress", "0.0.0.0".to_string()),
        ];
        for (key, value) in pairs {
            args.push(key.to_string());
            args.push(value);
        }

        LaunchSpec {
            label: format!("server {}", self.id),
            program: paths.server_executable(self.id),
            args,
            working_dir: paths.server_game_dir(self.id),
            log_file: Some(output_log),
        }
    }

    /// Start the server process. A no-op unless the server is stopped.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let (run_id, settings, purge) = {
            let mut rt = self.lock();
            if rt.state != RunState::Stopped {
                log::info!("Server {} start ignored: {:?}", self.id, rt.state);
                return Ok(());
            }
            rt.state = RunState::Starting;
            rt.run_id += 1;
            rt.last_error = None;
            rt.last_error_at = None;
            (rt.run_id, rt.settings.clone(), rt.pending_save_purge)
        };
        self.state_changed();

        if purge {
            log::warn!(
                "Server {} start parameters changed; existing saves no longer match and a new world is created",
                self.id
            );
        }

        let exe = self.ctx.paths.server_executable(self.id);
        let stale_channel = read_deploy_snapshot(&self.ctx.paths, self.id)
            .is_some_and(|s| s.channel != channel_name(settings.beta));
        if stale_channel {
            log::info!(
                "Server {} files are from another channel, redeploying",
                self.id
            );
        }
        if settings.auto_update || stale_channel || !exe.exists() {
            self.pre_start_deploy().await;
        }

        let spec = self.launch_spec(&settings);
        if let Err(e) = std::fs::create_dir_all(self.ctx.paths.server_logs_dir(self.id)) {
            log::warn!("Failed to create logs dir for server {}: {}", self.id, e);
        }

        let spawned = {
            let mut rt = self.lock();
            if rt.state != RunState::Starting || rt.run_id != run_id {
                log::info!("Server {} start abandoned: stopped while preparing", self.id);
                return Ok(());
            }
            match self.ctx.control.spawn(&spec) {
                Ok(process) => {
                    rt.pid = Some(process.pid);
                    rt.started_at = Some(Utc::now());
                    rt.pending_save_purge = false;
                    Ok(process)
                }
                Err(e) => {
                    rt.state = RunState::Stopped;
                    rt.record_error(e.message());
                    Err(e)
                }
            }
        };

        match spawned {
            Ok(process) => {
                log::info!("Server {} started (pid: {})", self.id, process.pid);
                self.spawn_monitor(run_id, process);
                Ok(())
            }
            Err(e) => {
                log::error!("Server {} failed to start: {}", self.id, e);
                self.state_changed();
                Err(e)
            }
        }
    }

    async fn pre_start_deploy(self: &Arc<Self>) {
        let Some(guard) = self.try_begin_update() else {
            log::info!(
                "Server {} pre-start deploy skipped: update already running",
                self.id
            );
            return;
        };
        let this = Arc::clone(self);
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            this.deploy(&|_, _, _| {})
        });
        if let Err(e) = crate::task::join_guarded(handle, "pre-start deploy").await {
            log::error!("Server {} pre-start deploy failed: {}", self.id, e);
        }
    }

    fn spawn_monitor(self: &Arc<Self>, run_id: u64, process: SpawnedProcess) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let SpawnedProcess {
                pid,
                mut exit,
                mut lines,
            } = process;
            let mut lines_open = true;
            let info = loop {
                tokio::select! {
                    res = &mut exit => break res.unwrap_or_else(|_| ExitInfo::failure(None)),
                    line = lines.recv(), if lines_open => match line {
                        Some(line) => this.handle_line(run_id, &line),
                        None => lines_open = false,
                    },
                }
            };
            while let Ok(line) = lines.try_recv() {
                this.handle_line(run_id, &line);
            }
            this.handle_exit(run_id, pid, info);
        });
    }

    fn handle_line(&self, run_id: u64, line: &str) {
        let Some(event) = classify(line) else {
            return;
        };
        let (changed, state_moved) = {
            let mut rt = self.lock();
            if rt.run_id != run_id {
                return;
            }
            let before = rt.state;
            let changed = apply_log_event(&mut rt, event);
            (changed, rt.state != before)
        };
        if state_moved {
            log::info!("Server {} is now {:?}", self.id, self.state());
            self.state_changed();
        } else if changed {
            self.publish_status();
        }
    }

    fn handle_exit(&self, run_id: u64, pid: u32, info: ExitInfo) {
        {
            let mut rt = self.lock();
            if rt.run_id != run_id {
                return;
            }
            let was = rt.state;
            rt.state = RunState::Stopped;
            rt.pid = None;
            rt.started_at = None;
            rt.take_pending_stop();
            if was == RunState::Starting && !info.success && rt.last_error.is_none() {
                rt.record_error(format!(
                    "process exited during startup (code {:?})",
                    info.code
                ));
            }
            rt.disconnect_all(Utc::now());
            rt.chat.clear();
        }
        log::info!(
            "Server {} process {} exited (code {:?})",
            self.id,
            pid,
            info.code
        );
        self.state_changed();
    }

    /// Stop now. Returns once the stop has been issued.
    pub fn stop(self: &Arc<Self>) -> Result<()> {
        let target = {
            let mut rt = self.lock();
            match rt.state {
                RunState::Stopped => return Ok(()),
                RunState::Stopping if rt.pending_stop.is_none() => return Ok(()),
                _ => {}
            }
            rt.take_pending_stop();
            match rt.pid {
                Some(pid) => {
                    rt.state = RunState::Stopping;
                    Some((pid, rt.run_id))
                }
                None => {
                    // Still preparing: `start` sees the change and never spawns.
                    rt.state = RunState::Stopped;
                    None
                }
            }
        };
        self.state_changed();
        match target {
            Some((pid, run_id)) => self.issue_stop(pid, run_id),
            None => Ok(()),
        }
    }

    fn issue_stop(self: &Arc<Self>, pid: u32, run_id: u64) -> Result<()> {
        log::info!("Stopping server {} (pid: {})", self.id, pid);
        if let Err(e) = self.ctx.control.signal_stop(pid) {
            log::warn!(
                "Graceful stop of server {} failed, force killing: {}",
                self.id,
                e
            );
            return self.ctx.control.force_kill(pid);
        }
        self.spawn_stop_watchdog(pid, run_id);
        Ok(())
    }

    fn spawn_stop_watchdog(self: &Arc<Self>, pid: u32, run_id: u64) {
        let this = Arc::clone(self);
        let timeout = self.ctx.graceful_stop_timeout;
        tokio::spawn(async move {
            if this.wait_for_stopped(timeout).await {
                return;
            }
            let still_running = {
                let rt = this.lock();
                rt.run_id == run_id && rt.pid == Some(pid)
            };
            if still_running {
                log::warn!(
                    "Server {} did not exit within {:?}, force killing",
                    this.id,
                    timeout
                );
                if let Err(e) = this.ctx.control.force_kill(pid) {
                    log::error!("Failed to force kill server {}: {}", this.id, e);
                }
            }
        });
    }

    /// Wait until the server reports Stopped. Returns false on timeout.
    pub async fn wait_for_stopped(&self, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == RunState::Stopped))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Stop after the configured shutdown delay.
    ///
    /// Returns false when the server is neither running nor paused. With a
    /// zero delay this is `stop`. Otherwise the server moves to Stopping,
    /// `on_change` sees the scheduled state, and again once the stop is issued
    /// unless `cancel_stop` wins first.
    pub fn stop_async<F>(self: &Arc<Self>, on_change: F) -> Result<bool>
    where
        F: Fn(ServerStatus) + Send + Sync + 'static,
    {
        let on_change: StatusCallback = Arc::new(on_change);
        let scheduled = {
            let mut rt = self.lock();
            if !matches!(rt.state, RunState::Running | RunState::Paused) {
                return Ok(false);
            }
            let delay_secs = rt.settings.shutdown_delay_secs;
            if delay_secs == 0 {
                false
            } else {
                rt.stop_generation += 1;
                let generation = rt.stop_generation;
                let delay = Duration::from_secs(delay_secs);
                let this = Arc::clone(self);
                let callback = Arc::clone(&on_change);
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if this.fire_pending_stop(generation) {
                        callback(this.status());
                    }
                });
                rt.pending_stop = Some(PendingStop {
                    generation,
                    resume_to: rt.state,
                    timer: timer.abort_handle(),
                });
                rt.state = RunState::Stopping;
                let offset = i64::try_from(delay_secs)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .unwrap_or_default();
                rt.stopping_ends = Some(Utc::now() + offset);
                true
            }
        };

        if scheduled {
            log::info!("Server {} stop scheduled", self.id);
            self.state_changed();
        } else {
            self.stop()?;
        }
        on_change(self.status());
        Ok(true)
    }

    /// Timer body. Only the generation that scheduled the stop may issue it.
    fn fire_pending_stop(self: &Arc<Self>, generation: u64) -> bool {
        let target = {
            let mut rt = self.lock();
            let current = rt.state == RunState::Stopping
                && rt
                    .pending_stop
                    .as_ref()
                    .is_some_and(|p| p.generation == generation);
            if !current {
                return false;
            }
            rt.pending_stop = None;
            rt.stopping_ends = None;
            match rt.pid {
                Some(pid) => Some((pid, rt.run_id)),
                None => {
                    rt.state = RunState::Stopped;
                    None
                }
            }
        };
        self.state_changed();
        if let Some((pid, run_id)) = target {
            if let Err(e) = self.issue_stop(pid, run_id) {
                log::error!("Delayed stop of server {} failed: {}", self.id, e);
                self.lock().record_error(e.message());
            }
        }
        true
    }

    /// Cancel a scheduled stop. False when none is pending.
    pub fn cancel_stop(&self) -> bool {
        let cancelled = {
            let mut rt = self.lock();
            if rt.state != RunState::Stopping {
                return false;
            }
            match rt.take_pending_stop() {
                Some(pending) => {
                    rt.state = pending.resume_to;
                    true
                }
                None => false,
            }
        };
        if cancelled {
            log::info!("Server {} scheduled stop cancelled", self.id);
            self.state_changed();
        }
        cancelled
    }

    pub fn has_pending_stop(&self) -> bool {
        self.lock().pending_stop.is_some()
    }

    fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.lock().settings.restart_delay_secs)
    }

    /// Stop, wait for the old process to exit, then start again.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        let _serial = self.restart_lock.lock().await;

        if self.state().is_alive() {
            self.stop()?;
            if !self.wait_for_stopped(RESTART_EXIT_TIMEOUT).await {
                if let Some(pid) = self.pid() {
                    log::warn!("Server {} still running after stop, force killing", self.id);
                    self.ctx.control.force_kill(pid)?;
                }
                if !self.wait_for_stopped(RESTART_KILL_GRACE).await {
                    return Err(FleetError::process(format!(
                        "server {} did not exit for restart",
                        self.id
                    )));
                }
            }
            let delay = self.restart_delay();
            if !delay.is_zero() {
                log::info!("Server {} restarting in {:?}", self.id, delay);
                tokio::time::sleep(delay).await;
            }
        }

        self.start().await
    }
}

/// Apply one recognized log event. Returns whether anything changed.
fn apply_log_event(rt: &mut Runtime, event: LogEvent) -> bool {
    match event {
        LogEvent::Ready => {
            if rt.state == RunState::Starting {
                rt.state = RunState::Running;
                return true;
            }
            false
        }
        LogEvent::Paused => match rt.state {
            RunState::Running => {
                rt.state = RunState::Paused;
                true
            }
            RunState::Stopping => match rt.pending_stop.as_mut() {
                Some(pending) => {
                    pending.resume_to = RunState::Paused;
                    true
                }
                None => false,
            },
            _ => false,
        },
        LogEvent::Resumed => match rt.state {
            RunState::Paused => {
                rt.state = RunState::Running;
                true
            }
            RunState::Stopping => match rt.pending_stop.as_mut() {
                Some(pending) => {
                    pending.resume_to = RunState::Running;
                    true
                }
                None => false,
            },
            _ => false,
        },
        LogEvent::ClientReady { name, steam_id } => {
            if rt.clients.iter().any(|c| c.steam_id == steam_id) {
                return false;
            }
            let session = ClientSession {
                steam_id,
                name,
                connected_at: Utc::now(),
                disconnected_at: None,
            };
            rt.history.push(session.clone());
            rt.clients.push(session);
            true
        }
        LogEvent::ClientLeft { steam_id, .. } => {
            let Some(pos) = rt.clients.iter().position(|c| c.steam_id == steam_id) else {
                return false;
            };
            rt.clients.remove(pos);
            let now = Utc::now();
            if let Some(entry) = rt
                .history
                .iter_mut()
                .rev()
                .find(|h| h.steam_id == steam_id && h.is_online())
            {
                entry.disconnected_at = Some(now);
            }
            true
        }
        LogEvent::Chat { name, message } => {
            let known = rt
                .clients
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&name));
            if !known {
                return false;
            }
            rt.chat.push_back(ChatMessage {
                at: Utc::now(),
                name,
                message,
            });
            while rt.chat.len() > CHAT_RETENTION {
                rt.chat.pop_front();
            }
            true
        }
        LogEvent::Fatal(line) => {
            rt.record_error(line);
            true
        }
    }
}
