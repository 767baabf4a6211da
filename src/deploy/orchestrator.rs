//! Single-flight deployment of shared components and server files.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;

use super::resolve::resolve_targets;
use crate::component::{missing_components, Component, DeployKind, Installer, ProgressFn};
use crate::error::{FleetError, Result};
use crate::events::{publish, EventSink, FleetEvent};
use crate::progress::{ProgressKey, ProgressTracker, STAGE_COMPLETED, STAGE_FAILED, STAGE_QUEUED};
use crate::server::Roster;
use crate::task::catch_panic;

pub const STAGE_DEPLOYING_SERVERS: &str = "Deploying servers";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeployStatus {
    Idle,
    Running,
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployOutcome {
    NoActionNeeded,
    Started,
}

/// Proof of holding the fleet-wide deploy slot. Dropping it frees the slot.
pub struct DeployPermit {
    orchestrator: Arc<DeploymentOrchestrator>,
    kind: DeployKind,
}

impl DeployPermit {
    pub fn kind(&self) -> DeployKind {
        self.kind
    }
}

impl Drop for DeployPermit {
    fn drop(&mut self) {
        self.orchestrator.release();
    }
}

pub struct DeploymentOrchestrator {
    installer: Arc<dyn Installer>,
    progress: Arc<ProgressTracker>,
    roster: Arc<Roster>,
    events: Arc<dyn EventSink>,
    current: Mutex<Option<DeployKind>>,
    status: Mutex<DeployStatus>,
    deploy_errors: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl DeploymentOrchestrator {
    pub fn new(
        installer: Arc<dyn Installer>,
        progress: Arc<ProgressTracker>,
        roster: Arc<Roster>,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            installer,
            progress,
            roster,
            events,
            current: Mutex::new(None),
            status: Mutex::new(DeployStatus::Idle),
            deploy_errors: Mutex::new(Vec::new()),
        })
    }

    /// Claim the deploy slot for `kind`, or `None` while another job holds it.
    pub fn try_acquire(self: &Arc<Self>, kind: DeployKind) -> Option<DeployPermit> {
        {
            let mut current = lock(&self.current);
            if current.is_some() {
                return None;
            }
            *current = Some(kind);
        }
        *lock(&self.status) = DeployStatus::Running;
        Some(DeployPermit {
            orchestrator: Arc::clone(self),
            kind,
        })
    }

    fn release(&self) {
        {
            let mut status = lock(&self.status);
            if *status == DeployStatus::Running {
                *status = DeployStatus::Failed("deploy interrupted".to_string());
            }
        }
        *lock(&self.current) = None;
    }

    fn acquire_or_conflict(self: &Arc<Self>, kind: DeployKind) -> Result<DeployPermit> {
        self.try_acquire(kind).ok_or_else(|| {
            let running = self.current_job().map_or("unknown", DeployKind::as_str);
            FleetError::deploy_in_progress(running)
        })
    }

    pub fn current_job(&self) -> Option<DeployKind> {
        *lock(&self.current)
    }

    pub fn is_running(&self) -> bool {
        self.current_job().is_some()
    }

    pub fn status(&self) -> DeployStatus {
        lock(&self.status).clone()
    }

    /// Errors of the most recent run.
    pub fn deploy_errors(&self) -> Vec<String> {
        lock(&self.deploy_errors).clone()
    }

    pub fn is_installed(&self, component: Component) -> bool {
        self.installer.is_installed(component)
    }

    pub fn missing_components(&self) -> Vec<String> {
        let needs_beta = self.roster.snapshot().iter().any(|s| s.settings().beta);
        missing_components(self.installer.as_ref(), needs_beta)
    }

    /// Launch `kind` in the background. Fails fast while another job runs.
    pub fn start_deploy_async(self: &Arc<Self>, kind: DeployKind) -> Result<()> {
        let permit = self.acquire_or_conflict(kind)?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.run_job(permit, &kind.steps()).await;
        });
        Ok(())
    }

    /// Run `kind` to completion.
    pub async fn deploy(self: &Arc<Self>, kind: DeployKind) -> Result<()> {
        let permit = self.acquire_or_conflict(kind)?;
        self.run_job(permit, &kind.steps()).await
    }

    /// Run `steps` in order under a single permit labelled `kind`.
    pub async fn deploy_sequence(
        self: &Arc<Self>,
        kind: DeployKind,
        steps: &[DeployKind],
    ) -> Result<()> {
        let permit = self.acquire_or_conflict(kind)?;
        self.run_job(permit, steps).await
    }

    /// Start `kind` unless the component it installs is already present.
    pub fn ensure_component(self: &Arc<Self>, kind: DeployKind) -> Result<DeployOutcome> {
        if let Some(component) = kind.component() {
            if self.installer.is_installed(component) {
                log::info!("{} already installed", component.display_name());
                return Ok(DeployOutcome::NoActionNeeded);
            }
        }
        self.start_deploy_async(kind)?;
        Ok(DeployOutcome::Started)
    }

    /// Install whatever is missing, in the background.
    pub fn start_setup_async(self: &Arc<Self>) -> Result<DeployOutcome> {
        let missing = self.missing_components();
        if missing.is_empty() {
            log::info!("All components installed, no action needed");
            return Ok(DeployOutcome::NoActionNeeded);
        }
        let steps: Vec<DeployKind> = resolve_targets(&missing, self.roster.len())
            .into_iter()
            .flat_map(DeployKind::steps)
            .collect();
        log::info!("Setup: missing {:?}, running {:?}", missing, steps);

        let permit = self.acquire_or_conflict(DeployKind::All)?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.run_job(permit, &steps).await;
        });
        Ok(DeployOutcome::Started)
    }

    async fn run_job(self: &Arc<Self>, permit: DeployPermit, steps: &[DeployKind]) -> Result<()> {
        let kind = permit.kind();
        let started = Instant::now();
        log::info!("Deploy {} started: {:?}", kind, steps);

        let mut errors = Vec::new();
        for step in steps {
            errors.extend(self.run_step(*step).await);
        }

        let missing = self.missing_components();
        if !missing.is_empty() {
            log::warn!("Components still missing after deploy {}: {}", kind, missing.join(", "));
            let targeted: Vec<&str> = missing
                .iter()
                .filter(|name| {
                    Component::from_display_name(name)
                        .map(DeployKind::from)
                        .is_none_or(|k| steps.contains(&k))
                })
                .map(String::as_str)
                .collect();
            if !targeted.is_empty() {
                errors.push(format!("Missing components: {}", targeted.join(", ")));
            }
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = if errors.is_empty() {
            log::info!("Deploy {} completed in {} ms", kind, duration_ms);
            *lock(&self.status) = DeployStatus::Completed;
            Ok(())
        } else {
            let joined = errors.join("; ");
            log::error!("Deploy {} failed in {} ms: {}", kind, duration_ms, joined);
            *lock(&self.status) = DeployStatus::Failed(joined.clone());
            Err(FleetError::deploy(joined))
        };
        *lock(&self.deploy_errors) = errors.clone();

        publish(
            self.events.as_ref(),
            &FleetEvent::DeployCompleted {
                kind,
                duration_ms,
                errors,
            },
        );
        drop(permit);
        outcome
    }

    /// Run one step, returning its errors. Panics become errors.
    async fn run_step(self: &Arc<Self>, step: DeployKind) -> Vec<String> {
        match step.component() {
            Some(component) => self
                .install_component(step, component)
                .await
                .err()
                .into_iter()
                .collect(),
            None if step == DeployKind::Servers => self.redeploy_servers().await,
            None => {
                let mut errors = Vec::new();
                for sub in step.steps() {
                    if let Some(component) = sub.component() {
                        errors.extend(self.install_component(sub, component).await.err());
                    } else {
                        errors.extend(self.redeploy_servers().await);
                    }
                }
                errors
            }
        }
    }

    async fn install_component(
        &self,
        step: DeployKind,
        component: Component,
    ) -> std::result::Result<(), String> {
        let key = ProgressKey::Deploy(step);
        self.progress.begin(key, STAGE_QUEUED);

        let tracker = Arc::clone(&self.progress);
        let report: ProgressFn = Arc::new(move |stage, done, total| {
            tracker.update(key, stage, done, total);
        });
        let what = format!("{} deploy", component.display_name());
        let result = catch_panic(self.installer.install(component, report), &what).await;

        match result {
            Ok(()) => {
                self.progress.complete(key, STAGE_COMPLETED, None);
                Ok(())
            }
            Err(e) => {
                let message = format!("{} deploy failed: {}", component.display_name(), e.message());
                log::error!("{}", message);
                self.progress.complete(key, STAGE_FAILED, Some(e.message()));
                Err(message)
            }
        }
    }

    /// Redeploy every server's files. Servers already updating are skipped as errors.
    async fn redeploy_servers(self: &Arc<Self>) -> Vec<String> {
        let key = ProgressKey::Deploy(DeployKind::Servers);
        self.progress.begin(key, STAGE_QUEUED);

        let servers = self.roster.snapshot();
        let total = servers.len() as u64;
        let mut errors = Vec::new();
        for (done, server) in servers.iter().enumerate() {
            self.progress
                .update(key, STAGE_DEPLOYING_SERVERS, done as u64, total);
            let name = server.name();
            if self.roster.find(server.id()).is_none() {
                log::info!("Server {} was deleted, skipping redeploy", server.id());
                continue;
            }
            let Some(_guard) = server.try_begin_update() else {
                errors.push(format!(
                    "Server {} deploy failed: update already in progress",
                    name
                ));
                continue;
            };
            let server_key = ProgressKey::Server(server.id());
            self.progress.begin(server_key, STAGE_QUEUED);
            match server.redeploy_tracked(&self.progress).await {
                Ok(()) => self.progress.complete(server_key, STAGE_COMPLETED, None),
                Err(e) => {
                    self.progress
                        .complete(server_key, STAGE_FAILED, Some(e.message()));
                    errors.push(format!("Server {} deploy failed: {}", name, e.message()));
                }
            }
        }

        if errors.is_empty() {
            self.progress.complete(key, STAGE_COMPLETED, None);
        } else {
            self.progress
                .complete(key, STAGE_FAILED, Some(errors.join("; ")));
        }
        errors
    }
}
