//! Supervisor and deployment orchestrator for a fleet of Stationeers dedicated servers.
//!
//! [`FleetCoordinator`] owns the roster of [`server::ServerSupervisor`]s, the
//! shared [`progress::ProgressTracker`] and the single-flight
//! [`deploy::DeploymentOrchestrator`]. Processes, downloads, persistence and
//! event delivery sit behind traits so they can be swapped in tests.

mod archive;
mod download;
mod github;

pub mod component;
pub mod config;
pub mod deploy;
pub mod error;
pub mod events;
pub mod fleet;
pub mod logtail;
pub mod paths;
pub mod platform;
pub mod ports;
pub mod process;
pub mod progress;
pub mod server;
pub mod store;
pub mod task;

pub use error::{ErrorKind, FleetError, Result};
pub use fleet::{FleetCoordinator, FleetParts};
