//! Deployment jobs for shared components and server files.

mod orchestrator;
mod resolve;

pub use orchestrator::{
    DeployOutcome, DeployPermit, DeployStatus, DeploymentOrchestrator, STAGE_DEPLOYING_SERVERS,
};
pub use resolve::resolve_targets;
