//! Process control seam between the supervisor and the operating system.

mod control;
mod native;

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use crate::error::Result;

pub use native::NativeProcessControl;

/// Everything needed to launch one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Prefix for log lines, e.g. `server 3`.
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// File the process writes its own log to, followed for output lines.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub success: bool,
}

impl ExitInfo {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            success: true,
        }
    }

    pub fn failure(code: Option<i32>) -> Self {
        Self {
            code,
            success: false,
        }
    }
}

/// A running process as seen by the supervisor.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: u32,
    /// Resolves once when the process has exited.
    pub exit: oneshot::Receiver<ExitInfo>,
    /// Output lines, in order, until the process exits.
    pub lines: mpsc::UnboundedReceiver<String>,
}

/// Spawns and signals server processes.
///
/// `spawn` is called from inside a tokio runtime.
pub trait ProcessControl: Send + Sync {
    fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedProcess>;

    /// Ask the process to exit. Returns once the request is issued.
    fn signal_stop(&self, pid: u32) -> Result<()>;

    fn force_kill(&self, pid: u32) -> Result<()>;
}
