//! Platform-specific signal delivery.

use crate::error::{FleetError, Result};

/// Ask a process to shut down on its own.
#[cfg(unix)]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| FleetError::process(format!("invalid pid {pid}")))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|e| FleetError::process(format!("Failed to send SIGTERM to PID {}: {}", pid, e)))
}

/// Ask a process to shut down on its own.
#[cfg(windows)]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    run_taskkill(pid, false)
}

#[cfg(windows)]
fn run_taskkill(pid: u32, force: bool) -> Result<()> {
    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let output = std::process::Command::new("taskkill")
        .args(&args)
        .output()
        .map_err(|e| FleetError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    Err(FleetError::process(format!(
        "taskkill failed for pid {}: {}",
        pid,
        if detail.is_empty() { "(no output)" } else { detail }
    )))
}

#[cfg(windows)]
pub(super) fn force_kill(pid: u32) -> Result<()> {
    run_taskkill(pid, true)
}

/// Kill the process group the server was started in, falling back to the pid alone.
#[cfg(unix)]
pub(super) fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let raw = i32::try_from(pid).map_err(|_| FleetError::process(format!("invalid pid {pid}")))?;
    let target = Pid::from_raw(raw);
    match getpgid(Some(target)) {
        Ok(pgid) => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            FleetError::process(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            FleetError::process(format!(
                "Failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}
