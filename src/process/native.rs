//! Real process control on top of `tokio::process`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use super::control::{force_kill, graceful_signal};
use super::{ExitInfo, LaunchSpec, ProcessControl, SpawnedProcess};
use crate::error::{FleetError, Result};
use crate::logtail::LogCursor;

const LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);
const LOG_POLL_MAX_BYTES: u64 = 256 * 1024;

#[derive(Debug, Default)]
pub struct NativeProcessControl;

impl NativeProcessControl {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessControl for NativeProcessControl {
    fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedProcess> {
        if !spec.program.exists() {
            return Err(FleetError::process(format!(
                "executable not found: {}",
                spec.program.display()
            )));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| FleetError::process(format!("Failed to start {}: {}", spec.label, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| FleetError::process("Failed to get process ID"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FleetError::process("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FleetError::process("Failed to capture stderr"))?;

        let (line_tx, lines) = mpsc::unbounded_channel();
        let (exit_tx, exit) = oneshot::channel();
        let (follow_stop_tx, follow_stop_rx) = oneshot::channel::<()>();

        let label = spec.label.clone();
        let stdout_lines = line_tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                log::info!("[{} stdout] {}", label, line);
                let _ = stdout_lines.send(line);
            }
        });

        let label = spec.label.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                log::error!("[{} stderr] {}", label, line);
            }
        });

        if let Some(log_file) = spec.log_file.clone() {
            tokio::spawn(follow_log_file(log_file, line_tx, follow_stop_rx));
        }

        let label = spec.label.clone();
        tokio::spawn(async move {
            let info = match child.wait().await {
                Ok(status) => ExitInfo {
                    code: status.code(),
                    success: status.success(),
                },
                Err(e) => {
                    log::warn!("Failed to wait for {}: {}", label, e);
                    ExitInfo::failure(None)
                }
            };
            log::info!("{} process {} exited ({:?})", label, pid, info.code);
            let _ = follow_stop_tx.send(());
            let _ = exit_tx.send(info);
        });

        log::info!("Started {} (pid: {})", spec.label, pid);
        Ok(SpawnedProcess { pid, exit, lines })
    }

    fn signal_stop(&self, pid: u32) -> Result<()> {
        graceful_signal(pid)
    }

    fn force_kill(&self, pid: u32) -> Result<()> {
        force_kill(pid)
    }
}

/// Forward complete lines appended to `path` until `stop` fires, then drain once more.
async fn follow_log_file(
    path: PathBuf,
    lines: mpsc::UnboundedSender<String>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut cursor = LogCursor::tail();
    let mut pending: Vec<u8> = Vec::new();
    let mut ticker = tokio::time::interval(LOG_POLL_INTERVAL);
    loop {
        let stopping = tokio::select! {
            _ = ticker.tick() => false,
            _ = &mut stop => true,
        };

        loop {
            let chunk = match cursor.poll(&path, LOG_POLL_MAX_BYTES) {
                Ok(chunk) => chunk,
                Err(e) => {
                    log::debug!("Log follow of {} failed: {}", path.display(), e);
                    break;
                }
            };
            if chunk.reset {
                // Rewritten file: start over from its first byte.
                cursor = LogCursor::from_start();
                pending.clear();
                continue;
            }
            if chunk.data.is_empty() {
                break;
            }
            pending.extend_from_slice(&chunk.data);
            for line in take_complete_lines(&mut pending) {
                if lines.send(line).is_err() {
                    return;
                }
            }
        }

        if stopping {
            break;
        }
    }
}

/// Split every newline-terminated line off the front of `pending`.
/// Bytes after the last newline stay buffered, so a character split across
/// two reads is decoded whole.
fn take_complete_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let Some(last) = pending.iter().rposition(|b| *b == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = pending.drain(..=last).collect();
    complete
        .split(|b| *b == b'\n')
        .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_line_waits_for_its_newline() {
        let mut pending = b"12:00:01: Bob: hi\n12:00:02: Al".to_vec();
        assert_eq!(take_complete_lines(&mut pending), vec!["12:00:01: Bob: hi"]);
        assert_eq!(pending, b"12:00:02: Al");

        pending.extend_from_slice(b"ice: yo\r\n\n");
        assert_eq!(take_complete_lines(&mut pending), vec!["12:00:02: Alice: yo"]);
        assert!(pending.is_empty());
    }

    #[test]
    fn multibyte_character_split_across_reads_survives() {
        let line = "Client Jos\u{e9} (76561198000000001) is ready\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut pending = line[..split].to_vec();
        assert!(take_complete_lines(&mut pending).is_empty());
        pending.extend_from_slice(&line[split..]);
        assert_eq!(
            take_complete_lines(&mut pending),
            vec!["Client Jos\u{e9} (76561198000000001) is ready"]
        );
    }
}
