use crate::jobs::CancelFlag;
use crate::{EngineError, Result};
use std::ffi::OsStr;
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL_MS: u64 = 200;

pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    // Keep tool runs from flashing a console window.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

#[derive(Debug)]
pub enum CommandRunError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    Canceled,
    TimedOut(u64),
}

impl CommandRunError {
    /// Maps a run failure onto the engine error for `tool`.
    pub fn into_engine_error(self, tool: &str) -> EngineError {
        match self {
            CommandRunError::Spawn(e) if e.kind() == std::io::ErrorKind::NotFound => {
                EngineError::ExternalToolMissing {
                    tool: tool.to_string(),
                }
            }
            CommandRunError::Spawn(e) | CommandRunError::Wait(e) => EngineError::Io(e),
            CommandRunError::Canceled => EngineError::Canceled,
            CommandRunError::TimedOut(secs) => EngineError::TimedOut {
                tool: tool.to_string(),
                secs,
            },
        }
    }
}

fn kill_child_process_tree(child: &mut std::process::Child) {
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        let _ = command("taskkill").args(["/PID", &pid, "/T", "/F"]).status();
    }

    let _ = child.kill();
    let _ = child.wait();
}

/// Runs `cmd` to completion with captured stdout/stderr.
///
/// The child is killed when `cancel` is raised or when it outlives
/// `timeout_secs` (0 means no limit).
pub fn run_controlled(
    cmd: &mut Command,
    cancel: Option<&CancelFlag>,
    timeout_secs: u64,
) -> std::result::Result<Output, CommandRunError> {
    use std::io::ErrorKind;

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(CommandRunError::Spawn)?;

    let mut stdout = child.stdout.take().ok_or_else(|| {
        CommandRunError::Wait(std::io::Error::new(ErrorKind::Other, "stdout pipe missing"))
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        CommandRunError::Wait(std::io::Error::new(ErrorKind::Other, "stderr pipe missing"))
    })?;

    let stdout_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let started = Instant::now();
    let mut abort_reason: Option<CommandRunError> = None;

    loop {
        if abort_reason.is_none() && cancel.is_some_and(CancelFlag::is_canceled) {
            kill_child_process_tree(&mut child);
            abort_reason = Some(CommandRunError::Canceled);
        }
        if abort_reason.is_none()
            && timeout_secs > 0
            && started.elapsed() >= Duration::from_secs(timeout_secs)
        {
            kill_child_process_tree(&mut child);
            abort_reason = Some(CommandRunError::TimedOut(timeout_secs));
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let stdout = stdout_handle.join().unwrap_or_default();
                let stderr = stderr_handle.join().unwrap_or_default();
                if let Some(reason) = abort_reason {
                    return Err(reason);
                }
                return Ok(Output {
                    status,
                    stdout,
                    stderr,
                });
            }
            Ok(None) => thread::sleep(Duration::from_millis(POLL_INTERVAL_MS)),
            Err(err) => {
                kill_child_process_tree(&mut child);
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(CommandRunError::Wait(err));
            }
        }
    }
}

/// Like [`run_controlled`], but a non-zero exit becomes
/// [`EngineError::ExternalToolFailed`] carrying the captured output.
pub fn run_checked(
    tool: &str,
    cmd: &mut Command,
    cancel: Option<&CancelFlag>,
    timeout_secs: u64,
) -> Result<Output> {
    let output = run_controlled(cmd, cancel, timeout_secs).map_err(|e| e.into_engine_error(tool))?;
    if !output.status.success() {
        return Err(EngineError::ExternalToolFailed {
            tool: tool.to_string(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_stderr() {
        let mut cmd = command("sh");
        cmd.args(["-c", "echo out; echo err >&2"]);
        let output = run_checked("sh", &mut cmd, None, 10).expect("run");
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
    }

    #[test]
    fn non_zero_exit_carries_captured_output() {
        let mut cmd = command("sh");
        cmd.args(["-c", "echo progress; echo broken >&2; exit 3"]);
        let err = run_checked("sh", &mut cmd, None, 10).expect_err("must fail");
        match err {
            EngineError::ExternalToolFailed {
                tool,
                code,
                stdout,
                stderr,
            } => {
                assert_eq!(tool, "sh");
                assert_eq!(code, Some(3));
                assert_eq!(stdout, "progress");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_reported_as_missing_tool() {
        let mut cmd = command("mudl-definitely-not-installed");
        let err = run_checked("ffmpeg", &mut cmd, None, 10).expect_err("must fail");
        assert!(
            matches!(err, EngineError::ExternalToolMissing { ref tool } if tool == "ffmpeg"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn raised_cancel_flag_kills_the_child() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut cmd = command("sh");
        cmd.args(["-c", "exec sleep 30"]);
        let started = Instant::now();
        let err = run_controlled(&mut cmd, Some(&cancel), 0).expect_err("must abort");
        assert!(matches!(err, CommandRunError::Canceled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn timeout_kills_the_child() {
        let mut cmd = command("sh");
        cmd.args(["-c", "exec sleep 30"]);
        let err = run_controlled(&mut cmd, None, 1).expect_err("must time out");
        assert!(matches!(err, CommandRunError::TimedOut(1)));
    }
}
