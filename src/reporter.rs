use crate::{cmd, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus};
use std::thread;

pub const REVEAL_FILE_LABEL: &str = "Show File in Folder";

/// User-facing sink for job progress. Calls are fire-and-forget.
pub trait JobReporter: Send + Sync {
    fn info(&self, msg: &str);
    fn error(&self, msg: &str);
    fn success(&self, msg: &str);
    /// Offers the user a way to open `path` in their file browser.
    fn add_open_file_action(&self, label: &str, path: &Path);
}

/// Writes job messages to stdout/stderr.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    reveal_on_action: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the file browser immediately when an open-file action is offered.
    pub fn with_auto_reveal(mut self, enabled: bool) -> Self {
        self.reveal_on_action = enabled;
        self
    }
}

impl JobReporter for ConsoleReporter {
    fn info(&self, msg: &str) {
        println!("[info] {msg}");
    }

    fn error(&self, msg: &str) {
        eprintln!("[error] {msg}");
    }

    fn success(&self, msg: &str) {
        println!("[done] {msg}");
        let _ = std::io::stdout().flush();
    }

    fn add_open_file_action(&self, label: &str, path: &Path) {
        println!("[{label}] {}", path.display());
        if self.reveal_on_action {
            if let Err(err) = reveal_in_file_browser(path) {
                eprintln!("[error] could not open file browser: {err}");
            }
        }
    }
}

/// Routes job messages into `tracing` only, for headless callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl JobReporter for TracingReporter {
    fn info(&self, msg: &str) {
        tracing::info!(target: "mudl::job", "{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!(target: "mudl::job", "{msg}");
    }

    fn success(&self, msg: &str) {
        tracing::info!(target: "mudl::job", success = true, "{msg}");
    }

    fn add_open_file_action(&self, label: &str, path: &Path) {
        tracing::info!(target: "mudl::job", path = %path.display(), "{label}");
    }
}

/// Opens the platform file browser with `path` selected where supported.
pub fn reveal_in_file_browser(path: &Path) -> Result<()> {
    let mut command = if cfg!(windows) {
        let mut c = cmd::command("explorer");
        c.arg(format!("/select,{}", path.display()));
        c
    } else if cfg!(target_os = "macos") {
        let mut c = cmd::command("open");
        c.arg("-R").arg(path);
        c
    } else {
        let mut c = cmd::command("xdg-open");
        c.arg(path.parent().unwrap_or(path));
        c
    };
    // Explorer exits non-zero even on success, so only spawn failures count.
    spawn_reaped(&mut command)?;
    Ok(())
}

/// Spawns `command` and waits for it on a detached thread so the child is
/// reaped without blocking the caller.
fn spawn_reaped(command: &mut Command) -> Result<thread::JoinHandle<Option<ExitStatus>>> {
    let mut child = command.spawn()?;
    Ok(thread::spawn(move || child.wait().ok()))
}
