//! Per-job bookkeeping for intermediate files.
//!
//! Every ephemeral file a job stages is registered here before it is
//! written. The owning job drains the registry once its outcome is known;
//! dropping a registry that still holds paths drains it as well, so an
//! early return or a panic cannot leave temp files behind.

use crate::{EngineError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct TempFileRegistry {
    pending: Vec<PathBuf>,
}

impl TempFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.pending.iter().any(|p| p == &path) {
            return;
        }
        debug!(path = %path.display(), "registered temp file");
        self.pending.push(path);
    }

    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.pending.iter().any(|p| p == path)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes every registered file and empties the registry.
    ///
    /// A file that is already gone counts as removed. Every other failure
    /// is collected and returned; the registry is empty afterwards either way.
    pub fn drain(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut failures = Vec::new();
        for path in self.pending.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed temp file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "temp file already gone");
                }
                Err(e) => failures.push((path, e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::TempCleanupFailed { failures })
        }
    }
}

impl Drop for TempFileRegistry {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Err(err) = self.drain() {
            warn!("temp cleanup on drop failed: {err}");
        }
    }
}
