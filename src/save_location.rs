use crate::config::{SaveMode, Settings};
use crate::paths::AppPaths;
use std::path::{Path, PathBuf};

/// Decides where a job writes its output. `None` means the user declined.
pub trait SaveLocationResolver: Send + Sync {
    fn resolve(&self) -> Option<PathBuf>;
}

/// Asks the user for a directory, starting from `initial`.
/// Returns the raw answer; a blank answer means the prompt was cancelled.
pub trait DirectoryPrompt: Send + Sync {
    fn ask(&self, initial: &Path) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct FixedSaveLocation(pub PathBuf);

impl SaveLocationResolver for FixedSaveLocation {
    fn resolve(&self) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

/// Declines every request. Handy for callers with no way to pick a directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSaveLocation;

impl SaveLocationResolver for NoSaveLocation {
    fn resolve(&self) -> Option<PathBuf> {
        None
    }
}

/// Follows the `save_mode` setting: the default directory in auto mode,
/// a prompt otherwise.
pub struct ConfiguredSaveLocation {
    mode: SaveMode,
    default_dir: PathBuf,
    prompt: Box<dyn DirectoryPrompt>,
}

impl ConfiguredSaveLocation {
    pub fn new(settings: &Settings, paths: &AppPaths, prompt: Box<dyn DirectoryPrompt>) -> Self {
        Self {
            mode: settings.save_mode,
            default_dir: settings.effective_save_dir(paths),
            prompt,
        }
    }
}

impl SaveLocationResolver for ConfiguredSaveLocation {
    fn resolve(&self) -> Option<PathBuf> {
        match self.mode {
            SaveMode::Auto => Some(self.default_dir.clone()),
            SaveMode::Prompt => {
                let answer = self.prompt.ask(&self.default_dir)?;
                let trimmed = answer.trim();
                if trimmed.is_empty() {
                    return None;
                }
                Some(PathBuf::from(trimmed))
            }
        }
    }
}
