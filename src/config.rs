use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Ask for a directory before every download.
    Prompt,
    /// Always save into the default directory.
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub save_mode: SaveMode,
    pub default_save_dir: Option<PathBuf>,
    /// Explicit transcoder executable; the bundled or PATH copy otherwise.
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit yt-dlp executable, tried before the bundled and PATH copies.
    pub ytdlp_path: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub ytdlp_timeout_secs: u64,
    /// 0 disables the limit.
    pub transcode_timeout_secs: u64,
    /// Resolve the URL host before starting a job, failing early when it is unreachable.
    pub resolve_host: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            save_mode: SaveMode::Prompt,
            default_save_dir: None,
            ffmpeg_path: None,
            ytdlp_path: None,
            http_timeout_secs: 60,
            ytdlp_timeout_secs: 7200,
            transcode_timeout_secs: 0,
            resolve_host: true,
        }
    }
}

impl Settings {
    pub fn effective_save_dir(&self, paths: &AppPaths) -> PathBuf {
        self.default_save_dir
            .clone()
            .unwrap_or_else(|| paths.default_download_dir())
    }

    pub fn effective_ffmpeg(&self, paths: &AppPaths) -> PathBuf {
        self.ffmpeg_path.clone().unwrap_or_else(|| paths.ffmpeg_cmd())
    }
}

pub fn load_settings(paths: &AppPaths) -> Result<Settings> {
    let path = paths.settings_path();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: Settings = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::ConfigInvalid(format!(
            "failed to parse settings at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

pub fn save_settings(paths: &AppPaths, settings: &Settings) -> Result<()> {
    let path = paths.settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}
