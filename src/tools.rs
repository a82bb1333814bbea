use crate::config::Settings;
use crate::paths::AppPaths;
use crate::{cmd, EngineError, Result};
use serde::Serialize;
use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const VERSION_PROBE_TIMEOUT_SECS: u64 = 15;
const YT_DLP_MIN_BYTES: u64 = 512 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct FfmpegToolsStatus {
    /// Bundled copy present under the tools directory.
    pub installed: bool,
    /// Executable the transcoder will launch.
    pub ffmpeg_path: String,
    pub ffmpeg_version: Option<String>,
}

pub fn ffmpeg_tools_status(paths: &AppPaths, settings: &Settings) -> FfmpegToolsStatus {
    let program = settings.effective_ffmpeg(paths);
    FfmpegToolsStatus {
        installed: paths.ffmpeg_bin_path().exists(),
        ffmpeg_version: tool_version_first_line(&program, "-version"),
        ffmpeg_path: program.to_string_lossy().to_string(),
    }
}

/// Downloads a static ffmpeg build into the tools directory.
pub fn install_ffmpeg_tools(paths: &AppPaths, settings: &Settings) -> Result<FfmpegToolsStatus> {
    paths.ensure_dirs()?;

    let destination = paths.ffmpeg_dir();
    std::fs::create_dir_all(&destination)?;

    let download_url = ffmpeg_sidecar::download::ffmpeg_download_url()
        .map_err(|e| EngineError::InstallFailed(e.to_string()))?;
    info!(url = download_url, dest = %destination.display(), "downloading ffmpeg");
    let archive_path =
        ffmpeg_sidecar::download::download_ffmpeg_package(download_url, &destination)
            .map_err(|e| EngineError::InstallFailed(e.to_string()))?;
    ffmpeg_sidecar::download::unpack_ffmpeg(&archive_path, &destination)
        .map_err(|e| EngineError::InstallFailed(e.to_string()))?;

    Ok(ffmpeg_tools_status(paths, settings))
}

#[derive(Debug, Clone, Serialize)]
pub struct YtDlpToolsStatus {
    pub available: bool,
    pub bundled_installed: bool,
    pub bundled_path: String,
    /// First candidate that answered `--version`; empty when none did.
    pub ytdlp_path: String,
    pub ytdlp_version: Option<String>,
}

pub fn ytdlp_tools_status(paths: &AppPaths, settings: &Settings) -> YtDlpToolsStatus {
    let bundled = paths.ytdlp_bin_path();
    let bundled_installed = bundled.exists();

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(configured) = &settings.ytdlp_path {
        candidates.push(configured.clone());
    }
    if bundled_installed {
        candidates.push(bundled.clone());
    }
    candidates.push(PathBuf::from("yt-dlp"));

    let resolved = candidates.into_iter().find_map(|candidate| {
        tool_version_first_line(&candidate, "--version").map(|version| (candidate, version))
    });

    YtDlpToolsStatus {
        available: resolved.is_some(),
        bundled_installed,
        bundled_path: bundled.to_string_lossy().to_string(),
        ytdlp_path: resolved
            .as_ref()
            .map(|(p, _)| p.to_string_lossy().to_string())
            .unwrap_or_default(),
        ytdlp_version: resolved.map(|(_, v)| v),
    }
}

/// Release asset for the running platform.
pub fn ytdlp_download_url() -> &'static str {
    if cfg!(windows) {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux"
    }
}

/// Downloads the standalone yt-dlp release into the tools directory.
pub fn install_ytdlp_tools(paths: &AppPaths, settings: &Settings) -> Result<YtDlpToolsStatus> {
    paths.ensure_dirs()?;

    let destination = paths.ytdlp_bin_path();
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = destination.with_extension("download");

    let url = ytdlp_download_url();
    info!(url, dest = %destination.display(), "downloading yt-dlp");
    let mut resp = ureq::get(url)
        .call()
        .map_err(|e| EngineError::InstallFailed(format!("yt-dlp download failed: {e}")))?;
    let status = resp.status();
    if status.as_u16() >= 400 {
        return Err(EngineError::InstallFailed(format!(
            "yt-dlp download failed (status={status})"
        )));
    }

    {
        let mut reader = resp.body_mut().as_reader();
        let mut file = std::fs::File::create(&tmp_path)?;
        std::io::copy(&mut reader, &mut file)?;
        file.flush()?;
    }

    let downloaded_size = std::fs::metadata(&tmp_path).map(|m| m.len()).unwrap_or(0);
    if downloaded_size < YT_DLP_MIN_BYTES {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(EngineError::InstallFailed(
            "downloaded yt-dlp is unexpectedly small".to_string(),
        ));
    }

    if destination.exists() {
        let _ = std::fs::remove_file(&destination);
    }
    if std::fs::rename(&tmp_path, &destination).is_err() {
        std::fs::copy(&tmp_path, &destination)?;
        let _ = std::fs::remove_file(&tmp_path);
    }
    make_executable(&destination)?;

    Ok(ytdlp_tools_status(paths, settings))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn tool_version_first_line(program: impl AsRef<OsStr>, arg: &str) -> Option<String> {
    let mut command = cmd::command(program);
    command.arg(arg);
    let output = cmd::run_controlled(&mut command, None, VERSION_PROBE_TIMEOUT_SECS).ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}
