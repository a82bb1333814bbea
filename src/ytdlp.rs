use crate::acquire::{StreamBackend, VariantListing};
use crate::cmd::{self, CommandRunError};
use crate::config::Settings;
use crate::jobs::CancelFlag;
use crate::models::{MediaKind, StreamVariant};
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::Output;
use tracing::{debug, warn};

const YT_DLP_LIST_TIMEOUT_SECS: u64 = 120;

/// One way of launching yt-dlp: a program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub program: String,
    pub prefix: Vec<String>,
}

impl Candidate {
    fn new(program: impl Into<String>, prefix: &[&str]) -> Self {
        Self {
            program: program.into(),
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// `python -m yt_dlp` style launch, where the interpreter exists even
    /// when the module does not.
    fn is_module_launch(&self) -> bool {
        self.prefix.first().map(String::as_str) == Some("-m")
    }
}

/// Streaming backend driving the yt-dlp executable.
#[derive(Debug, Clone)]
pub struct YtDlpBackend {
    candidates: Vec<Candidate>,
    ffmpeg_location: Option<PathBuf>,
    timeout_secs: u64,
}

impl YtDlpBackend {
    pub fn new(paths: &AppPaths, settings: &Settings) -> Self {
        let mut candidates = Vec::new();
        if let Some(configured) = &settings.ytdlp_path {
            candidates.push(Candidate::new(configured.to_string_lossy(), &[]));
        }
        let bundled = paths.ytdlp_bin_path();
        if bundled.exists() {
            candidates.push(Candidate::new(bundled.to_string_lossy(), &[]));
        }
        candidates.push(Candidate::new("yt-dlp", &[]));
        candidates.push(Candidate::new("python", &["-m", "yt_dlp"]));
        candidates.push(Candidate::new("python3", &["-m", "yt_dlp"]));

        let ffmpeg = settings.effective_ffmpeg(paths);
        Self {
            candidates,
            ffmpeg_location: ffmpeg.is_absolute().then_some(ffmpeg).filter(|p| p.exists()),
            timeout_secs: settings.ytdlp_timeout_secs,
        }
    }

    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            ffmpeg_location: None,
            timeout_secs: 0,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Runs yt-dlp with `args` through the first candidate that can be
    /// launched. A candidate that starts and then fails ends the operation;
    /// only missing executables and missing python modules move on.
    fn run(&self, args: &[String], cancel: Option<&CancelFlag>, timeout_secs: u64) -> Result<Output> {
        let mut skipped: Vec<String> = Vec::new();

        for candidate in &self.candidates {
            let mut command = cmd::command(&candidate.program);
            command.args(&candidate.prefix);
            command.args(args);
            debug!(program = %candidate.program, ?args, "running yt-dlp");

            match cmd::run_controlled(&mut command, cancel, timeout_secs) {
                Ok(output) if output.status.success() => return Ok(output),
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    if candidate.is_module_launch() && stderr.contains("No module named") {
                        debug!(program = %candidate.program, "yt_dlp module not installed");
                        skipped.push(format!("{}: {stderr}", candidate.program));
                        continue;
                    }
                    warn!(program = %candidate.program, code = ?output.status.code(), "yt-dlp failed");
                    return Err(EngineError::ExtractorFailed(format!(
                        "{} failed (code={:?}): {}",
                        candidate.program,
                        output.status.code(),
                        if stderr.is_empty() {
                            "unknown error".to_string()
                        } else {
                            stderr
                        }
                    )));
                }
                Err(CommandRunError::Spawn(e)) => {
                    debug!(program = %candidate.program, error = %e, "yt-dlp candidate not runnable");
                    if e.kind() != std::io::ErrorKind::NotFound {
                        skipped.push(format!("{} could not start: {e}", candidate.program));
                    }
                }
                Err(CommandRunError::Wait(e)) => {
                    return Err(EngineError::ExtractorFailed(format!(
                        "{} failed while running: {e}",
                        candidate.program
                    )));
                }
                Err(CommandRunError::Canceled) => return Err(EngineError::Canceled),
                Err(CommandRunError::TimedOut(secs)) => {
                    return Err(EngineError::TimedOut {
                        tool: "yt-dlp".to_string(),
                        secs,
                    });
                }
            }
        }

        if !skipped.is_empty() {
            debug!(skipped = %skipped.join(" | "), "no runnable yt-dlp");
        }
        Err(EngineError::ExternalToolMissing {
            tool: "yt-dlp".to_string(),
        })
    }
}

impl StreamBackend for YtDlpBackend {
    fn list_variants(&self, url: &str) -> Result<VariantListing> {
        let args = vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            url.to_string(),
        ];
        let timeout = match self.timeout_secs {
            0 => YT_DLP_LIST_TIMEOUT_SECS,
            n => n.min(YT_DLP_LIST_TIMEOUT_SECS),
        };
        let output = self.run(&args, None, timeout)?;
        parse_listing(&output.stdout)
    }

    fn download_variant(
        &self,
        url: &str,
        variant: &StreamVariant,
        dest: &Path,
        cancel: Option<&CancelFlag>,
    ) -> Result<()> {
        let mut args = vec![
            "-f".to_string(),
            variant.id.clone(),
            "-o".to_string(),
            dest.to_string_lossy().to_string(),
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--no-part".to_string(),
        ];
        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().to_string());
        }
        args.push(url.to_string());

        self.run(&args, cancel, self.timeout_secs)?;

        let written = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(EngineError::DownloadFailed(format!(
                "yt-dlp produced no data for variant {} at {}",
                variant.id,
                dest.display()
            )));
        }
        Ok(())
    }
}

/// Parses `--dump-single-json` output into a title and best-first variants.
pub fn parse_listing(stdout: &[u8]) -> Result<VariantListing> {
    let json: serde_json::Value = serde_json::from_slice(stdout)?;
    let formats = json["formats"]
        .as_array()
        .ok_or_else(|| EngineError::ExtractorFailed("no formats array in yt-dlp output".to_string()))?;

    let mut variants: Vec<StreamVariant> = formats.iter().filter_map(variant_from_format).collect();
    variants.sort_by(compare_variants);

    let title = json["title"]
        .as_str()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("download")
        .to_string();
    Ok(VariantListing { title, variants })
}

fn variant_from_format(f: &serde_json::Value) -> Option<StreamVariant> {
    let id = f["format_id"].as_str().filter(|s| !s.is_empty())?;
    let has_video = f["vcodec"].as_str().is_some_and(|v| v != "none");
    let has_audio = f["acodec"].as_str().is_some_and(|a| a != "none");
    let kind = match (has_video, has_audio) {
        (true, true) => MediaKind::Muxed,
        (true, false) => MediaKind::VideoOnly,
        (false, true) => MediaKind::AudioOnly,
        // storyboards, mhtml previews
        (false, false) => return None,
    };

    let mut variant = StreamVariant {
        id: id.to_string(),
        label: String::new(),
        kind,
        ext: f["ext"].as_str().unwrap_or_default().to_string(),
        height: f["height"].as_u64().map(|h| h as u32),
        fps: f["fps"].as_f64().map(|v| v as f32),
        bitrate_kbps: f["tbr"]
            .as_f64()
            .or_else(|| f["abr"].as_f64())
            .map(|v| v as f32),
        filesize: f["filesize"]
            .as_u64()
            .or_else(|| f["filesize_approx"].as_u64()),
    };
    variant.label = variant_label(&variant, f["format_note"].as_str());
    Some(variant)
}

fn variant_label(v: &StreamVariant, note: Option<&str>) -> String {
    let mut label = match v.kind {
        MediaKind::AudioOnly => match v.bitrate_kbps {
            Some(kbps) => format!("{kbps:.0}kbps {}", v.ext),
            None => format!("audio {}", v.ext),
        },
        MediaKind::VideoOnly | MediaKind::Muxed => {
            let mut s = match v.height {
                Some(h) => format!("{h}p"),
                None => note.unwrap_or("video").to_string(),
            };
            if let Some(fps) = v.fps.filter(|f| *f > 30.0) {
                s.push_str(&format!("{fps:.0}"));
            }
            format!("{s} {}", v.ext)
        }
    };

    match v.kind {
        MediaKind::AudioOnly => label.push_str(" (audio only)"),
        MediaKind::VideoOnly => label.push_str(" (video only)"),
        MediaKind::Muxed => {}
    }
    if let Some(bytes) = v.filesize.filter(|b| *b > 0) {
        let mb = bytes as f64 / 1_048_576.0;
        if mb >= 1024.0 {
            label.push_str(&format!(" ~{:.1} GB", mb / 1024.0));
        } else {
            label.push_str(&format!(" ~{mb:.0} MB"));
        }
    }
    label
}

/// Video-only first, then muxed, then audio-only; best quality first in each.
fn compare_variants(a: &StreamVariant, b: &StreamVariant) -> Ordering {
    fn rank(kind: MediaKind) -> u8 {
        match kind {
            MediaKind::VideoOnly => 0,
            MediaKind::Muxed => 1,
            MediaKind::AudioOnly => 2,
        }
    }
    let desc = |x: Option<f32>, y: Option<f32>| {
        y.unwrap_or(0.0)
            .partial_cmp(&x.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
    };

    rank(a.kind)
        .cmp(&rank(b.kind))
        .then_with(|| b.height.unwrap_or(0).cmp(&a.height.unwrap_or(0)))
        .then_with(|| desc(a.fps, b.fps))
        .then_with(|| desc(a.bitrate_kbps, b.bitrate_kbps))
}
