use crate::cmd;
use crate::jobs::CancelFlag;
use crate::models::{OutputMode, SourceKind};
use crate::{EngineError, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

/// Pads odd frame sizes up to the next even number; many encoders reject odd sizes.
pub const EVEN_PAD_FILTER: &str = "pad=ceil(iw/2)*2:ceil(ih/2)*2";

/// Rounds `n` up to even. Saturates at `u32::MAX`, which stays odd.
pub fn even_dimension(n: u32) -> u32 {
    n.saturating_add(n % 2)
}

/// Frame size after [`EVEN_PAD_FILTER`].
pub fn padded_dimensions(width: u32, height: u32) -> (u32, u32) {
    (even_dimension(width), even_dimension(height))
}

/// One ffmpeg invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSpec {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub video_filter: Option<String>,
    pub strip_audio: bool,
    /// Take video from input 0 and audio from input 1.
    pub mux: bool,
}

pub fn plan_transcode(
    source_kind: SourceKind,
    mode: OutputMode,
    inputs: Vec<PathBuf>,
    output: PathBuf,
) -> Result<TranscodeSpec> {
    let mux = source_kind == SourceKind::StreamingPlatform && mode == OutputMode::Video;
    let expected = if mux { 2 } else { 1 };
    if inputs.len() != expected {
        return Err(EngineError::ConfigInvalid(format!(
            "{mode} conversion expects {expected} input(s), got {}",
            inputs.len()
        )));
    }

    let (video_filter, strip_audio) = match mode {
        OutputMode::Video if mux => (None, false),
        OutputMode::Video | OutputMode::Audio => (Some(EVEN_PAD_FILTER.to_string()), false),
        OutputMode::MuteVideo => (Some(EVEN_PAD_FILTER.to_string()), true),
    };

    Ok(TranscodeSpec {
        inputs,
        output,
        video_filter,
        strip_audio,
        mux,
    })
}

pub fn build_args(spec: &TranscodeSpec) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]
        .into_iter()
        .map(OsString::from)
        .collect();

    for input in &spec.inputs {
        args.push("-i".into());
        args.push(input.as_os_str().to_owned());
    }
    if spec.mux {
        args.extend(["-map", "0:v:0", "-map", "1:a:0"].map(OsString::from));
    }
    if let Some(filter) = &spec.video_filter {
        args.push("-vf".into());
        args.push(filter.into());
    }
    if spec.strip_audio {
        args.push("-an".into());
    }
    args.push(spec.output.as_os_str().to_owned());
    args
}

/// Runs a planned conversion.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, spec: &TranscodeSpec, cancel: Option<&CancelFlag>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    timeout_secs: u64,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout_secs,
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, spec: &TranscodeSpec, cancel: Option<&CancelFlag>) -> Result<()> {
        let args = build_args(spec);
        debug!(program = %self.program.display(), ?args, "running ffmpeg");

        let mut command = cmd::command(&self.program);
        command.args(&args);
        cmd::run_checked("ffmpeg", &mut command, cancel, self.timeout_secs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(spec: &TranscodeSpec) -> Vec<String> {
        build_args(spec)
            .into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn odd_dimensions_round_up() {
        assert_eq!(even_dimension(101), 102);
        assert_eq!(even_dimension(100), 100);
        assert_eq!(even_dimension(0), 0);
        assert_eq!(padded_dimensions(1919, 1081), (1920, 1082));
    }

    #[test]
    fn largest_dimension_does_not_overflow() {
        assert_eq!(even_dimension(u32::MAX), u32::MAX);
        assert_eq!(even_dimension(u32::MAX - 1), u32::MAX - 1);
        assert_eq!(padded_dimensions(u32::MAX, 3), (u32::MAX, 4));
    }

    #[test]
    fn streaming_video_maps_two_inputs_without_filter() {
        let spec = plan_transcode(
            SourceKind::StreamingPlatform,
            OutputMode::Video,
            vec![PathBuf::from("/t/v.mp4"), PathBuf::from("/t/a.m4a")],
            PathBuf::from("/out/clip.mp4"),
        )
        .expect("plan");
        assert_eq!(
            args_of(&spec),
            vec![
                "-hide_banner", "-loglevel", "error", "-nostdin", "-y",
                "-i", "/t/v.mp4", "-i", "/t/a.m4a",
                "-map", "0:v:0", "-map", "1:a:0",
                "/out/clip.mp4",
            ]
        );
    }

    #[test]
    fn direct_video_conversion_pads() {
        let spec = plan_transcode(
            SourceKind::DirectFile,
            OutputMode::Video,
            vec![PathBuf::from("/t/in.mov")],
            PathBuf::from("/out/b.mp4"),
        )
        .expect("plan");
        assert!(!spec.mux);
        assert_eq!(
            args_of(&spec)[5..],
            ["-i", "/t/in.mov", "-vf", EVEN_PAD_FILTER, "/out/b.mp4"]
        );
    }

    #[test]
    fn mute_video_pads_and_strips_audio() {
        let spec = plan_transcode(
            SourceKind::StreamingPlatform,
            OutputMode::MuteVideo,
            vec![PathBuf::from("/t/v.webm")],
            PathBuf::from("/out/m.mp4"),
        )
        .expect("plan");
        let args = args_of(&spec);
        assert_eq!(args[5..], ["-i", "/t/v.webm", "-vf", EVEN_PAD_FILTER, "-an", "/out/m.mp4"]);
    }

    #[test]
    fn audio_keeps_padding_filter() {
        for kind in [SourceKind::DirectFile, SourceKind::StreamingPlatform] {
            let spec = plan_transcode(
                kind,
                OutputMode::Audio,
                vec![PathBuf::from("/t/a.m4a")],
                PathBuf::from("/out/a.mp3"),
            )
            .expect("plan");
            assert_eq!(spec.video_filter.as_deref(), Some(EVEN_PAD_FILTER));
            assert!(!spec.strip_audio);
            assert!(!spec.mux);
        }
    }

    #[test]
    fn wrong_input_count_is_rejected() {
        let err = plan_transcode(
            SourceKind::StreamingPlatform,
            OutputMode::Video,
            vec![PathBuf::from("/t/v.mp4")],
            PathBuf::from("/out/x.mp4"),
        )
        .expect_err("must fail");
        assert!(matches!(err, EngineError::ConfigInvalid(_)));
    }

    #[test]
    fn missing_ffmpeg_is_reported() {
        let spec = plan_transcode(
            SourceKind::DirectFile,
            OutputMode::Audio,
            vec![PathBuf::from("/t/a.wav")],
            PathBuf::from("/out/a.mp3"),
        )
        .expect("plan");
        let err = FfmpegTranscoder::new("mudl-no-such-ffmpeg", 10)
            .transcode(&spec, None)
            .expect_err("must fail");
        assert!(matches!(err, EngineError::ExternalToolMissing { ref tool } if tool == "ffmpeg"));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_a_structured_failure() {
        let spec = plan_transcode(
            SourceKind::DirectFile,
            OutputMode::Audio,
            vec![PathBuf::from("/t/a.wav")],
            PathBuf::from("/out/a.mp3"),
        )
        .expect("plan");
        let err = FfmpegTranscoder::new("false", 10)
            .transcode(&spec, None)
            .expect_err("must fail");
        assert!(matches!(
            err,
            EngineError::ExternalToolFailed { ref tool, code: Some(1), .. } if tool == "ffmpeg"
        ));
    }
}
