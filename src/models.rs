use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// What the user wants out of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Video,
    Audio,
    MuteVideo,
}

impl OutputMode {
    /// Stream roles a streaming-platform source must provide for this mode.
    pub fn required_roles(self) -> &'static [StreamRole] {
        match self {
            OutputMode::Video => &[StreamRole::Video, StreamRole::Audio],
            OutputMode::Audio => &[StreamRole::Audio],
            OutputMode::MuteVideo => &[StreamRole::Video],
        }
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            OutputMode::Video | OutputMode::MuteVideo => "mp4",
            OutputMode::Audio => "mp3",
        }
    }

    /// Noun used in the success report ("Audio file has been saved to ...").
    pub fn result_label(self) -> &'static str {
        match self {
            OutputMode::Video => "Video file",
            OutputMode::Audio => "Audio file",
            OutputMode::MuteVideo => "Mute video file",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Video => write!(f, "Video"),
            OutputMode::Audio => write!(f, "Audio"),
            OutputMode::MuteVideo => write!(f, "Mute Video"),
        }
    }
}

impl FromStr for OutputMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "video" => Ok(OutputMode::Video),
            "audio" => Ok(OutputMode::Audio),
            "mute video" | "mutevideo" | "mute" => Ok(OutputMode::MuteVideo),
            _ => Err(EngineError::ConfigInvalid(format!(
                "unknown output mode: {s} (expected video, audio or mute-video)"
            ))),
        }
    }
}

/// Where a source comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    StreamingPlatform,
    DirectFile,
}

/// Track content of a single stream variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    AudioOnly,
    VideoOnly,
    Muxed,
}

impl MediaKind {
    pub fn has_video(self) -> bool {
        matches!(self, MediaKind::VideoOnly | MediaKind::Muxed)
    }

    pub fn has_audio(self) -> bool {
        matches!(self, MediaKind::AudioOnly | MediaKind::Muxed)
    }
}

/// The part a variant plays in a job: the picture or the sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRole {
    Video,
    Audio,
}

impl StreamRole {
    pub fn accepts(self, kind: MediaKind) -> bool {
        match self {
            StreamRole::Video => kind.has_video(),
            StreamRole::Audio => kind.has_audio(),
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamRole::Video => write!(f, "video"),
            StreamRole::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamVariant {
    /// Opaque selector handed back to the extractor (yt-dlp format id).
    pub id: String,
    pub label: String,
    pub kind: MediaKind,
    pub ext: String,
    pub height: Option<u32>,
    pub fps: Option<f32>,
    pub bitrate_kbps: Option<f32>,
    pub filesize: Option<u64>,
}

/// Identifies where the media of a job comes from. Built once, read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    url: String,
    filename: String,
    host: String,
    kind: SourceKind,
    variants: Vec<StreamVariant>,
}

impl SourceReference {
    pub fn direct_file(url: impl Into<String>, filename: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            host: host.into(),
            kind: SourceKind::DirectFile,
            variants: Vec::new(),
        }
    }

    pub fn streaming(
        url: impl Into<String>,
        title: impl Into<String>,
        host: impl Into<String>,
        variants: Vec<StreamVariant>,
    ) -> Self {
        Self {
            url: url.into(),
            filename: title.into(),
            host: host.into(),
            kind: SourceKind::StreamingPlatform,
            variants,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn variants(&self) -> &[StreamVariant] {
        &self.variants
    }

    /// Extension of the remote file including the leading dot, or "" when absent.
    pub fn extension(&self) -> String {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default()
    }

    /// Stem used to name the output when the user does not supply one.
    pub fn default_stem(&self) -> String {
        match self.kind {
            SourceKind::DirectFile => Path::new(&self.filename)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("download")
                .to_string(),
            SourceKind::StreamingPlatform => self.filename.clone(),
        }
    }

    pub fn find_variant(&self, id: &str) -> Option<&StreamVariant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// First variant able to fill `role`, preferring single-track variants.
    /// Listings are kept best-first, so this is also the best candidate.
    pub fn default_variant(&self, role: StreamRole) -> Option<&StreamVariant> {
        let pure = match role {
            StreamRole::Video => MediaKind::VideoOnly,
            StreamRole::Audio => MediaKind::AudioOnly,
        };
        self.variants
            .iter()
            .find(|v| v.kind == pure)
            .or_else(|| self.variants.iter().find(|v| role.accepts(v.kind)))
    }

    pub fn variants_for(&self, role: StreamRole) -> impl Iterator<Item = &StreamVariant> {
        self.variants.iter().filter(move |v| role.accepts(v.kind))
    }
}

/// Variant ids picked by the user for a streaming source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSelection {
    pub video: Option<String>,
    pub audio: Option<String>,
}

impl VariantSelection {
    pub fn get(&self, role: StreamRole) -> Option<&str> {
        match role {
            StreamRole::Video => self.video.as_deref(),
            StreamRole::Audio => self.audio.as_deref(),
        }
    }
}

/// User intent for the result of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRequest {
    pub mode: OutputMode,
    pub filename: String,
    pub directory: PathBuf,
}

impl OutputRequest {
    pub fn output_path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    /// Extension of the requested output including the leading dot, or "".
    pub fn extension(&self) -> String {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagedOrigin {
    /// Intermediate copy, deleted when the job ends.
    Ephemeral,
    /// Already the job's final output.
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub origin: StagedOrigin,
}

impl StagedFile {
    pub fn ephemeral(path: PathBuf) -> Self {
        Self {
            path,
            origin: StagedOrigin::Ephemeral,
        }
    }

    pub fn final_output(path: PathBuf) -> Self {
        Self {
            path,
            origin: StagedOrigin::Final,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.origin == StagedOrigin::Ephemeral
    }
}

/// Staged inputs bound to the request they will be converted for.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub source_kind: SourceKind,
    pub inputs: Vec<StagedFile>,
    pub request: OutputRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(id: &str, kind: MediaKind) -> StreamVariant {
        StreamVariant {
            id: id.to_string(),
            label: id.to_string(),
            kind,
            ext: "mp4".to_string(),
            height: None,
            fps: None,
            bitrate_kbps: None,
            filesize: None,
        }
    }

    #[test]
    fn required_roles_follow_mode() {
        assert_eq!(
            OutputMode::Video.required_roles(),
            &[StreamRole::Video, StreamRole::Audio]
        );
        assert_eq!(OutputMode::Audio.required_roles(), &[StreamRole::Audio]);
        assert_eq!(OutputMode::MuteVideo.required_roles(), &[StreamRole::Video]);
    }

    #[test]
    fn output_mode_parses_client_spellings() {
        assert_eq!("video".parse::<OutputMode>().expect("video"), OutputMode::Video);
        assert_eq!("Audio".parse::<OutputMode>().expect("audio"), OutputMode::Audio);
        assert_eq!(
            "mute-video".parse::<OutputMode>().expect("mute"),
            OutputMode::MuteVideo
        );
        assert_eq!(
            "Mute Video".parse::<OutputMode>().expect("mute label"),
            OutputMode::MuteVideo
        );
        assert!("gif".parse::<OutputMode>().is_err());
    }

    #[test]
    fn default_variant_prefers_single_track_streams() {
        let source = SourceReference::streaming(
            "https://youtu.be/abc",
            "Title",
            "youtu.be",
            vec![
                variant("18", MediaKind::Muxed),
                variant("137", MediaKind::VideoOnly),
                variant("140", MediaKind::AudioOnly),
            ],
        );
        assert_eq!(source.default_variant(StreamRole::Video).map(|v| v.id.as_str()), Some("137"));
        assert_eq!(source.default_variant(StreamRole::Audio).map(|v| v.id.as_str()), Some("140"));
    }

    #[test]
    fn default_variant_falls_back_to_muxed() {
        let source = SourceReference::streaming(
            "https://youtu.be/abc",
            "Title",
            "youtu.be",
            vec![variant("18", MediaKind::Muxed)],
        );
        assert_eq!(source.default_variant(StreamRole::Audio).map(|v| v.id.as_str()), Some("18"));
    }

    #[test]
    fn direct_source_extension_and_stem() {
        let source = SourceReference::direct_file("http://x/a.mov", "a.mov", "x");
        assert_eq!(source.extension(), ".mov");
        assert_eq!(source.default_stem(), "a");
    }
}
