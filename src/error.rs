use crate::models::StreamRole;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no save location selected")]
    SaveLocationMissing,

    #[error("invalid settings: {0}")]
    ConfigInvalid(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("stream extraction failed: {0}")]
    ExtractorFailed(String),

    #[error("unknown stream variant id: {0}")]
    UnknownVariant(String),

    #[error("stream variant {id} has no {role} track")]
    VariantKindMismatch { id: String, role: StreamRole },

    #[error("source offers no {0} stream")]
    NoVariant(StreamRole),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external tool is missing: {tool}")]
    ExternalToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{tool} timed out after {secs}s")]
    TimedOut { tool: String, secs: u64 },

    #[error("job canceled")]
    Canceled,

    #[error("failed to remove {} temporary file(s): {}", failures.len(), describe_failures(failures))]
    TempCleanupFailed {
        failures: Vec<(PathBuf, std::io::Error)>,
    },

    #[error("tool install failed: {0}")]
    InstallFailed(String),
}

fn describe_failures(failures: &[(PathBuf, std::io::Error)]) -> String {
    failures
        .iter()
        .map(|(path, err)| format!("{} ({err})", path.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, EngineError>;
