pub mod acquire;
pub mod cmd;
pub mod config;
mod error;
pub mod ffmpeg;
pub mod filename;
pub mod http;
pub mod joblog;
pub mod jobs;
pub mod models;
pub mod orchestrator;
pub mod paths;
pub mod registry;
pub mod reporter;
pub mod save_location;
pub mod tools;
pub mod url_meta;
pub mod ytdlp;

pub use error::{EngineError, Result};
