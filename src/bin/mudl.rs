use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mudl_engine::config::{self, SaveMode, Settings};
use mudl_engine::jobs;
use mudl_engine::models::{OutputMode, SourceKind, StreamRole, VariantSelection};
use mudl_engine::orchestrator::{JobRequest, Pipeline};
use mudl_engine::paths::AppPaths;
use mudl_engine::reporter::{ConsoleReporter, JobReporter, TracingReporter};
use mudl_engine::save_location::{
    ConfiguredSaveLocation, DirectoryPrompt, FixedSaveLocation, SaveLocationResolver,
};
use mudl_engine::url_meta::{MetadataResolver, SourceResolver};
use mudl_engine::{tools, EngineError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> std::result::Result<(), String> {
    init_tracing();
    run().map_err(|e| e.to_string())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MUDL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

enum Command {
    Download(DownloadArgs),
    List { url: String },
    Tools { install_ffmpeg: bool, install_ytdlp: bool },
}

#[derive(Default)]
struct DownloadArgs {
    url: String,
    mode: Option<OutputMode>,
    output: Option<String>,
    selection: VariantSelection,
    save_dir: Option<PathBuf>,
    prompt: bool,
    reveal: bool,
    quiet: bool,
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut base_dir: Option<PathBuf> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut download = DownloadArgs::default();
    let mut install_ffmpeg = false;
    let mut install_ytdlp = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--base-dir" => base_dir = Some(PathBuf::from(flag_value(&args, &mut i)?)),
            "--mode" => download.mode = Some(flag_value(&args, &mut i)?.parse()?),
            "--output" => download.output = Some(flag_value(&args, &mut i)?.to_string()),
            "--video" => download.selection.video = Some(flag_value(&args, &mut i)?.to_string()),
            "--audio" => download.selection.audio = Some(flag_value(&args, &mut i)?.to_string()),
            "--save-dir" => download.save_dir = Some(PathBuf::from(flag_value(&args, &mut i)?)),
            "--prompt" => download.prompt = true,
            "--reveal" => download.reveal = true,
            "--quiet" => download.quiet = true,
            "--install-ffmpeg" => install_ffmpeg = true,
            "--install-yt-dlp" => install_ytdlp = true,
            other if other.starts_with("--") => {
                return Err(EngineError::ConfigInvalid(format!(
                    "unknown arg: {other} (try --help)"
                )));
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let command = match positional.first().map(String::as_str) {
        Some("download") => {
            download.url = positional
                .get(1)
                .cloned()
                .ok_or_else(|| EngineError::ConfigInvalid("download requires a URL".to_string()))?;
            Command::Download(download)
        }
        Some("list") => Command::List {
            url: positional
                .get(1)
                .cloned()
                .ok_or_else(|| EngineError::ConfigInvalid("list requires a URL".to_string()))?,
        },
        Some("tools") => Command::Tools {
            install_ffmpeg,
            install_ytdlp,
        },
        Some(other) => {
            return Err(EngineError::ConfigInvalid(format!(
                "unknown command: {other} (try --help)"
            )));
        }
        None => {
            print_help();
            return Ok(());
        }
    };

    let base_dir = base_dir
        .or_else(AppPaths::default_base_dir)
        .unwrap_or_else(|| PathBuf::from(".mudl"));
    let paths = AppPaths::new(base_dir);
    paths.ensure_dirs()?;
    let settings = config::load_settings(&paths)?;

    match command {
        Command::Download(args) => run_download(&paths, settings, args),
        Command::List { url } => run_list(&paths, &settings, &url),
        Command::Tools {
            install_ffmpeg,
            install_ytdlp,
        } => run_tools(&paths, &settings, install_ffmpeg, install_ytdlp),
    }
}

fn flag_value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| EngineError::ConfigInvalid(format!("{flag} requires a value")))
}

fn run_download(paths: &AppPaths, mut settings: Settings, args: DownloadArgs) -> Result<()> {
    if args.prompt {
        settings.save_mode = SaveMode::Prompt;
    }
    let save_location: Box<dyn SaveLocationResolver> = match args.save_dir {
        Some(dir) => Box::new(FixedSaveLocation(dir)),
        None => Box::new(ConfiguredSaveLocation::new(
            &settings,
            paths,
            Box::new(StdinPrompt),
        )),
    };
    let reporter: Arc<dyn JobReporter> = if args.quiet {
        Arc::new(TracingReporter)
    } else {
        Arc::new(ConsoleReporter::new().with_auto_reveal(args.reveal))
    };
    let pipeline = Pipeline::from_settings(paths, &settings, save_location, reporter);

    let source = MetadataResolver::new(pipeline.streams())
        .with_host_resolution(settings.resolve_host)
        .classify(&args.url)?;

    let mut request = JobRequest::new(source, args.mode.unwrap_or(OutputMode::Video))
        .with_selection(args.selection);
    request.output_name = args.output;

    let handle = jobs::spawn_job(pipeline, request)?;
    println!("job {} started", handle.id());
    let outcome = handle.join()?;
    tracing::debug!(?outcome, "download finished");
    Ok(())
}

fn run_list(paths: &AppPaths, settings: &Settings, url: &str) -> Result<()> {
    let streams = Arc::new(mudl_engine::ytdlp::YtDlpBackend::new(paths, settings));
    let source = MetadataResolver::new(streams)
        .with_host_resolution(settings.resolve_host)
        .classify(url)?;

    if source.kind() == SourceKind::DirectFile {
        println!("direct file: {} (host {})", source.filename(), source.host());
        return Ok(());
    }

    println!("{}", source.filename());
    for role in [StreamRole::Video, StreamRole::Audio] {
        println!("{role} streams:");
        for variant in source.variants_for(role) {
            println!("  {:>8}  {}", variant.id, variant.label);
        }
    }
    Ok(())
}

fn run_tools(
    paths: &AppPaths,
    settings: &Settings,
    install_ffmpeg: bool,
    install_ytdlp: bool,
) -> Result<()> {
    let ffmpeg = if install_ffmpeg {
        println!("installing ffmpeg tools...");
        tools::install_ffmpeg_tools(paths, settings)?
    } else {
        tools::ffmpeg_tools_status(paths, settings)
    };
    let ytdlp = if install_ytdlp {
        println!("installing yt-dlp...");
        tools::install_ytdlp_tools(paths, settings)?
    } else {
        tools::ytdlp_tools_status(paths, settings)
    };

    let report = serde_json::json!({ "ffmpeg": ffmpeg, "yt_dlp": ytdlp });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Reads a directory from stdin. A blank line cancels.
struct StdinPrompt;

impl DirectoryPrompt for StdinPrompt {
    fn ask(&self, initial: &Path) -> Option<String> {
        print!(
            "Save location (blank to cancel) [suggested: {}]: ",
            initial.display()
        );
        std::io::stdout().flush().ok()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;
        Some(line)
    }
}

fn print_help() {
    println!(
        r#"mudl

Download media from a URL and convert it to video, audio or mute video.

Usage:
  mudl download <url> [--mode video|audio|mute-video] [--output NAME]
                      [--video ID] [--audio ID] [--save-dir DIR] [--prompt] [--reveal]
                      [--quiet]
  mudl list <url>
  mudl tools [--install-ffmpeg] [--install-yt-dlp]

Options:
  --base-dir DIR   App data directory (settings, logs, tools). Defaults to
                   MUDL_BASE_DIR or the per-user data directory.
  --save-dir DIR   Save into DIR without consulting settings.
  --prompt         Ask for the save location even when settings say auto.
  --reveal         Open the file browser at the result.
  --quiet          Send job messages to the log (MUDL_LOG) instead of stdout.
  --video/--audio  Stream ids from `mudl list` (streaming sources only).

Logging:
  MUDL_LOG=debug   tracing filter (default: info)
"#
    );
}
