//! Runs one download-convert job end to end.
//!
//! A job resolves its save directory, stages its inputs, converts them when
//! needed and reports the outcome. Cleanup ordering differs by outcome:
//! on a failed conversion the tool output is logged before temp files are
//! removed; on success temp files are removed before the user is told the
//! file is ready.

use crate::acquire::{self, DirectDownloader, StreamBackend};
use crate::config::Settings;
use crate::ffmpeg::{self, FfmpegTranscoder, Transcoder};
use crate::filename::output_filename;
use crate::http::HttpDownloader;
use crate::jobs::{new_job_id, CancelFlag};
use crate::joblog::JobLog;
use crate::models::{
    ConversionJob, OutputMode, OutputRequest, SourceKind, SourceReference, StagedFile,
    VariantSelection,
};
use crate::paths::AppPaths;
use crate::registry::TempFileRegistry;
use crate::reporter::{JobReporter, REVEAL_FILE_LABEL};
use crate::save_location::SaveLocationResolver;
use crate::ytdlp::YtDlpBackend;
use crate::{EngineError, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const SAVE_DIR_MISSING_MESSAGE: &str =
    "*SaveDir not specified. Either enable *Save=Auto, or select a save location when prompted.";

/// Everything a caller decides about one job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub source: SourceReference,
    pub mode: OutputMode,
    /// Output file name; the source stem is used when absent.
    pub output_name: Option<String>,
    pub selection: VariantSelection,
}

impl JobRequest {
    pub fn new(source: SourceReference, mode: OutputMode) -> Self {
        Self {
            source,
            mode,
            output_name: None,
            selection: VariantSelection::default(),
        }
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn with_selection(mut self, selection: VariantSelection) -> Self {
        self.selection = selection;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub output_path: PathBuf,
    pub elapsed: Duration,
    /// False when the download went straight to the output path.
    pub transcoded: bool,
    /// Number of inputs staged for the job.
    pub staged: usize,
}

pub struct Pipeline {
    save_location: Box<dyn SaveLocationResolver>,
    reporter: Arc<dyn JobReporter>,
    direct: Arc<dyn DirectDownloader>,
    streams: Arc<dyn StreamBackend>,
    transcoder: Arc<dyn Transcoder>,
    job_logs: Option<AppPaths>,
}

impl Pipeline {
    pub fn new(
        save_location: Box<dyn SaveLocationResolver>,
        reporter: Arc<dyn JobReporter>,
        direct: Arc<dyn DirectDownloader>,
        streams: Arc<dyn StreamBackend>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            save_location,
            reporter,
            direct,
            streams,
            transcoder,
            job_logs: None,
        }
    }

    /// Pipeline backed by HTTP, yt-dlp and ffmpeg as configured in `settings`.
    pub fn from_settings(
        paths: &AppPaths,
        settings: &Settings,
        save_location: Box<dyn SaveLocationResolver>,
        reporter: Arc<dyn JobReporter>,
    ) -> Self {
        Self::new(
            save_location,
            reporter,
            Arc::new(HttpDownloader::new(settings.http_timeout_secs)),
            Arc::new(YtDlpBackend::new(paths, settings)),
            Arc::new(FfmpegTranscoder::new(
                settings.effective_ffmpeg(paths),
                settings.transcode_timeout_secs,
            )),
        )
        .with_job_log(paths.clone())
    }

    /// Write a JSONL event log per job under `paths`.
    pub fn with_job_log(mut self, paths: AppPaths) -> Self {
        self.job_logs = Some(paths);
        self
    }

    pub fn streams(&self) -> Arc<dyn StreamBackend> {
        Arc::clone(&self.streams)
    }

    pub fn run(&self, request: &JobRequest) -> Result<JobOutcome> {
        self.run_with(&new_job_id(), request, None)
    }

    pub fn run_with(
        &self,
        job_id: &str,
        request: &JobRequest,
        cancel: Option<&CancelFlag>,
    ) -> Result<JobOutcome> {
        let log = self.job_logs.as_ref().map(|paths| JobLog::new(paths, job_id));
        let log = log.as_ref();
        info!(job_id, url = request.source.url(), mode = %request.mode, "job started");
        emit(
            log,
            "info",
            "job_started",
            serde_json::json!({
                "url": request.source.url(),
                "mode": request.mode,
                "source_kind": request.source.kind(),
            }),
        );

        let Some(save_dir) = self.save_location.resolve() else {
            self.reporter.error(SAVE_DIR_MISSING_MESSAGE);
            warn!(job_id, "no save location");
            emit(log, "error", "save_location_missing", serde_json::json!({}));
            return Err(EngineError::SaveLocationMissing);
        };

        let result = self.execute(request, save_dir, cancel, log);
        match &result {
            Ok(outcome) => {
                info!(
                    job_id,
                    path = %outcome.output_path.display(),
                    secs = outcome.elapsed.as_secs_f64(),
                    "job finished"
                );
                emit(log, "info", "job_finished", serde_json::json!(outcome));
            }
            Err(err) => {
                error!(job_id, "job failed: {err}");
                self.reporter.error(&format!("Job failed: {err}"));
                emit(
                    log,
                    "error",
                    "job_failed",
                    serde_json::json!({ "error": err.to_string() }),
                );
            }
        }
        result
    }

    fn execute(
        &self,
        request: &JobRequest,
        save_dir: PathBuf,
        cancel: Option<&CancelFlag>,
        log: Option<&JobLog>,
    ) -> Result<JobOutcome> {
        let started = Instant::now();
        std::fs::create_dir_all(&save_dir)?;

        let source = &request.source;
        let output = OutputRequest {
            mode: request.mode,
            filename: output_filename(
                request.output_name.as_deref(),
                &source.default_stem(),
                request.mode,
            ),
            directory: save_dir,
        };

        let mut registry = TempFileRegistry::new();
        let inputs = match self.stage(source, request, &output, &mut registry, cancel, log) {
            Ok(inputs) => inputs,
            Err(err) => return Err(self.drain_after_failure(&mut registry, err, log)),
        };
        let staged = inputs.len();

        if let [only] = inputs.as_slice() {
            if !only.is_ephemeral() {
                self.reporter.success(&format!(
                    "Downloaded file as \"{}\". ({:.2}s)",
                    only.path.display(),
                    started.elapsed().as_secs_f64()
                ));
                return Ok(JobOutcome {
                    output_path: only.path.clone(),
                    elapsed: started.elapsed(),
                    transcoded: false,
                    staged,
                });
            }
        }

        if let Some(Err(err)) = cancel.map(CancelFlag::check) {
            return Err(self.drain_after_failure(&mut registry, err, log));
        }

        let job = ConversionJob {
            source_kind: source.kind(),
            inputs,
            request: output,
        };
        let output_path = self.convert(&job, &mut registry, cancel, log)?;
        Ok(JobOutcome {
            output_path,
            elapsed: started.elapsed(),
            transcoded: true,
            staged,
        })
    }

    fn stage(
        &self,
        source: &SourceReference,
        request: &JobRequest,
        output: &OutputRequest,
        registry: &mut TempFileRegistry,
        cancel: Option<&CancelFlag>,
        log: Option<&JobLog>,
    ) -> Result<Vec<StagedFile>> {
        match source.kind() {
            SourceKind::DirectFile => {
                let staged = acquire::stage_direct(
                    self.direct.as_ref(),
                    source,
                    output,
                    registry,
                    cancel,
                )?;
                if staged.file.is_ephemeral() {
                    self.reporter.info(&format!(
                        "Retrieved source file. ({:.2}s)",
                        staged.elapsed.as_secs_f64()
                    ));
                }
                emit(
                    log,
                    "info",
                    "source_staged",
                    serde_json::json!({
                        "path": staged.file.path,
                        "origin": staged.file.origin,
                        "secs": staged.elapsed.as_secs_f64(),
                    }),
                );
                Ok(vec![staged.file])
            }
            SourceKind::StreamingPlatform => {
                let staged = acquire::stage_variants(
                    self.streams.as_ref(),
                    source,
                    request.mode,
                    &request.selection,
                    &output.directory,
                    registry,
                    cancel,
                )?;
                for (role, s) in &staged {
                    self.reporter.info(&format!(
                        "Retrieved {role} stream. ({:.2}s)",
                        s.elapsed.as_secs_f64()
                    ));
                    emit(
                        log,
                        "info",
                        "stream_staged",
                        serde_json::json!({
                            "role": role,
                            "path": s.file.path,
                            "secs": s.elapsed.as_secs_f64(),
                        }),
                    );
                }
                Ok(staged.into_iter().map(|(_, s)| s.file).collect())
            }
        }
    }

    /// Converts staged inputs into the requested output and drains `registry`.
    ///
    /// On transcoder failure the captured output is logged first, then the
    /// registry drains, then the error is returned. On success the registry
    /// drains before the success report; a cleanup failure at that point
    /// keeps the output but suppresses the report.
    pub fn convert(
        &self,
        job: &ConversionJob,
        registry: &mut TempFileRegistry,
        cancel: Option<&CancelFlag>,
        log: Option<&JobLog>,
    ) -> Result<PathBuf> {
        let output_path = job.request.output_path();
        let spec = match ffmpeg::plan_transcode(
            job.source_kind,
            job.request.mode,
            job.inputs.iter().map(|f| f.path.clone()).collect(),
            output_path.clone(),
        ) {
            Ok(spec) => spec,
            Err(err) => return Err(self.drain_after_failure(registry, err, log)),
        };

        self.reporter.info(&format!(
            "Converting file and downloading as \"{}\".",
            job.request.filename
        ));
        let started = Instant::now();
        if let Err(err) = self.transcoder.transcode(&spec, cancel) {
            if let EngineError::ExternalToolFailed {
                tool,
                code,
                stdout,
                stderr,
            } = &err
            {
                error!(%tool, ?code, %stdout, %stderr, "transcoder failed");
                emit(
                    log,
                    "error",
                    "transcode_failed",
                    serde_json::json!({
                        "tool": tool,
                        "code": code,
                        "stdout": stdout,
                        "stderr": stderr,
                    }),
                );
            }
            return Err(self.drain_after_failure(registry, err, log));
        }
        let elapsed = started.elapsed();

        if let Err(cleanup) = registry.drain() {
            warn!(path = %output_path.display(), "output kept but temp cleanup failed: {cleanup}");
            emit(
                log,
                "error",
                "temp_cleanup_failed",
                serde_json::json!({ "error": cleanup.to_string() }),
            );
            return Err(cleanup);
        }

        self.reporter.success(&format!(
            "{} has been saved to \"{}\". ({:.2}s)",
            job.request.mode.result_label(),
            output_path.display(),
            elapsed.as_secs_f64()
        ));
        self.reporter
            .add_open_file_action(REVEAL_FILE_LABEL, &output_path);
        emit(
            log,
            "info",
            "transcode_finished",
            serde_json::json!({
                "output": output_path,
                "secs": elapsed.as_secs_f64(),
            }),
        );
        Ok(output_path)
    }

    /// Drains after a failed step. The step's error wins; a cleanup failure
    /// on top of it is reported and logged.
    fn drain_after_failure(
        &self,
        registry: &mut TempFileRegistry,
        err: EngineError,
        log: Option<&JobLog>,
    ) -> EngineError {
        if let Err(cleanup) = registry.drain() {
            error!("temp cleanup after failure also failed: {cleanup}");
            self.reporter
                .error(&format!("Could not remove temporary files: {cleanup}"));
            emit(
                log,
                "error",
                "temp_cleanup_failed",
                serde_json::json!({ "error": cleanup.to_string() }),
            );
        }
        err
    }
}

fn emit(log: Option<&JobLog>, level: &str, event: &str, data: serde_json::Value) {
    let Some(log) = log else {
        return;
    };
    if let Err(err) = log.line(level, event, data) {
        warn!(path = %log.path().display(), "job log write failed: {err}");
    }
}
