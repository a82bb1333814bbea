use crate::orchestrator::{JobOutcome, JobRequest, Pipeline};
use crate::{EngineError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

/// Shared stop signal checked between job steps and while tools run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    canceled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(EngineError::Canceled);
        }
        Ok(())
    }
}

pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// A job running on its own worker thread.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    cancel: CancelFlag,
    worker: thread::JoinHandle<Result<JobOutcome>>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn join(self) -> Result<JobOutcome> {
        match self.worker.join() {
            Ok(result) => result,
            Err(_) => Err(EngineError::DownloadFailed(format!(
                "job {} worker panicked",
                self.id
            ))),
        }
    }
}

/// Runs one download-convert job off the calling thread.
///
/// The pipeline moves into the worker, so a caller cannot start a second
/// job on the same pipeline until this one has been joined.
pub fn spawn_job(pipeline: Pipeline, request: JobRequest) -> Result<JobHandle> {
    let id = new_job_id();
    let cancel = CancelFlag::new();

    let worker_cancel = cancel.clone();
    let worker_id = id.clone();
    let worker = thread::Builder::new()
        .name(format!("mudl-job-{}", &id[..8]))
        .spawn(move || pipeline.run_with(&worker_id, &request, Some(&worker_cancel)))?;

    Ok(JobHandle { id, cancel, worker })
}
