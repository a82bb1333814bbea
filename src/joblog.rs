use crate::paths::AppPaths;
use crate::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const JOB_LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const JOB_LOG_MAX_BACKUPS: usize = 3;

/// Append-only JSONL event log for a single job.
#[derive(Debug, Clone)]
pub struct JobLog {
    job_id: String,
    path: PathBuf,
}

impl JobLog {
    pub fn new(paths: &AppPaths, job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            path: paths.job_log_path(job_id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&self, level: &str, event: &str, data: serde_json::Value) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "job_id": self.job_id,
            "level": level,
            "event": event,
            "data": data
        })
        .to_string();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_job_log_if_needed(&self.path)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

fn rotate_job_log_if_needed(path: &Path) -> Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };

    if len < JOB_LOG_ROTATE_BYTES {
        return Ok(());
    }

    rotate_file_backups(path, JOB_LOG_MAX_BACKUPS)?;
    Ok(())
}

fn rotate_file_backups(path: &Path, max_backups: usize) -> std::io::Result<()> {
    if max_backups == 0 {
        let _ = std::fs::remove_file(path);
        return Ok(());
    }

    for i in (1..=max_backups).rev() {
        let dst = path_with_suffix(path, &format!(".{i}"));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            path_with_suffix(path, &format!(".{}", i - 1))
        };

        if !src.exists() {
            continue;
        }

        if dst.exists() {
            let _ = std::fs::remove_file(&dst);
        }
        std::fs::rename(src, dst)?;
    }
    Ok(())
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_string(),
        None => suffix.to_string(),
    };
    path.with_file_name(format!("{file_name}{suffix}"))
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_appended_as_json_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let log = JobLog::new(&paths, "job-1");

        log.line("info", "job_started", serde_json::json!({ "mode": "audio" }))
            .expect("first line");
        log.line("error", "transcode_failed", serde_json::json!({ "code": 1 }))
            .expect("second line");

        let text = std::fs::read_to_string(log.path()).expect("read log");
        let events: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["job_id"], "job-1");
        assert_eq!(events[0]["event"], "job_started");
        assert_eq!(events[0]["data"]["mode"], "audio");
        assert_eq!(events[1]["level"], "error");
    }

    #[test]
    fn rotate_file_backups_shifts_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("job.jsonl");

        std::fs::write(&log, "main").expect("write main");
        std::fs::write(path_with_suffix(&log, ".1"), "b1").expect("write b1");
        std::fs::write(path_with_suffix(&log, ".2"), "b2").expect("write b2");

        rotate_file_backups(&log, 3).expect("rotate");

        assert!(!log.exists());
        assert_eq!(
            std::fs::read_to_string(path_with_suffix(&log, ".1")).expect("r1"),
            "main"
        );
        assert_eq!(
            std::fs::read_to_string(path_with_suffix(&log, ".2")).expect("r2"),
            "b1"
        );
        assert_eq!(
            std::fs::read_to_string(path_with_suffix(&log, ".3")).expect("r3"),
            "b2"
        );
    }
}
