use crate::acquire::DirectDownloader;
use crate::jobs::CancelFlag;
use crate::{EngineError, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const DEFAULT_HTTP_USER_AGENT: &str = concat!("mudl/", env!("CARGO_PKG_VERSION"));

/// Plain HTTP(S) downloader for direct file URLs.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    timeout_secs: u64,
}

impl HttpDownloader {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn agent(&self) -> ureq::Agent {
        let mut config = ureq::Agent::config_builder();
        config = config
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(self.timeout_secs.max(1))))
            .user_agent(DEFAULT_HTTP_USER_AGENT);
        config.build().into()
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new(60)
    }
}

impl DirectDownloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path, cancel: Option<&CancelFlag>) -> Result<()> {
        let mut response = self
            .agent()
            .get(url)
            .call()
            .map_err(|err| EngineError::DownloadFailed(format!("request failed for {url}: {err}")))?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(EngineError::DownloadFailed(format!("http {status} for {url}")));
        }

        let written = match copy_body(response.body_mut().as_reader(), dest, cancel) {
            Ok(n) => n,
            Err(err) => {
                let _ = std::fs::remove_file(dest);
                return Err(err);
            }
        };
        if written == 0 {
            let _ = std::fs::remove_file(dest);
            return Err(EngineError::DownloadFailed(format!("empty response body for {url}")));
        }

        debug!(url, path = %dest.display(), bytes = written, "direct download complete");
        Ok(())
    }
}

fn copy_body(mut body: impl Read, dest: &Path, cancel: Option<&CancelFlag>) -> Result<u64> {
    let mut output = std::fs::File::create(dest)?;
    let mut buf = [0_u8; 64 * 1024];
    let mut written: u64 = 0;

    loop {
        if let Some(flag) = cancel {
            flag.check()?;
        }
        let read = body
            .read(&mut buf)
            .map_err(|err| EngineError::DownloadFailed(format!("failed reading response body: {err}")))?;
        if read == 0 {
            break;
        }
        output.write_all(&buf[..read])?;
        written = written.saturating_add(read as u64);
    }
    output.flush()?;
    Ok(written)
}
