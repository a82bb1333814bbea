use crate::acquire::StreamBackend;
use crate::models::SourceReference;
use crate::{EngineError, Result};
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;
use tracing::debug;
use url::Url;

const STREAMING_HOST_SUFFIXES: [&str; 2] = ["youtube.com", "youtu.be"];

/// What can be learned from a URL without downloading anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMetadata {
    pub url: String,
    /// Last path segment, empty when the path ends in `/`.
    pub filename: String,
    pub host: String,
    pub is_streaming: bool,
}

impl UrlMetadata {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidUrl("empty URL provided".to_string()));
        }

        let parsed = Url::parse(trimmed)
            .map_err(|e| EngineError::InvalidUrl(format!("{trimmed}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(EngineError::InvalidUrl(format!(
                "unsupported URL scheme {}; only http/https are allowed",
                parsed.scheme()
            )));
        }
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EngineError::InvalidUrl(format!("URL is missing host: {trimmed}")))?
            .to_ascii_lowercase();

        let filename = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            url: trimmed.to_string(),
            filename,
            is_streaming: is_streaming_host(&host),
            host,
        })
    }

    /// Resolves the host to its addresses; fails when the name does not resolve.
    pub fn resolve_host_addrs(&self) -> Result<Vec<IpAddr>> {
        let port = Url::parse(&self.url)
            .ok()
            .and_then(|u| u.port_or_known_default())
            .unwrap_or(80);
        let addrs = (self.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| EngineError::InvalidUrl(format!("cannot resolve host {}: {e}", self.host)))?
            .map(|a| a.ip())
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(EngineError::InvalidUrl(format!(
                "host {} resolved to no addresses",
                self.host
            )));
        }
        Ok(addrs)
    }
}

/// Streaming-platform hosts may carry a subdomain (`www.`, `m.`, `music.`),
/// so only the suffix is compared.
pub fn is_streaming_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    STREAMING_HOST_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// Turns a URL into the [`SourceReference`] a job works from.
pub trait SourceResolver: Send + Sync {
    fn classify(&self, url: &str) -> Result<SourceReference>;
}

pub struct MetadataResolver {
    streams: Arc<dyn StreamBackend>,
    resolve_host: bool,
}

impl MetadataResolver {
    pub fn new(streams: Arc<dyn StreamBackend>) -> Self {
        Self {
            streams,
            resolve_host: true,
        }
    }

    pub fn with_host_resolution(mut self, enabled: bool) -> Self {
        self.resolve_host = enabled;
        self
    }
}

impl SourceResolver for MetadataResolver {
    fn classify(&self, url: &str) -> Result<SourceReference> {
        let meta = UrlMetadata::parse(url)?;
        if self.resolve_host {
            let addrs = meta.resolve_host_addrs()?;
            debug!(host = %meta.host, ?addrs, "resolved source host");
        }

        if !meta.is_streaming {
            let filename = if meta.filename.is_empty() {
                "download".to_string()
            } else {
                meta.filename
            };
            return Ok(SourceReference::direct_file(meta.url, filename, meta.host));
        }

        let listing = self.streams.list_variants(&meta.url)?;
        debug!(
            title = %listing.title,
            variants = listing.variants.len(),
            "listed stream variants"
        );
        Ok(SourceReference::streaming(
            meta.url,
            listing.title,
            meta.host,
            listing.variants,
        ))
    }
}
