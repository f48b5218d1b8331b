//! Playlist download and connectivity probe over HTTP(S)

use crate::error::PipelineError;
use crate::m3u_parser;
use crate::models::Channel;
use flate2::read::GzDecoder;
use std::io::Read;
use std::time::Duration;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Network settings for the fetcher
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Largest playlist body accepted, in bytes
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "VLC/3.0.16 LibVLC/3.0.16".to_string(),
            connect_timeout_secs: 30,
            read_timeout_secs: 120,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Blocking HTTP client for playlists. Meant to be moved onto a worker thread;
/// clones share the connection pool.
#[derive(Clone)]
pub struct PlaylistFetcher {
    agent: ureq::Agent,
    config: FetchConfig,
    last_error: Option<String>,
}

impl PlaylistFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.read_timeout_secs)))
            .timeout_connect(Some(Duration::from_secs(config.connect_timeout_secs)))
            .http_status_as_error(false)
            .build()
            .new_agent();

        Self {
            agent,
            config,
            last_error: None,
        }
    }

    /// Message from the most recent failed probe, cleared by a successful one
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// GET `url` and report whether it answered with exactly HTTP 200
    pub fn probe(&mut self, url: &str) -> bool {
        if let Err(e) = validate_url(url) {
            self.last_error = Some(e.message);
            return false;
        }

        match self.agent.get(url).header("User-Agent", &self.config.user_agent).call() {
            Ok(response) if response.status() == 200 => {
                tracing::info!(url, "Probe succeeded");
                self.last_error = None;
                true
            }
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::warn!(url, status, "Probe rejected");
                self.last_error = Some(format!("HTTP {}", status));
                false
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "Probe failed");
                self.last_error = Some(format!("Connection error: {}", e));
                false
            }
        }
    }

    /// Download the raw playlist body, inflating gzip payloads
    pub fn fetch_playlist(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        validate_url(url)?;

        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", &self.config.user_agent)
            .call()
            .map_err(|e| PipelineError::network(format!("Request failed: {}", e)))?;

        if response.status() != 200 {
            return Err(PipelineError::network(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }

        let body = response
            .body_mut()
            .with_config()
            .limit(self.config.max_body_bytes)
            .read_to_vec()
            .map_err(|e| PipelineError::network(format!("Read failed: {}", e)))?;

        tracing::debug!(url, bytes = body.len(), "Playlist downloaded");
        maybe_gunzip(body, self.config.max_body_bytes)
    }

    /// Download and decode the playlist as UTF-8 text
    pub fn fetch_text(&self, url: &str) -> Result<String, PipelineError> {
        let bytes = self.fetch_playlist(url)?;
        decode_text(bytes)
    }

    /// Download, decode and parse. Zero channels is reported as `ParseEmpty`.
    pub fn download_channels(&self, url: &str) -> Result<Vec<Channel>, PipelineError> {
        let text = self.fetch_text(url)?;
        let channels = m3u_parser::parse_m3u(&text);
        if channels.is_empty() {
            return Err(PipelineError::parse_empty(
                "no channels found in the downloaded playlist",
            ));
        }
        tracing::info!(url, count = channels.len(), "Playlist parsed");
        Ok(channels)
    }
}

impl Default for PlaylistFetcher {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

fn validate_url(url: &str) -> Result<(), PipelineError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PipelineError::invalid_url("playlist URL is not configured"));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(PipelineError::invalid_url(format!("unsupported URL: {}", url)));
    }
    Ok(())
}

/// Inflate gzip bodies, holding the inflated size to `limit` bytes
fn maybe_gunzip(body: Vec<u8>, limit: u64) -> Result<Vec<u8>, PipelineError> {
    if !body.starts_with(&GZIP_MAGIC) {
        return Ok(body);
    }

    let mut inflated = Vec::new();
    GzDecoder::new(body.as_slice())
        .take(limit.saturating_add(1))
        .read_to_end(&mut inflated)
        .map_err(|e| PipelineError::invalid_data(format!("Corrupt gzip body: {}", e)))?;

    if inflated.len() as u64 > limit {
        tracing::warn!(compressed = body.len(), limit, "Inflated playlist too large");
        return Err(PipelineError::invalid_data("playlist exceeds size limit"));
    }
    Ok(inflated)
}

/// UTF-8 decode, `InvalidData` when the body is not text
pub fn decode_text(bytes: Vec<u8>) -> Result<String, PipelineError> {
    String::from_utf8(bytes)
        .map_err(|e| PipelineError::invalid_data(format!("Playlist is not valid UTF-8: {}", e)))
}

#[cfg(test)]
#[path = "fetcher_tests.rs"]
mod tests;
