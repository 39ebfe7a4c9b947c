//! Archive download
//!
//! The whole archive is held in memory; nothing is written to disk until
//! extraction.

use log::{debug, info};
use std::io::Read;
use std::time::Duration;

use crate::errors::{KitError, KitResult};
use crate::utils::progress::ProgressTracker;

const CHUNK_SIZE: usize = 64 * 1024;
/// Upper bound on the buffer reserved up front from `Content-Length`
const MAX_PREALLOCATION: u64 = 256 * 1024 * 1024;

/// Source of archive bytes
pub trait ArchiveFetcher {
    /// Retrieve the complete archive found at `url`
    fn fetch(&self, url: &str) -> KitResult<Vec<u8>>;
}

/// Fetches archives over HTTP(S) with a blocking client
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    show_progress: bool,
}

impl HttpFetcher {
    /// Create a fetcher
    ///
    /// # Arguments
    /// * `timeout` - Overall request timeout, or `None` to wait indefinitely
    /// * `show_progress` - Draw a byte progress bar while downloading
    pub fn new(timeout: Option<Duration>, show_progress: bool) -> KitResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KitError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpFetcher {
            client,
            show_progress,
        })
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> KitResult<Vec<u8>> {
        debug!("GET {}", url);
        let mut response = self.client
            .get(url)
            .send()
            .map_err(|e| KitError::NetworkError(format!("Failed to download {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KitError::NetworkError(format!("HTTP error {} for {}", status, url)));
        }

        let total_size = response.content_length();
        let progress = if self.show_progress {
            ProgressTracker::for_download(total_size, "Downloading")
        } else {
            ProgressTracker::hidden()
        };

        // Content-Length only bounds the up-front reservation.
        let mut body: Vec<u8> = Vec::new();
        if let Some(len) = total_size {
            let reserve = usize::try_from(len.min(MAX_PREALLOCATION)).unwrap_or(0);
            if body.try_reserve(reserve).is_err() {
                debug!("Could not reserve {} bytes up front", reserve);
            }
        }
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let bytes_read = response
                .read(&mut buffer)
                .map_err(|e| KitError::NetworkError(format!("Failed to read response from {}: {}", url, e)))?;
            if bytes_read == 0 {
                break;
            }
            body.extend_from_slice(&buffer[..bytes_read]);
            progress.increment(bytes_read as u64);
        }
        progress.finish();

        if let Some(expected) = total_size {
            if body.len() as u64 != expected {
                return Err(KitError::NetworkError(format!(
                    "Connection closed after {} of {} bytes", body.len(), expected
                )));
            }
        }

        info!("Downloaded {} bytes", body.len());
        Ok(body)
    }
}
