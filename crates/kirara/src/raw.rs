use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::TryStreamExt;
use reqwest::header::{HeaderMap, ACCEPT, ACCEPT_RANGES, CONTENT_LENGTH};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{KiraraError, KiraraResult},
    fetch::{
        first_error, plan_ranges, preallocate, ParallelFetcher, DEFAULT_CHUNK_SIZE,
        DEFAULT_CONCURRENCY,
    },
    progress::DownloadProgress,
    util::{format_bytes, http::HttpClient},
};

const STREAM_BUFFER_SIZE: usize = 8192;

/// What a HEAD request tells about a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeResult {
    pub total_bytes: Option<u64>,
    pub supports_range: bool,
}

impl ProbeResult {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let total_bytes = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let supports_range = headers
            .get(ACCEPT_RANGES)
            .map(|r| r.as_bytes().eq_ignore_ascii_case(b"bytes"))
            .unwrap_or(false);

        Self {
            total_bytes,
            supports_range,
        }
    }

    /// Ranged download needs both range support and a non-empty known size.
    pub fn ranged_size(&self) -> Option<u64> {
        match self.total_bytes {
            Some(total) if self.supports_range && total > 0 => Some(total),
            _ => None,
        }
    }
}

/// Downloads a single remote file, in parallel ranges when the server allows it.
pub struct DirectFileDownloader {
    client: HttpClient,
    concurrency: NonZeroU32,
    chunk_size: u64,

    progress: Arc<DownloadProgress>,
    cancel: CancellationToken,
}

impl DirectFileDownloader {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            concurrency: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: Arc::new(DownloadProgress::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn concurrency(mut self, concurrency: NonZeroU32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Size of each ranged request. Zero falls back to the default.
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self
    }

    pub fn progress(mut self, progress: Arc<DownloadProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress_handle(&self) -> Arc<DownloadProgress> {
        self.progress.clone()
    }

    /// An unsuccessful HEAD response means nothing is known about the file.
    pub async fn probe(&self, url: &str) -> KiraraResult<ProbeResult> {
        let response = self.client.head(url).send().await?;
        if !response.status().is_success() {
            tracing::debug!("HEAD {url} returned {}", response.status());
            return Ok(ProbeResult::default());
        }
        Ok(ProbeResult::from_headers(response.headers()))
    }

    pub async fn download(&self, url: &str, output: &Path) -> KiraraResult<PathBuf> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let probe = self.probe(url).await?;
        if let Some(total) = probe.total_bytes {
            self.progress.set_total_bytes(total);
        }

        match probe.ranged_size() {
            Some(total) => {
                tracing::info!(
                    "Downloading {} in parallel ranges of {}.",
                    format_bytes(total),
                    format_bytes(self.chunk_size)
                );
                self.download_ranges(url, output, total).await?;
            }
            None => {
                tracing::info!("Server does not support ranged download. Downloading as a stream.");
                self.download_stream(url, output).await?;
            }
        }

        tracing::info!("Download finished: {}", output.display());
        Ok(output.to_path_buf())
    }

    /// Fetch `[0, total_size)` as independent ranges into a pre-allocated file.
    pub async fn download_ranges(
        &self,
        url: &str,
        output: &Path,
        total_size: u64,
    ) -> KiraraResult<u64> {
        preallocate(output, total_size).await?;

        let tasks = plan_ranges(url, output.to_path_buf(), total_size, self.chunk_size);
        let fetcher = ParallelFetcher::new(self.concurrency)
            .progress(self.progress.clone())
            .cancel_token(self.cancel.clone())
            .fail_fast(true);
        let results = fetcher.fetch_all(&self.client, tasks, |_, data| Ok(data)).await;

        let result = first_error(results);
        if result.is_err() {
            // a partially written file is useless
            if let Err(e) = tokio::fs::remove_file(output).await {
                tracing::warn!("Failed to remove {}: {e}", output.display());
            }
        }
        result
    }

    /// Fetch the whole body sequentially.
    pub async fn download_stream(&self, url: &str, output: &Path) -> KiraraResult<u64> {
        let response = self.client.get(url).header(ACCEPT, "*/*").send().await?;
        if !response.status().is_success() {
            return Err(KiraraError::HttpError(response.status()));
        }
        if let Some(total) = response.content_length().filter(|total| *total > 0) {
            self.progress.set_total_bytes(total);
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = tokio_util::io::StreamReader::new(stream);
        let mut writer = BufWriter::new(tokio::fs::File::create(output).await?);

        let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
        let mut written = 0;
        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return Err(KiraraError::Cancelled),
                read = reader.read(&mut buffer) => read?,
            };
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read]).await?;
            written += read as u64;
            self.progress.add_bytes(read as u64);
        }
        writer.flush().await?;

        Ok(written)
    }
}
