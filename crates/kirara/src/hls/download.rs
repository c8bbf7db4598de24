use std::{
    fmt,
    future::Future,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::playlist::{
    is_master_playlist, parse_master_playlist, parse_playlist, select_best_variant,
    PlaylistDescriptor,
};
use crate::{
    cache::WorkDir,
    decrypt::Aes128Key,
    error::{KiraraError, KiraraResult},
    fetch::{first_error, get_bytes, get_text, FetchTask, ParallelFetcher, DEFAULT_CONCURRENCY},
    merge::Muxer,
    progress::DownloadProgress,
    util::http::HttpClient,
};

/// Master playlists pointing at master playlists are followed at most this many times.
const MAX_PLAYLIST_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStage {
    FetchPlaylist,
    ParsePlaylist,
    FetchKey,
    FetchInitSegment,
    FetchAndDecryptSegments,
    Mux,
}

impl fmt::Display for DownloadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FetchPlaylist => "Playlist fetch",
            Self::ParsePlaylist => "Playlist parse",
            Self::FetchKey => "Key fetch",
            Self::FetchInitSegment => "Init segment fetch",
            Self::FetchAndDecryptSegments => "Segment download",
            Self::Mux => "Mux",
        })
    }
}

/// Downloads an HLS playlist into a single file.
///
/// Segments are stored in a temporary working directory which is always removed
/// before [M3u8Downloader::download] returns.
pub struct M3u8Downloader<M> {
    client: HttpClient,
    muxer: M,

    concurrency: NonZeroU32,
    temp_root: PathBuf,
    /// Hex encoded key overriding the key URI of the playlist.
    manual_key: Option<String>,

    progress: Arc<DownloadProgress>,
    cancel: CancellationToken,
}

impl<M> M3u8Downloader<M>
where
    M: Muxer + Send + Sync,
{
    pub fn new(client: HttpClient, muxer: M) -> Self {
        Self {
            client,
            muxer,
            concurrency: DEFAULT_CONCURRENCY,
            temp_root: std::env::temp_dir(),
            manual_key: None,
            progress: Arc::new(DownloadProgress::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn concurrency(mut self, concurrency: NonZeroU32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Directory under which the per-download working directory is created.
    pub fn temp_dir(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    pub fn key(mut self, key: Option<String>) -> Self {
        self.manual_key = key;
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

    pub async fn download(&self, url: &str, output: &Path) -> KiraraResult<PathBuf> {
        tracing::info!("Start fetching M3U8 file.");
        let (playlist_url, content) = self
            .cancellable(self.fetch_playlist(url))
            .await
            .map_err(|e| e.at(DownloadStage::FetchPlaylist))?;
        tracing::info!("M3U8 file fetched.");
        for line in content.lines().take(15) {
            log::debug!("{line}");
        }

        let playlist = parse_playlist(&content, &playlist_url)
            .map_err(|e| e.at(DownloadStage::ParsePlaylist))?;
        tracing::info!("Found {} segments.", playlist.segments.len());

        let key = self
            .cancellable(self.fetch_key(&playlist))
            .await
            .map_err(|e| e.at(DownloadStage::FetchKey))?;

        let work_dir = WorkDir::create_in(&self.temp_root)
            .map_err(|e| e.at(DownloadStage::FetchInitSegment))?;
        tracing::debug!("Working directory: {}", work_dir.path().display());

        let result = self.download_in(&work_dir, &playlist, key, output).await;

        tracing::debug!("Removing temporary files...");
        work_dir.close();

        if let Ok(output) = &result {
            tracing::info!("All finished. Please checkout your file at {}", output.display());
        }
        result
    }

    async fn download_in(
        &self,
        work_dir: &WorkDir,
        playlist: &PlaylistDescriptor,
        key: Option<Arc<Aes128Key>>,
        output: &Path,
    ) -> KiraraResult<PathBuf> {
        let init_segment = match &playlist.init_segment_url {
            Some(url) => {
                tracing::info!("Downloading init segment...");
                let path = work_dir.init_segment_path();
                self.cancellable(async {
                    let bytes = get_bytes(&self.client, url, None).await?;
                    tokio::fs::write(&path, &bytes).await?;
                    Ok::<_, KiraraError>(())
                })
                .await
                .map_err(|e| e.at(DownloadStage::FetchInitSegment))?;
                Some(path)
            }
            None => None,
        };

        let tasks: Vec<_> = playlist
            .segments
            .iter()
            .enumerate()
            .map(|(index, url)| FetchTask::whole(index, url.as_str(), work_dir.segment_path(index)))
            .collect();
        let mut parts: Vec<_> = init_segment.into_iter().collect();
        parts.extend(tasks.iter().map(|task| work_dir.segment_path(task.index)));

        tracing::info!(
            "Start downloading {} segments with {} thread(s).",
            tasks.len(),
            self.concurrency.get()
        );
        let fetcher = ParallelFetcher::new(self.concurrency)
            .progress(self.progress.clone())
            .cancel_token(self.cancel.clone())
            .fail_fast(true);
        let results = fetcher
            .fetch_all(&self.client, tasks, move |index, data| match &key {
                Some(key) => Ok(Bytes::from(key.decrypt(index as u32, &data)?)),
                None => Ok(data),
            })
            .await;
        let downloaded = first_error(results).map_err(|e| {
            tracing::error!("Segment download failed: {e}");
            e.at(DownloadStage::FetchAndDecryptSegments)
        })?;
        tracing::info!(
            "Segments downloaded ({}).",
            crate::util::format_bytes(downloaded)
        );

        if playlist.segments.is_empty() {
            return Err(KiraraError::NoSegments.at(DownloadStage::Mux));
        }

        tracing::info!("Merging segments...");
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| KiraraError::from(e).at(DownloadStage::Mux))?;
            }
        }
        self.muxer
            .mux(&parts, output)
            .await
            .map_err(|e| e.at(DownloadStage::Mux))?;

        Ok(output.to_path_buf())
    }

    /// Returns the URL and content of the media playlist, following master playlists.
    async fn fetch_playlist(&self, url: &str) -> KiraraResult<(String, String)> {
        let mut url = url.to_string();
        for _ in 0..MAX_PLAYLIST_DEPTH {
            let content = get_text(&self.client, &url).await?;
            if !is_master_playlist(&content) {
                return Ok((url, content));
            }

            tracing::info!("Master playlist input detected. Auto selecting best quality stream.");
            let variants = parse_master_playlist(&content, &url);
            let Some(variant) = select_best_variant(&variants) else {
                return Ok((url, content));
            };
            tracing::info!(
                "Best stream: {}; Bandwidth: {}",
                variant.url,
                variant.bandwidth
            );
            url = variant.url.clone();
        }

        tracing::warn!("Too many nested master playlists.");
        Err(KiraraError::NoSegments)
    }

    async fn fetch_key(
        &self,
        playlist: &PlaylistDescriptor,
    ) -> KiraraResult<Option<Arc<Aes128Key>>> {
        let Some(encryption) = &playlist.encryption else {
            return Ok(None);
        };

        let key = match &self.manual_key {
            Some(key) => {
                tracing::info!("AES-128 encryption detected. Using manual key.");
                Aes128Key::from_hex(key, encryption.iv)?
            }
            None => {
                tracing::info!("AES-128 encryption detected. Fetching key...");
                let key = get_bytes(&self.client, &encryption.key_url, None).await?;
                Aes128Key::from_bytes(key.to_vec(), encryption.iv)?
            }
        };
        Ok(Some(Arc::new(key)))
    }

    async fn cancellable<T, F>(&self, future: F) -> KiraraResult<T>
    where
        F: Future<Output = KiraraResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(KiraraError::Cancelled),
            result = future => result,
        }
    }
}
