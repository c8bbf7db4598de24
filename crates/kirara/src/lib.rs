pub mod cache;
pub mod decrypt;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod hls;
pub mod merge;
pub mod progress;
pub mod raw;
pub mod util;

pub use error::{ErrorKind, KiraraError, KiraraResult};
pub use extract::{HtmlRegexExtractor, VideoUrlExtractor};
pub use hls::{DownloadStage, M3u8Downloader};
pub use merge::{ConcatMuxer, FfmpegMuxer, KiraraMuxer, Muxer};
pub use progress::{DownloadProgress, ProgressSnapshot};
pub use raw::{DirectFileDownloader, ProbeResult};
pub use util::{http::HttpClient, DownloadKind};

use std::path::{Path, PathBuf};

/// ┌──────────────┐  segment 0   ┌──────────────────┐
/// │              ├──────────────►                  ├─── decrypt ──► segment_00000
/// │   Playlist   │  segment 1   │ ParallelFetcher  │
/// │   (.m3u8)    ├──────────────►                  ├─── decrypt ──► segment_00001
/// │              │     ...      │  [Semaphore(N)]  │
/// │              ├──────────────►                  ├─── decrypt ──► ...
/// └──────────────┘              └──────────────────┘
///                                                        │
///                                 init.mp4 + segments ───┴──► Muxer ──► output
///
/// Downloads an HLS playlist with default options and muxes it with ffmpeg.
pub async fn download_playlist_video<P>(url: &str, output: P) -> KiraraResult<PathBuf>
where
    P: AsRef<Path>,
{
    let client = HttpClient::with_default_timeout()?;
    M3u8Downloader::new(client, FfmpegMuxer::new())
        .download(url, output.as_ref())
        .await
}

/// Downloads a single file with default options.
pub async fn download_direct_file<P>(url: &str, output: P) -> KiraraResult<PathBuf>
where
    P: AsRef<Path>,
{
    let client = HttpClient::with_default_timeout()?;
    DirectFileDownloader::new(client)
        .download(url, output.as_ref())
        .await
}
