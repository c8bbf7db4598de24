pub mod http;
pub mod path;
pub mod range;

/// How a URL is downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    /// HLS playlist, downloaded segment by segment and muxed.
    Playlist,
    /// Any other media file, downloaded as is.
    Direct,
}

impl DownloadKind {
    /// URLs containing `.m3u8` are playlists. The response is never inspected.
    pub fn classify(url: &str) -> Self {
        if url.contains(".m3u8") {
            Self::Playlist
        } else {
            Self::Direct
        }
    }
}

/// Human readable byte size, e.g. `2.00 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}
