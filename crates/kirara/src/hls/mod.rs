mod download;
pub mod playlist;

pub use download::{DownloadStage, M3u8Downloader};
pub use playlist::{parse_playlist, EncryptionDescriptor, PlaylistDescriptor};
