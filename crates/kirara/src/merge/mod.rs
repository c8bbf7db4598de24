mod concat;
mod ffmpeg;

pub use concat::ConcatMuxer;
pub use ffmpeg::FfmpegMuxer;

use crate::error::KiraraResult;
use std::{
    future::Future,
    path::{Path, PathBuf},
};

/// Combines downloaded parts into one output file.
pub trait Muxer {
    /// `parts` are in playback order. The init segment, if any, comes first.
    fn mux(&self, parts: &[PathBuf], output: &Path)
        -> impl Future<Output = KiraraResult<()>> + Send;
}

pub enum KiraraMuxer {
    Ffmpeg(FfmpegMuxer),
    Concat(ConcatMuxer),
}

impl KiraraMuxer {
    pub fn ffmpeg(executable: Option<PathBuf>) -> Self {
        Self::Ffmpeg(match executable {
            Some(executable) => FfmpegMuxer::with_executable(executable),
            None => FfmpegMuxer::new(),
        })
    }

    pub fn concat() -> Self {
        Self::Concat(ConcatMuxer)
    }
}

impl Muxer for KiraraMuxer {
    async fn mux(&self, parts: &[PathBuf], output: &Path) -> KiraraResult<()> {
        match self {
            Self::Ffmpeg(muxer) => muxer.mux(parts, output).await,
            Self::Concat(muxer) => muxer.mux(parts, output).await,
        }
    }
}
