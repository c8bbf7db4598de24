use std::path::{Path, PathBuf};

use tokio::{fs::File, io::AsyncWriteExt};

use super::Muxer;
use crate::error::{KiraraError, KiraraResult};

/// Appends the parts byte by byte.
///
/// This is enough for MPEG-TS segments and for an init segment followed by fMP4
/// fragments, and does not need any external tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatMuxer;

impl Muxer for ConcatMuxer {
    async fn mux(&self, parts: &[PathBuf], output: &Path) -> KiraraResult<()> {
        if parts.is_empty() {
            return Err(KiraraError::NoSegments);
        }

        tracing::debug!("Concatenating {} parts...", parts.len());
        let mut output = File::create(output).await?;
        for part in parts {
            let mut file = File::open(part).await?;
            tokio::io::copy(&mut file, &mut output).await?;
        }
        output.flush().await?;

        Ok(())
    }
}
