use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;

use super::Muxer;
use crate::error::{KiraraError, KiraraResult};

/// Muxes parts with the ffmpeg concat demuxer, copying streams without re-encoding.
#[derive(Debug, Clone, Default)]
pub struct FfmpegMuxer {
    executable: Option<PathBuf>,
}

impl FfmpegMuxer {
    /// Use the `ffmpeg` found in `PATH`.
    pub fn new() -> Self {
        Self { executable: None }
    }

    pub fn with_executable(executable: PathBuf) -> Self {
        Self {
            executable: Some(executable),
        }
    }

    pub fn executable(&self) -> KiraraResult<PathBuf> {
        match &self.executable {
            Some(executable) => Ok(executable.clone()),
            None => Ok(which::which("ffmpeg")?),
        }
    }

    pub fn is_available(&self) -> bool {
        self.executable().is_ok()
    }

    /// Re-encode `input` into an H.264/AAC mp4 with the index at the front.
    pub async fn convert_to_mp4(&self, input: &Path, output: &Path) -> KiraraResult<()> {
        let ffmpeg = self.executable()?;
        tracing::debug!("Converting {} to mp4...", input.display());

        let mut command = Command::new(ffmpeg);
        command
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-c:v", "libx264", "-c:a", "aac", "-movflags", "+faststart"])
            .arg(output);
        run(command).await
    }
}

impl Muxer for FfmpegMuxer {
    async fn mux(&self, parts: &[PathBuf], output: &Path) -> KiraraResult<()> {
        let Some(first) = parts.first() else {
            return Err(KiraraError::NoSegments);
        };
        let ffmpeg = self.executable()?;
        tracing::debug!("Concatenating {} parts with ffmpeg...", parts.len());

        // the list lives next to the parts and is removed when dropped
        let list_dir = first.parent().unwrap_or_else(|| Path::new("."));
        let mut list = tempfile::Builder::new()
            .prefix("concat_")
            .suffix(".txt")
            .tempfile_in(list_dir)?;
        list.write_all(concat_list(parts).as_bytes())?;
        list.flush()?;

        let mut command = Command::new(ffmpeg);
        command
            .args(["-y", "-f", "concat", "-safe", "0", "-i"])
            .arg(list.path())
            .args(["-c", "copy"])
            .arg(output);
        run(command).await
    }
}

async fn run(mut command: Command) -> KiraraResult<()> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<_> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(10)..].join("\n");
        return Err(KiraraError::MuxError(format!(
            "ffmpeg exited with {}: {tail}",
            output.status
        )));
    }

    Ok(())
}

/// Input file of the concat demuxer.
fn concat_list(parts: &[PathBuf]) -> String {
    parts
        .iter()
        .map(|part| {
            let path = part
                .to_string_lossy()
                .replace('\\', "/")
                .replace('\'', "'\\''");
            format!("file '{path}'\n")
        })
        .collect()
}
