use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context};
use clap::{Args, Parser, ValueEnum};
use clap_handler::handler;
use fake_user_agent::get_chrome_rua;
use kirara::{
    fetch::{DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY},
    util::{
        format_bytes,
        http::DEFAULT_TIMEOUT,
        path::{extension_from_url, is_mp4, output_path},
    },
    DirectFileDownloader, DownloadKind, DownloadProgress, FfmpegMuxer, HtmlRegexExtractor,
    HttpClient, KiraraMuxer, M3u8Downloader, VideoUrlExtractor,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Clone)]
#[clap(name = "download", visible_alias = "dl", short_flag = 'D')]
pub struct DownloadCommand {
    #[clap(flatten)]
    pub http: HttpOptions,

    #[clap(flatten)]
    pub download: DownloadOptions,

    #[clap(flatten)]
    pub output: OutputOptions,

    #[clap(flatten)]
    pub decrypt: DecryptOptions,

    /// Treat URL as a web page and look for the video in it
    #[clap(long)]
    pub page: bool,

    /// URL to download
    pub url: String,
}

impl DownloadCommand {
    pub async fn download(self) -> anyhow::Result<()> {
        let client = self.http.into_client(&self.url)?;

        let url = if self.page {
            HtmlRegexExtractor::new(client.clone())
                .extract_video_url(&self.url)
                .await?
                .with_context(|| format!("No video found in {}", self.url))?
        } else {
            self.url
        };

        let cancel = CancellationToken::new();
        let ctrl_c = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Ctrl-C received. Cancelling download...");
                    cancel.cancel();
                }
            })
        };

        let progress = Arc::new(DownloadProgress::new());
        let reporter = tokio::spawn(report_progress(progress.clone()));

        let result = match DownloadKind::classify(&url) {
            DownloadKind::Playlist => {
                let output = self.output.path_for(".mp4");
                let muxer = self.output.muxer()?;
                M3u8Downloader::new(client, muxer)
                    .concurrency(self.download.concurrency)
                    .temp_dir(self.download.temp_dir())
                    .key(self.decrypt.key)
                    .progress(progress)
                    .cancel_token(cancel)
                    .download(&url, &output)
                    .await
            }
            DownloadKind::Direct => {
                let output = self.output.path_for(&extension_from_url(&url));
                DirectFileDownloader::new(client)
                    .concurrency(self.download.concurrency)
                    .chunk_size(self.download.chunk_size)
                    .progress(progress)
                    .cancel_token(cancel)
                    .download(&url, &output)
                    .await
            }
        };

        reporter.abort();
        ctrl_c.abort();

        let output = result?;
        if self.output.convert_mp4 && !is_mp4(&output) {
            self.output.convert(&output).await?;
        }
        Ok(())
    }
}

async fn report_progress(progress: Arc<DownloadProgress>) {
    let mut interval = tokio::time::interval(Duration::from_secs(2));
    interval.tick().await;
    loop {
        interval.tick().await;

        let snapshot = progress.snapshot();
        let percent = snapshot
            .percent()
            .map(|p| format!("{p:.1}%"))
            .unwrap_or_else(|| "?".to_string());
        let eta = snapshot
            .eta()
            .map(|eta| format!("{}s", eta.as_secs()))
            .unwrap_or_else(|| "?".to_string());
        tracing::info!(
            "{percent} | {}/{} parts | {} | {}/s | ETA {eta}",
            snapshot.completed_units,
            snapshot.total_units,
            format_bytes(snapshot.bytes_transferred),
            format_bytes(snapshot.throughput() as u64),
        );
        if snapshot.failed_units > 0 {
            tracing::warn!("{} part(s) failed", snapshot.failed_units);
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct HttpOptions {
    /// Additional HTTP headers, e.g. `-H 'Referer: https://example.com'`
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Cookies sent to the download host, in `Set-Cookie` format
    #[clap(long = "cookie")]
    pub cookies: Vec<String>,

    /// HTTP timeout, in seconds
    #[clap(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,
}

impl HttpOptions {
    pub fn into_client(self, url: &str) -> anyhow::Result<HttpClient> {
        let mut headers = HeaderMap::new();
        for header in &self.headers {
            let Some((key, value)) = header.split_once(':') else {
                bail!("Invalid header: {header}");
            };
            headers.insert(
                HeaderName::from_str(key.trim())
                    .with_context(|| format!("Invalid header name: {key}"))?,
                HeaderValue::from_str(value.trim())
                    .with_context(|| format!("Invalid header value: {value}"))?,
            );
        }

        let client = HttpClient::new(
            Client::builder()
                .default_headers(headers)
                .user_agent(get_chrome_rua())
                .timeout(Duration::from_secs(self.timeout)),
        )?;
        if !self.cookies.is_empty() {
            client.add_cookies(self.cookies, url)?;
        }
        Ok(client)
    }
}

#[derive(Args, Clone, Debug)]
pub struct DownloadOptions {
    /// Threads limit
    #[clap(long, alias = "threads", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: NonZeroU32,

    /// Size of each ranged request of a direct download, in bytes
    #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Temporary directory
    #[clap(long, env = "TEMP")]
    pub temp_dir: Option<PathBuf>,
}

impl DownloadOptions {
    fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Decrypt related arguments
#[derive(Args, Clone, Debug, Default)]
pub struct DecryptOptions {
    /// AES-128 key in hex, used instead of the key URI of the playlist
    #[clap(long = "key")]
    pub key: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MuxerKind {
    /// Remux with ffmpeg
    #[default]
    Ffmpeg,
    /// Append segments byte by byte
    Concat,
}

/// Output options
#[derive(Args, Clone, Debug)]
pub struct OutputOptions {
    /// Output file name, without extension
    #[clap(short = 'n', long)]
    pub name: Option<String>,

    /// Output directory
    #[clap(short = 'd', long, env = "KIRARA_OUTPUT_DIR", default_value = "videos")]
    pub output_dir: PathBuf,

    #[clap(long, value_enum, default_value_t)]
    pub muxer: MuxerKind,

    /// Path of the ffmpeg executable
    #[clap(long, env = "FFMPEG")]
    pub ffmpeg: Option<PathBuf>,

    /// Convert direct downloads that are not mp4 with ffmpeg
    #[clap(long)]
    pub convert_mp4: bool,

    /// Keep the original file after conversion
    #[clap(long, requires = "convert_mp4")]
    pub keep_source: bool,
}

impl OutputOptions {
    fn path_for(&self, extension: &str) -> PathBuf {
        let name = self.name.clone().unwrap_or_else(|| {
            let started_at = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            format!("video_{started_at}")
        });
        output_path(&self.output_dir, &name, extension)
    }

    fn ffmpeg(&self) -> FfmpegMuxer {
        match &self.ffmpeg {
            Some(ffmpeg) => FfmpegMuxer::with_executable(ffmpeg.clone()),
            None => FfmpegMuxer::new(),
        }
    }

    fn muxer(&self) -> anyhow::Result<KiraraMuxer> {
        match self.muxer {
            MuxerKind::Ffmpeg => {
                let muxer = self.ffmpeg();
                // fail before downloading anything
                muxer.executable().context(
                    "ffmpeg is required to merge segments. Install it or use `--muxer concat`",
                )?;
                Ok(KiraraMuxer::Ffmpeg(muxer))
            }
            MuxerKind::Concat => Ok(KiraraMuxer::concat()),
        }
    }

    async fn convert(&self, input: &Path) -> anyhow::Result<()> {
        let output = input.with_extension("mp4");
        tracing::info!("Converting {} to mp4...", input.display());
        self.ffmpeg().convert_to_mp4(input, &output).await?;

        if !self.keep_source {
            tokio::fs::remove_file(input).await?;
        }
        tracing::info!("Converted: {}", output.display());
        Ok(())
    }
}

#[handler(DownloadCommand)]
pub async fn download(args: DownloadCommand) -> anyhow::Result<()> {
    args.download().await
}
