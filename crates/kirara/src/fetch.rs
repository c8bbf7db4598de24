use std::{
    future::Future,
    io::SeekFrom,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use reqwest::header::RANGE;
use tokio::{
    fs::OpenOptions,
    io::{AsyncSeekExt, AsyncWriteExt},
    sync::Semaphore,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{KiraraError, KiraraResult},
    progress::DownloadProgress,
    util::{http::HttpClient, range::ByteRange},
};

pub const DEFAULT_CONCURRENCY: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => unreachable!(),
};

/// 2 MiB per ranged request.
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Standalone file, written at once after the whole body is received.
    File(PathBuf),
    /// Disjoint byte range of a file that has been pre-allocated with [preallocate].
    Range { path: PathBuf, range: ByteRange },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    /// Position of the task in the output. Also the IV seed of playlist segments.
    pub index: usize,
    pub url: String,
    pub destination: Destination,
}

impl FetchTask {
    pub fn whole(index: usize, url: impl Into<String>, path: PathBuf) -> Self {
        Self {
            index,
            url: url.into(),
            destination: Destination::File(path),
        }
    }

    pub fn range(index: usize, url: impl Into<String>, path: PathBuf, range: ByteRange) -> Self {
        Self {
            index,
            url: url.into(),
            destination: Destination::Range { path, range },
        }
    }
}

/// One ranged task per chunk of `[0, total_size)`.
pub fn plan_ranges(url: &str, path: PathBuf, total_size: u64, chunk_size: u64) -> Vec<FetchTask> {
    ByteRange::split(total_size, chunk_size)
        .into_iter()
        .enumerate()
        .map(|(index, range)| FetchTask::range(index, url, path.clone(), range))
        .collect()
}

/// Create (or truncate) `path` and grow it to `size` bytes.
pub async fn preallocate<P>(path: P, size: u64) -> KiraraResult<()>
where
    P: AsRef<Path>,
{
    let file = tokio::fs::File::create(path).await?;
    file.set_len(size).await?;
    file.sync_all().await?;
    Ok(())
}

/// GET `url`, optionally restricted to `range`, and read the whole body.
pub async fn get_bytes(
    client: &HttpClient,
    url: &str,
    range: Option<ByteRange>,
) -> KiraraResult<Bytes> {
    let mut request = client.get(url);
    if let Some(range) = range {
        request = request.header(RANGE, range.to_http_range());
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        if let Ok(body) = response.text().await {
            tracing::debug!("Error body of {url}: {body}");
        }
        return Err(KiraraError::HttpError(status));
    }

    Ok(response.bytes().await?)
}

pub async fn get_text(client: &HttpClient, url: &str) -> KiraraResult<String> {
    let bytes = get_bytes(client, url, None).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Runs independent fetches with a hard cap on how many are in flight.
#[derive(Clone)]
pub struct ParallelFetcher {
    concurrency: NonZeroU32,
    progress: Arc<DownloadProgress>,
    cancel: CancellationToken,
    fail_fast: bool,
}

impl Default for ParallelFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl ParallelFetcher {
    pub fn new(concurrency: NonZeroU32) -> Self {
        Self {
            concurrency,
            progress: Arc::new(DownloadProgress::new()),
            cancel: CancellationToken::new(),
            fail_fast: false,
        }
    }

    pub fn progress(mut self, progress: Arc<DownloadProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stop admitting queued tasks after the first failure. Running tasks still finish.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn concurrency(&self) -> NonZeroU32 {
        self.concurrency
    }

    /// Run `fetch` for every task, at most `concurrency` at a time.
    ///
    /// Tasks complete in any order, but the returned results are in the order of `tasks`.
    /// A task that never started because of cancellation yields [KiraraError::Cancelled].
    pub async fn run_all<T, F, Fut>(&self, tasks: Vec<T>, fetch: F) -> Vec<KiraraResult<u64>>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = KiraraResult<u64>> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.concurrency.get() as usize));
        // cancelled by the caller, or by the first failure when `fail_fast` is set
        let admission = self.cancel.child_token();
        let fetch = Arc::new(fetch);

        self.progress.add_total_units(tasks.len() as u64);
        tracing::debug!(
            "Running {} task(s) with {} thread(s).",
            tasks.len(),
            self.concurrency.get()
        );

        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let permits = permits.clone();
                let admission = admission.clone();
                let cancel = self.cancel.clone();
                let fetch = fetch.clone();
                let progress = self.progress.clone();
                let fail_fast = self.fail_fast;

                tokio::spawn(async move {
                    let result: KiraraResult<u64> = async {
                        let _permit = tokio::select! {
                            biased;
                            _ = admission.cancelled() => return Err(KiraraError::Cancelled),
                            permit = permits.acquire_owned() => {
                                permit.map_err(|_| KiraraError::Cancelled)?
                            }
                        };
                        if admission.is_cancelled() {
                            return Err(KiraraError::Cancelled);
                        }

                        tokio::select! {
                            _ = cancel.cancelled() => Err(KiraraError::Cancelled),
                            result = fetch(task) => result,
                        }
                    }
                    .await;

                    match &result {
                        Ok(_) => progress.complete_unit(),
                        Err(e) if e.is_cancelled() => {}
                        Err(_) => {
                            progress.fail_unit();
                            if fail_fast {
                                admission.cancel();
                            }
                        }
                    }
                    result
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(KiraraError::JoinError(e)),
            });
        }
        results
    }

    /// Fetch every task over HTTP.
    ///
    /// [Destination::File] tasks receive the whole body, which is passed through
    /// `transform` (on the blocking pool) before being written. [Destination::Range]
    /// tasks are written untouched at their offset, each through its own file handle.
    pub async fn fetch_all<T>(
        &self,
        client: &HttpClient,
        tasks: Vec<FetchTask>,
        transform: T,
    ) -> Vec<KiraraResult<u64>>
    where
        T: Fn(usize, Bytes) -> KiraraResult<Bytes> + Send + Sync + 'static,
    {
        let client = client.clone();
        let transform = Arc::new(transform);
        let progress = self.progress.clone();

        self.run_all(tasks, move |task| {
            let client = client.clone();
            let transform = transform.clone();
            let progress = progress.clone();
            async move {
                let index = task.index;
                let url = task.url.clone();
                fetch_task(&client, task, transform, &progress)
                    .await
                    .map_err(|e| match e {
                        KiraraError::Cancelled => e,
                        e => {
                            tracing::warn!("Fetching {url} failed: {e}");
                            KiraraError::TaskFailed {
                                index,
                                url,
                                source: Box::new(e),
                            }
                        }
                    })
            }
        })
        .await
    }
}

async fn fetch_task<T>(
    client: &HttpClient,
    task: FetchTask,
    transform: Arc<T>,
    progress: &DownloadProgress,
) -> KiraraResult<u64>
where
    T: Fn(usize, Bytes) -> KiraraResult<Bytes> + Send + Sync + 'static,
{
    let FetchTask {
        index,
        url,
        destination,
    } = task;

    match destination {
        Destination::File(path) => {
            let bytes = get_bytes(client, &url, None).await?;
            progress.add_bytes(bytes.len() as u64);

            let data = tokio::task::spawn_blocking(move || transform(index, bytes)).await??;
            tokio::fs::write(&path, &data).await?;
            tracing::debug!("Task {index} written to {}", path.display());
            Ok(data.len() as u64)
        }
        Destination::Range { path, range } => {
            let bytes = get_bytes(client, &url, Some(range)).await?;
            let actual = bytes.len() as u64;
            if actual != range.length {
                return Err(KiraraError::RangeLengthMismatch {
                    expected: range.length,
                    actual,
                });
            }

            let mut file = OpenOptions::new().write(true).open(&path).await?;
            file.seek(SeekFrom::Start(range.offset)).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;

            progress.add_bytes(actual);
            Ok(actual)
        }
    }
}

/// Total size of all successful tasks, or the first real failure in task order.
///
/// [KiraraError::Cancelled] is only returned when no other error happened, as it is
/// usually a consequence of another failure.
pub fn first_error(results: Vec<KiraraResult<u64>>) -> KiraraResult<u64> {
    let mut total = 0;
    let mut cancelled = false;
    for result in results {
        match result {
            Ok(size) => total += size,
            Err(e) if e.is_cancelled() => cancelled = true,
            Err(e) => return Err(e),
        }
    }

    if cancelled {
        Err(KiraraError::Cancelled)
    } else {
        Ok(total)
    }
}
