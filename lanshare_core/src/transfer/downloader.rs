//! Range-request download engine.
//!
//! Large files are split into fixed-size chunks fetched by a small pool of
//! worker tasks; each chunk streams into its own part file and the parts are
//! merged and verified at the end. Small files (or servers that ignore
//! ranges) go through a single sequential request that can continue from a
//! `.partial` file.

use futures_util::future::join_all;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::integrity::{self, HashAlgorithm};
use crate::resume::{ResumeRecord, ResumeStatus, ResumeStore};

use super::job::{ChunkRange, DownloadJob, JobState, part_path, partial_path};
use super::merge::merge_and_verify;
use super::policy::{adaptive_buffer_size, optimal_worker_count, plan_chunks, should_use_multithread};
use super::progress::{ProgressObserver, ProgressUpdate};
use super::speed::SpeedMonitor;
use super::utils::open_temp_file;

/// Per-call knobs for [`ChunkedDownloader::download`]
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Requested worker count; clamped to `[1, max_download_threads]`.
    /// `None` picks a count from the file size.
    pub workers: Option<usize>,
    pub algorithm: HashAlgorithm,
    /// Reuse part files / `.partial` data left by an earlier attempt
    pub resume: bool,
    /// Sent as `Authorization: Bearer` when the share is protected
    pub auth_token: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            workers: None,
            algorithm: HashAlgorithm::Sha256,
            resume: true,
            auth_token: None,
        }
    }
}

pub struct ChunkedDownloader {
    config: Arc<TransferConfig>,
    http: reqwest::Client,
    resume_store: ResumeStore,
    permits: Arc<Semaphore>,
}

impl ChunkedDownloader {
    pub fn new(config: Arc<TransferConfig>, resume_store: ResumeStore) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout())
            .build()
            .map_err(|e| TransferError::Resource(format!("Cannot build HTTP client: {}", e)))?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1)));

        Ok(Self {
            config,
            http,
            resume_store,
            permits,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn resume_store(&self) -> &ResumeStore {
        &self.resume_store
    }

    /// Total size of a remote file from a HEAD request's `Content-Length`
    pub async fn probe_size(&self, url: &str, auth_token: Option<&str>) -> Result<u64, TransferError> {
        let mut request = self.http.head(url).timeout(self.config.connection_timeout());
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(TransferError::Resource(format!("Remote file not found: {}", url)));
            }
            StatusCode::UNAUTHORIZED => {
                return Err(TransferError::Protocol("Share requires an access token".into()));
            }
            status => {
                return Err(TransferError::Protocol(format!("HEAD {} returned {}", url, status)));
            }
        }

        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| TransferError::Protocol("Missing Content-Length".into()))
    }

    /// Whether a saved resume record still describes what is on disk.
    pub async fn resume_status(&self, job: &DownloadJob) -> ResumeStatus {
        let artifact = self.artifact_size(job).await;
        self.resume_store
            .check(&job.id, job.total_size, artifact)
            .await
    }

    /// Bytes of this job already sitting in temporary files
    async fn artifact_size(&self, job: &DownloadJob) -> u64 {
        if should_use_multithread(job.total_size, &self.config) {
            let mut total = 0;
            for chunk in plan_chunks(job.total_size, self.config.thread_chunk_size) {
                if let Ok(meta) = tokio::fs::metadata(part_path(&job.destination, chunk.id)).await {
                    total += meta.len().min(chunk.size);
                }
            }
            total
        } else {
            file_len(&partial_path(&job.destination)).await
        }
    }

    /// Run `job` to a terminal state.
    ///
    /// Returns a short status message on success. On failure the job is left
    /// `Failed` (or `Cancelled`) and the error says which category broke.
    pub async fn download(
        &self,
        job: &mut DownloadJob,
        options: &DownloadOptions,
        observer: Arc<dyn ProgressObserver>,
        cancel: CancellationToken,
    ) -> Result<String, TransferError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                job.advance(JobState::Cancelled);
                return Err(TransferError::Cancelled);
            }
            permit = self.permits.clone().acquire_owned() => permit
                .map_err(|_| TransferError::Resource("Downloader is shut down".into()))?,
        };

        if let Some(parent) = job.destination.parent().map(Path::to_path_buf)
            && let Err(e) = tokio::fs::create_dir_all(&parent).await
        {
            job.advance(JobState::Failed);
            return Err(TransferError::Resource(format!(
                "Cannot create {}: {}",
                parent.display(),
                e
            )));
        }

        job.advance(JobState::Downloading);
        tracing::info!(
            "Starting download {} -> {} ({} bytes)",
            job.source_url,
            job.destination.display(),
            job.total_size
        );

        let tracker = ProgressTracker::new(job.total_size, self.config.speed_window, observer);
        let result = if should_use_multithread(job.total_size, &self.config) {
            self.download_chunked(job, options, &tracker, &cancel).await
        } else {
            self.download_sequential(job, options, &tracker, &cancel).await
        };
        job.downloaded_bytes = tracker.downloaded();

        match result {
            Ok(()) => {
                job.advance(JobState::Completed);
                tracker.finish();
                if let Err(e) = self.resume_store.delete(&job.id).await {
                    tracing::warn!("Could not clear resume record {}: {}", job.id, e);
                }
                tracing::info!("Download complete: {}", job.destination.display());
                Ok(if job.expected_checksum.is_some() {
                    "Download complete and verified".to_string()
                } else {
                    "Download complete".to_string()
                })
            }
            Err(TransferError::Cancelled) => {
                job.advance(JobState::Cancelled);
                if options.resume && self.config.enable_resume {
                    self.save_resume_record(job).await;
                }
                tracing::info!("Download cancelled: {}", job.destination.display());
                Err(TransferError::Cancelled)
            }
            Err(e) => {
                job.advance(JobState::Failed);
                tracing::error!("Download failed for {}: {}", job.destination.display(), e);
                Err(e)
            }
        }
    }

    async fn save_resume_record(&self, job: &DownloadJob) {
        let on_disk = self.artifact_size(job).await;
        let record = ResumeRecord::new(
            job.source_url.clone(),
            job.destination.clone(),
            job.total_size,
            on_disk,
            job.expected_checksum.clone(),
        );
        if let Err(e) = self.resume_store.save(&job.id, &record).await {
            tracing::warn!("Failed to save resume info for {}: {}", job.id, e);
        }
    }

    async fn download_chunked(
        &self,
        job: &mut DownloadJob,
        options: &DownloadOptions,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let chunks = plan_chunks(job.total_size, self.config.thread_chunk_size);
        job.chunk_plan = chunks.clone();

        // Part files are only trusted when a matching resume record vouches for them
        let reuse_parts = if options.resume && self.config.enable_resume {
            match self.resume_status(job).await {
                ResumeStatus::Resumable { downloaded_bytes } => {
                    tracing::info!("Resuming {} with {} bytes on disk", job.id, downloaded_bytes);
                    true
                }
                ResumeStatus::Inconsistent { reason } => {
                    tracing::warn!("Discarding resume data for {}: {}", job.id, reason);
                    false
                }
                ResumeStatus::NoRecord => false,
            }
        } else {
            false
        };
        if !reuse_parts {
            let leftovers: Vec<PathBuf> = chunks
                .iter()
                .map(|chunk| part_path(&job.destination, chunk.id))
                .collect();
            remove_files(&leftovers).await;
        }

        let mut pending = VecDeque::with_capacity(chunks.len());
        for chunk in &chunks {
            let path = part_path(&job.destination, chunk.id);
            if reuse_parts {
                let check = integrity::verify_chunk(&path, chunk.size, None, None).await;
                if check.valid {
                    tracing::debug!("Chunk {} already on disk, skipping", chunk.id);
                    tracker.preload(chunk.size);
                    tracker.register_part(chunk.id, path);
                    continue;
                }
            }
            pending.push_back(*chunk);
        }

        let workers = options
            .workers
            .unwrap_or_else(|| optimal_worker_count(job.total_size, &self.config))
            .clamp(1, self.config.max_download_threads.max(1))
            .min(pending.len().max(1));

        tracing::info!(
            "Fetching {} of {} chunks with {} workers",
            pending.len(),
            chunks.len(),
            workers
        );

        if !pending.is_empty() {
            let ctx = Arc::new(WorkerContext {
                http: self.http.clone(),
                url: job.source_url.clone(),
                destination: job.destination.clone(),
                total_size: job.total_size,
                auth_token: options.auth_token.clone(),
                request_timeout: self.config.download_timeout(),
                read_timeout: self.config.socket_timeout(),
                buffer_size: adaptive_buffer_size(self.config.thread_chunk_size),
                queue: Mutex::new(pending),
                tracker: tracker.clone(),
                cancel: cancel.clone(),
            });

            let handles: Vec<_> = (0..workers)
                .map(|n| tokio::spawn(run_worker(n, ctx.clone())))
                .collect();
            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    tracker.record_error(TransferError::Resource(format!("Worker panicked: {}", e)));
                }
            }
        }

        if let Some(err) = tracker.take_first_error() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let parts = tracker.parts();
        if parts.len() != chunks.len() {
            return Err(TransferError::Resource(format!(
                "Only {} of {} chunks downloaded",
                parts.len(),
                chunks.len()
            )));
        }

        let merged = merge_and_verify(
            &parts,
            &job.destination,
            job.total_size,
            job.expected_checksum.as_deref(),
            options.algorithm,
        )
        .await;

        // Parts of a corrupt download would be trusted again on retry
        if merged.is_ok() || merged.as_ref().is_err_and(TransferError::is_integrity) {
            remove_files(&parts).await;
        }
        merged
    }

    async fn download_sequential(
        &self,
        job: &mut DownloadJob,
        options: &DownloadOptions,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let partial = partial_path(&job.destination);

        let mut offset = 0;
        if options.resume && self.config.enable_resume {
            match self.resume_status(job).await {
                ResumeStatus::Resumable { downloaded_bytes } => {
                    tracing::info!("Resuming {} from byte {}", job.id, downloaded_bytes);
                    offset = downloaded_bytes;
                }
                ResumeStatus::Inconsistent { reason } => {
                    tracing::warn!("Discarding resume data for {}: {}", job.id, reason);
                }
                ResumeStatus::NoRecord => {}
            }
        }

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let mut request = self
            .http
            .get(&job.source_url)
            .timeout(self.config.download_timeout());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        if let Some(token) = &options.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT if offset > 0 => {}
            StatusCode::OK => {
                if offset > 0 {
                    tracing::warn!("Server ignored range request, restarting {}", job.id);
                    offset = 0;
                }
            }
            StatusCode::NOT_FOUND => {
                return Err(TransferError::Resource(format!(
                    "Remote file not found: {}",
                    job.source_url
                )));
            }
            status => {
                return Err(TransferError::Protocol(format!(
                    "Unexpected status {} for {}",
                    status, job.source_url
                )));
            }
        }

        tracker.preload(offset);
        let file = open_temp_file(&partial, offset > 0).await.map_err(|e| {
            TransferError::Resource(format!("Cannot open {}: {}", partial.display(), e))
        })?;
        let mut writer = BufWriter::with_capacity(adaptive_buffer_size(job.total_size), file);

        let remaining = job.total_size - offset;
        let streamed = stream_body(
            response,
            &mut writer,
            remaining,
            tracker,
            cancel,
            self.config.socket_timeout(),
        )
        .await;
        writer.flush().await?;
        writer.get_mut().sync_all().await?;
        drop(writer);

        let written = streamed?;
        if written != remaining {
            return Err(TransferError::Network(format!(
                "Connection closed after {} of {} bytes",
                offset + written,
                job.total_size
            )));
        }

        let actual = file_len(&partial).await;
        if actual != job.total_size {
            return Err(TransferError::SizeMismatch {
                expected: job.total_size,
                actual,
                artifact: partial,
            });
        }
        if let Some(expected) = job.expected_checksum.as_deref() {
            let outcome = integrity::verify(&partial, expected, options.algorithm)
                .await
                .map_err(|e| TransferError::Resource(e.to_string()))?;
            if !outcome.matches {
                return Err(TransferError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual: outcome.actual,
                    artifact: partial,
                });
            }
        }

        tokio::fs::rename(&partial, &job.destination).await?;
        Ok(())
    }
}

struct WorkerContext {
    http: reqwest::Client,
    url: String,
    destination: PathBuf,
    total_size: u64,
    auth_token: Option<String>,
    request_timeout: Duration,
    read_timeout: Duration,
    buffer_size: usize,
    queue: Mutex<VecDeque<ChunkRange>>,
    tracker: ProgressTracker,
    cancel: CancellationToken,
}

impl WorkerContext {
    fn next_chunk(&self) -> Option<ChunkRange> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// Pull chunks until the queue is empty, the job is cancelled, or any
/// worker has failed.
async fn run_worker(worker: usize, ctx: Arc<WorkerContext>) {
    loop {
        if ctx.cancel.is_cancelled() || ctx.tracker.has_error() {
            break;
        }
        let Some(chunk) = ctx.next_chunk() else {
            break;
        };

        match fetch_chunk(&ctx, chunk).await {
            Ok(path) => ctx.tracker.register_part(chunk.id, path),
            Err(TransferError::Cancelled) => break,
            Err(e) => {
                tracing::warn!("Worker {} failed on chunk {}: {}", worker, chunk.id, e);
                ctx.tracker.record_error(e);
                break;
            }
        }
    }
    tracing::debug!("Worker {} finished", worker);
}

async fn fetch_chunk(ctx: &WorkerContext, chunk: ChunkRange) -> Result<PathBuf, TransferError> {
    let path = part_path(&ctx.destination, chunk.id);
    if ctx.cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    let mut request = ctx
        .http
        .get(&ctx.url)
        .header(RANGE, chunk.range_header())
        .timeout(ctx.request_timeout);
    if let Some(token) = &ctx.auth_token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {
            let expected = format!("bytes {}-{}/", chunk.start, chunk.end);
            let matches = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with(&expected));
            if !matches {
                return Err(TransferError::Protocol(format!(
                    "Server answered chunk {} with a different range",
                    chunk.id
                )));
            }
        }
        // Full-body answer is only usable when the chunk is the whole file
        StatusCode::OK if chunk.start == 0 && chunk.size == ctx.total_size => {}
        StatusCode::NOT_FOUND => {
            return Err(TransferError::Resource(format!(
                "Remote file not found: {}",
                ctx.url
            )));
        }
        status => {
            return Err(TransferError::Protocol(format!(
                "Unexpected status {} for chunk {}",
                status, chunk.id
            )));
        }
    }

    let file = open_temp_file(&path, false)
        .await
        .map_err(|e| TransferError::Resource(format!("Cannot open {}: {}", path.display(), e)))?;
    let mut writer = BufWriter::with_capacity(ctx.buffer_size, file);

    let streamed = stream_body(
        response,
        &mut writer,
        chunk.size,
        &ctx.tracker,
        &ctx.cancel,
        ctx.read_timeout,
    )
    .await;
    writer.flush().await?;
    let written = streamed?;

    if written != chunk.size {
        return Err(TransferError::Network(format!(
            "Connection closed after {} of {} bytes for chunk {}",
            written, chunk.size, chunk.id
        )));
    }
    Ok(path)
}

/// Copy at most `limit` bytes of `response` into `writer`, reporting each read.
///
/// Every read is bounded by `read_timeout` and preceded by a cancellation
/// check. Returns the number of bytes written, which is short of `limit`
/// when the peer closed early.
async fn stream_body<W>(
    mut response: reqwest::Response,
    writer: &mut W,
    limit: u64,
    tracker: &ProgressTracker,
    cancel: &CancellationToken,
    read_timeout: Duration,
) -> Result<u64, TransferError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let next = tokio::select! {
            next = tokio::time::timeout(read_timeout, response.chunk()) => next??,
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        };
        let Some(bytes) = next else {
            break;
        };

        let len = bytes.len() as u64;
        if written + len > limit {
            return Err(TransferError::Protocol(format!(
                "Server sent more than the {} bytes requested",
                limit
            )));
        }
        writer.write_all(&bytes).await?;
        written += len;
        tracker.add(len);
    }

    Ok(written)
}

struct TrackerState {
    downloaded: u64,
    errors: Vec<TransferError>,
    parts: BTreeMap<u32, PathBuf>,
    speed: SpeedMonitor,
    last_sample: Instant,
}

/// Job-wide counters shared by all workers behind one lock
#[derive(Clone)]
struct ProgressTracker {
    total: u64,
    state: Arc<Mutex<TrackerState>>,
    observer: Arc<dyn ProgressObserver>,
}

impl ProgressTracker {
    fn new(total: u64, speed_window: usize, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            total,
            state: Arc::new(Mutex::new(TrackerState {
                downloaded: 0,
                errors: Vec::new(),
                parts: BTreeMap::new(),
                speed: SpeedMonitor::new(speed_window),
                last_sample: Instant::now(),
            })),
            observer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count bytes that were already on disk without reporting progress
    fn preload(&self, bytes: u64) {
        self.lock().downloaded += bytes;
    }

    fn add(&self, bytes: u64) {
        let mut state = self.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_sample);
        state.last_sample = now;
        state.speed.add_sample(bytes, elapsed);
        state.downloaded += bytes;

        self.observer.on_progress(ProgressUpdate {
            downloaded_bytes: state.downloaded,
            total_bytes: self.total,
            speed_bps: state.speed.average(),
        });
    }

    /// Final report once the file is in place
    fn finish(&self) {
        let state = self.lock();
        self.observer.on_progress(ProgressUpdate {
            downloaded_bytes: state.downloaded,
            total_bytes: self.total,
            speed_bps: state.speed.average(),
        });
    }

    fn downloaded(&self) -> u64 {
        self.lock().downloaded
    }

    fn register_part(&self, id: u32, path: PathBuf) {
        self.lock().parts.insert(id, path);
    }

    fn parts(&self) -> Vec<PathBuf> {
        self.lock().parts.values().cloned().collect()
    }

    fn record_error(&self, err: TransferError) {
        self.lock().errors.push(err);
    }

    fn has_error(&self) -> bool {
        !self.lock().errors.is_empty()
    }

    fn take_first_error(&self) -> Option<TransferError> {
        let mut state = self.lock();
        if state.errors.is_empty() {
            None
        } else {
            Some(state.errors.swap_remove(0))
        }
    }
}

async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::progress::NoProgress;

    fn downloader(dir: &Path, config: TransferConfig) -> ChunkedDownloader {
        ChunkedDownloader::new(Arc::new(config), ResumeStore::new(dir.join("resume"))).unwrap()
    }

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(100, 4, Arc::new(NoProgress))
    }

    #[test]
    fn test_tracker_keeps_parts_in_id_order() {
        let t = tracker();
        t.register_part(2, PathBuf::from("c"));
        t.register_part(0, PathBuf::from("a"));
        t.register_part(1, PathBuf::from("b"));
        assert_eq!(
            t.parts(),
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
    }

    #[test]
    fn test_tracker_counts_and_errors() {
        let t = tracker();
        t.preload(40);
        t.add(10);
        assert_eq!(t.downloaded(), 50);

        assert!(!t.has_error());
        t.record_error(TransferError::Network("reset".into()));
        t.record_error(TransferError::Protocol("bad".into()));
        assert!(t.has_error());
        assert!(matches!(t.take_first_error(), Some(TransferError::Network(_))));
    }

    #[tokio::test]
    async fn test_artifact_size_sums_part_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = TransferConfig {
            min_file_size_for_multithread: 10,
            thread_chunk_size: 10,
            ..TransferConfig::default()
        };
        let dl = downloader(dir.path(), config);
        let job = DownloadJob::new("http://127.0.0.1:1/download/x", dir.path().join("x"), 25, None);

        tokio::fs::write(part_path(&job.destination, 0), [0u8; 10]).await.unwrap();
        tokio::fs::write(part_path(&job.destination, 2), [0u8; 3]).await.unwrap();
        assert_eq!(dl.artifact_size(&job).await, 13);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let dl = downloader(dir.path(), TransferConfig::default());
        let mut job = DownloadJob::new("http://127.0.0.1:1/download/x", dir.path().join("x"), 5, None);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dl
            .download(&mut job, &DownloadOptions::default(), Arc::new(NoProgress), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(job.state(), JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = TransferConfig {
            connection_timeout_secs: 2,
            ..TransferConfig::default()
        };
        let dl = downloader(dir.path(), config);
        let mut job = DownloadJob::new("http://127.0.0.1:1/download/x", dir.path().join("x"), 5, None);

        let err = dl
            .download(
                &mut job,
                &DownloadOptions::default(),
                Arc::new(NoProgress),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Network);
        assert_eq!(job.state(), JobState::Failed);
    }
}
