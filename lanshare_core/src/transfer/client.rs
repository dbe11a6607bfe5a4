//! Client side of the share protocol: catalog fetch, browsing cache and
//! downloads of catalog entries.

use reqwest::StatusCode;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::http_share::CatalogItem;
use crate::resume::ResumeStore;

use super::downloader::{ChunkedDownloader, DownloadOptions};
use super::job::DownloadJob;
use super::progress::ProgressObserver;
use super::utils::{sanitize_file_name, unique_destination};

/// How long a fetched listing is served from cache
pub const CATALOG_CACHE_TTL: Duration = Duration::from_secs(60);

/// Result of a finished download
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub destination: PathBuf,
    pub bytes: u64,
    pub message: String,
}

pub struct FileShareClient {
    downloader: Arc<ChunkedDownloader>,
}

impl FileShareClient {
    pub fn new(config: Arc<TransferConfig>) -> Result<Self, TransferError> {
        let downloader = ChunkedDownloader::new(config, ResumeStore::default())?;
        Ok(Self::with_downloader(Arc::new(downloader)))
    }

    pub fn with_downloader(downloader: Arc<ChunkedDownloader>) -> Self {
        Self { downloader }
    }

    pub fn downloader(&self) -> &ChunkedDownloader {
        &self.downloader
    }

    /// `GET {server}/api/files`
    pub async fn fetch_catalog(
        &self,
        server_url: &str,
        token: Option<&str>,
    ) -> Result<Vec<CatalogItem>, TransferError> {
        let url = endpoint(server_url, "/api/files")?;
        let mut request = self
            .downloader
            .http_client()
            .get(url)
            .timeout(self.downloader.config().connection_timeout());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                return Err(TransferError::Protocol(
                    "Authentication required - token needed".into(),
                ));
            }
            StatusCode::FORBIDDEN => return Err(TransferError::Protocol("Access denied".into())),
            status => return Err(TransferError::Protocol(format!("HTTP error {}", status))),
        }

        let items: Vec<CatalogItem> = response
            .json()
            .await
            .map_err(|e| TransferError::Protocol(format!("Invalid catalog listing: {}", e)))?;
        tracing::debug!("Fetched {} entries from {}", items.len(), server_url);
        Ok(items)
    }

    /// Download one catalog entry into `save_dir` under a non-colliding name.
    pub async fn download_entry(
        &self,
        server_url: &str,
        item: &CatalogItem,
        save_dir: &Path,
        options: &DownloadOptions,
        observer: Arc<dyn ProgressObserver>,
        cancel: CancellationToken,
    ) -> Result<DownloadReport, TransferError> {
        tokio::fs::create_dir_all(save_dir).await.map_err(|e| {
            TransferError::Resource(format!("Cannot create {}: {}", save_dir.display(), e))
        })?;

        let url = download_url(server_url, &item.id)?;
        let destination = unique_destination(save_dir, &sanitize_file_name(&item.name));
        let mut job = DownloadJob::new(url, destination, item.size_bytes, None);

        let message = self
            .downloader
            .download(&mut job, options, observer, cancel)
            .await?;
        Ok(DownloadReport {
            destination: job.destination,
            bytes: job.downloaded_bytes,
            message,
        })
    }

    /// Download an arbitrary URL to `destination`, probing its size first
    pub async fn download_url_to(
        &self,
        url: &str,
        destination: &Path,
        expected_checksum: Option<String>,
        options: &DownloadOptions,
        observer: Arc<dyn ProgressObserver>,
        cancel: CancellationToken,
    ) -> Result<DownloadReport, TransferError> {
        let size = self
            .downloader
            .probe_size(url, options.auth_token.as_deref())
            .await?;
        let mut job = DownloadJob::new(url, destination, size, expected_checksum);

        let message = self
            .downloader
            .download(&mut job, options, observer, cancel)
            .await?;
        Ok(DownloadReport {
            destination: job.destination,
            bytes: job.downloaded_bytes,
            message,
        })
    }
}

fn endpoint(server_url: &str, path: &str) -> Result<Url, TransferError> {
    Url::parse(server_url)
        .and_then(|base| base.join(path))
        .map_err(|e| TransferError::Protocol(format!("Invalid server URL {}: {}", server_url, e)))
}

/// `{server}/download/{id}`
pub fn download_url(server_url: &str, id: &str) -> Result<String, TransferError> {
    endpoint(server_url, &format!("/download/{}", id)).map(String::from)
}

struct CachedListing {
    fetched_at: Instant,
    items: Vec<CatalogItem>,
}

/// Per-server listing cache in front of [`FileShareClient::fetch_catalog`]
pub struct RemoteBrowser {
    client: Arc<FileShareClient>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedListing>>,
}

impl RemoteBrowser {
    pub fn new(client: Arc<FileShareClient>) -> Self {
        Self::with_ttl(client, CATALOG_CACHE_TTL)
    }

    pub fn with_ttl(client: Arc<FileShareClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Listing for `server_url`, from cache when fresh.
    ///
    /// When a refresh fails, an expired cached listing is returned instead
    /// of the error.
    pub async fn browse(
        &self,
        server_url: &str,
        token: Option<&str>,
        force_refresh: bool,
    ) -> Result<Vec<CatalogItem>, TransferError> {
        if !force_refresh
            && let Some(cached) = self.cache.lock().await.get(server_url)
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(cached.items.clone());
        }

        match self.client.fetch_catalog(server_url, token).await {
            Ok(items) => {
                self.cache.lock().await.insert(
                    server_url.to_string(),
                    CachedListing {
                        fetched_at: Instant::now(),
                        items: items.clone(),
                    },
                );
                Ok(items)
            }
            Err(e) => match self.cache.lock().await.get(server_url) {
                Some(stale) => {
                    tracing::warn!("Refresh of {} failed, using cached listing: {}", server_url, e);
                    Ok(stale.items.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Case-insensitive name match over the server's listing
    pub async fn search(
        &self,
        server_url: &str,
        term: &str,
        token: Option<&str>,
    ) -> Result<Vec<CatalogItem>, TransferError> {
        let needle = term.to_lowercase();
        let items = self.browse(server_url, token, false).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.name.to_lowercase().contains(&needle))
            .collect())
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }
}
