//! Shared-file catalog owned by the serving process.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::transfer::policy::{SizeCheck, format_file_size, validate_file_size};

/// One file offered to peers
#[derive(Debug, Clone, PartialEq)]
pub struct ShareEntry {
    pub id: String,
    pub display_name: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Local>>,
    pub local_path: PathBuf,
    pub extension: String,
    /// Directory relative to the shared folder root; empty for single files
    pub folder: String,
}

impl ShareEntry {
    pub fn to_item(&self) -> CatalogItem {
        CatalogItem {
            id: self.id.clone(),
            name: self.display_name.clone(),
            size: format_file_size(self.size_bytes),
            size_bytes: self.size_bytes,
            modified: self
                .modified
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            folder: self.folder.clone(),
            extension: self.extension.clone(),
        }
    }
}

/// Wire form of a catalog entry in the JSON listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    /// Human readable size, e.g. "2.50 MB"
    pub size: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub modified: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub extension: String,
}

/// Why [`ShareCatalog::add_file`] did not add a path
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Added(String),
    AlreadyShared,
    NotAFile,
    TooLarge(String),
}

/// Mapping of opaque ids to shared files.
///
/// Mutations take the write lock; request handlers only ever read.
#[derive(Debug)]
pub struct ShareCatalog {
    limits: TransferConfig,
    entries: RwLock<HashMap<String, ShareEntry>>,
}

impl Default for ShareCatalog {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}

impl ShareCatalog {
    pub fn new(limits: TransferConfig) -> Self {
        Self {
            limits,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_file(&self, path: &Path) -> std::io::Result<AddOutcome> {
        self.add_with_folder(path, String::new()).await
    }

    async fn add_with_folder(&self, path: &Path, folder: String) -> std::io::Result<AddOutcome> {
        let path = tokio::fs::canonicalize(path).await?;
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Ok(AddOutcome::NotAFile);
        }

        if self
            .entries
            .read()
            .await
            .values()
            .any(|e| e.local_path == path)
        {
            return Ok(AddOutcome::AlreadyShared);
        }

        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match validate_file_size(meta.len(), &self.limits) {
            SizeCheck::TooLarge(msg) => {
                tracing::warn!("Skipped {}: {}", display_name, msg);
                return Ok(AddOutcome::TooLarge(msg));
            }
            SizeCheck::Warn(msg) => tracing::warn!("{}: {}", display_name, msg),
            SizeCheck::Ok => {}
        }

        let id = Uuid::new_v4().to_string();
        let entry = ShareEntry {
            id: id.clone(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
            display_name,
            size_bytes: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Local>::from),
            local_path: path,
            folder,
        };

        tracing::info!(
            "Added file: {} ({})",
            entry.display_name,
            format_file_size(entry.size_bytes)
        );
        self.entries.write().await.insert(id.clone(), entry);
        Ok(AddOutcome::Added(id))
    }

    /// Share every file below `root`; returns how many were added.
    pub async fn add_folder(&self, root: &Path) -> std::io::Result<usize> {
        let root = tokio::fs::canonicalize(root).await?;
        let mut added = 0;
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(item) = read_dir.next_entry().await? {
                let file_type = item.file_type().await?;
                let path = item.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let folder = dir
                        .strip_prefix(&root)
                        .map(|p| p.to_string_lossy().replace('\\', "/"))
                        .unwrap_or_default();
                    match self.add_with_folder(&path, folder).await {
                        Ok(AddOutcome::Added(_)) => added += 1,
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Error adding file {}: {}", path.display(), e),
                    }
                }
            }
        }

        tracing::info!("Added {} files from {}", added, root.display());
        Ok(added)
    }

    pub async fn remove(&self, id: &str) -> Option<ShareEntry> {
        self.entries.write().await.remove(id)
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn get(&self, id: &str) -> Option<ShareEntry> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshot sorted by folder then name
    pub async fn entries(&self) -> Vec<ShareEntry> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.folder
                .cmp(&b.folder)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        entries
    }

    pub async fn items(&self) -> Vec<CatalogItem> {
        self.entries().await.iter().map(ShareEntry::to_item).collect()
    }
}
