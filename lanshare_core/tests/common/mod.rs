//! Helpers shared by the integration tests.

#![allow(dead_code)]

use lanshare_core::http_share::{AddOutcome, ServerContext, ShareCatalog, TokenGate, serve_on};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const MIB: usize = 1024 * 1024;

/// Deterministic, non-repeating-looking payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

pub struct TestServer {
    pub url: String,
    pub catalog: Arc<ShareCatalog>,
    pub cancel: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(gate: Option<Arc<TokenGate>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let catalog = Arc::new(ShareCatalog::default());
        let cancel = CancellationToken::new();

        let ctx = Arc::new(ServerContext::new(catalog.clone()));
        let handle = tokio::spawn(serve_on(listener, ctx, gate, cancel.clone()));

        Self {
            url,
            catalog,
            cancel,
            handle,
        }
    }

    /// Write `content` to `dir/name`, share it and return its id
    pub async fn share(&self, dir: &Path, name: &str, content: &[u8]) -> String {
        let path = dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        match self.catalog.add_file(&path).await.unwrap() {
            AddOutcome::Added(id) => id,
            other => panic!("file not shared: {:?}", other),
        }
    }

    pub fn download_url(&self, id: &str) -> String {
        format!("{}/download/{}", self.url, id)
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap();
    }
}
