use anyhow::{Context, Result, bail};
use clap::Parser;
use lanshare_core::discovery::{DiscoveryService, DiscoverySettings, local_ipv4, network_range};
use lanshare_core::http_share::{
    AddOutcome, DEFAULT_TOKEN_TTL, ServerContext, ShareCatalog, TokenGate, start_file_server,
};
use lanshare_core::transfer::policy::{format_file_size, format_speed};
use lanshare_core::transfer::{DownloadOptions, FileShareClient, ProgressUpdate, RemoteBrowser};
use lanshare_core::TransferConfig;
use lanshare_core::config::get_download_dir;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = TransferConfig::load();

    match cli.command {
        Command::Serve {
            paths,
            port,
            require_token,
            no_discovery,
        } => serve(config, paths, port, require_token, no_discovery).await,
        Command::List {
            server,
            token,
            search,
        } => list(config, &server, token.as_deref(), search.as_deref()).await,
        Command::Fetch {
            server,
            file,
            out,
            token,
            workers,
            no_resume,
        } => {
            let options = DownloadOptions {
                workers,
                resume: !no_resume,
                auth_token: token,
                ..DownloadOptions::default()
            };
            fetch(config, &server, &file, out, options).await
        }
        Command::Peers { seconds } => peers(config, seconds).await,
    }
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            token.cancel();
        }
    });
}

async fn serve(
    mut config: TransferConfig,
    paths: Vec<PathBuf>,
    port: Option<u16>,
    require_token: bool,
    no_discovery: bool,
) -> Result<()> {
    if let Some(port) = port {
        config.server_port = port;
    }

    let catalog = Arc::new(ShareCatalog::new(config.clone()));
    for path in &paths {
        if path.is_dir() {
            catalog
                .add_folder(path)
                .await
                .with_context(|| format!("Cannot share folder {}", path.display()))?;
        } else {
            match catalog
                .add_file(path)
                .await
                .with_context(|| format!("Cannot share {}", path.display()))?
            {
                AddOutcome::Added(_) | AddOutcome::AlreadyShared => {}
                AddOutcome::NotAFile => tracing::warn!("Skipped {}: not a file", path.display()),
                AddOutcome::TooLarge(msg) => tracing::warn!("Skipped {}: {}", path.display(), msg),
            }
        }
    }
    if catalog.is_empty().await {
        bail!("Nothing to share");
    }

    let gate = require_token.then(|| Arc::new(TokenGate::new()));
    if let Some(gate) = &gate {
        println!("Access token: {}", gate.issue(DEFAULT_TOKEN_TTL));
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let discovery = (!no_discovery).then(|| {
        let service = DiscoveryService::new(DiscoverySettings::from_config(&config));
        service.start();
        service
    });

    let local_ip = local_ipv4()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    println!(
        "Sharing {} files at http://{}:{}",
        catalog.len().await,
        local_ip,
        config.server_port
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let result = start_file_server(addr, Arc::new(ServerContext::new(catalog)), gate, cancel).await;

    if let Some(discovery) = discovery {
        discovery.stop();
    }
    result
}

async fn list(
    config: TransferConfig,
    server: &str,
    token: Option<&str>,
    search: Option<&str>,
) -> Result<()> {
    url::Url::parse(server).with_context(|| format!("Invalid server URL {}", server))?;
    let client = Arc::new(FileShareClient::new(Arc::new(config))?);
    let browser = RemoteBrowser::new(client);

    let items = match search {
        Some(term) => browser.search(server, term, token).await?,
        None => browser.browse(server, token, false).await?,
    };

    if items.is_empty() {
        println!("No files are currently being shared.");
    }
    for item in items {
        let name = if item.folder.is_empty() {
            item.name
        } else {
            format!("{}/{}", item.folder, item.name)
        };
        println!("{}  {:>10}  {}  {}", item.id, item.size, item.modified, name);
    }
    Ok(())
}

async fn fetch(
    config: TransferConfig,
    server: &str,
    file: &str,
    out: Option<PathBuf>,
    options: DownloadOptions,
) -> Result<()> {
    url::Url::parse(server).with_context(|| format!("Invalid server URL {}", server))?;
    let client = FileShareClient::new(Arc::new(config))?;

    let items = client
        .fetch_catalog(server, options.auth_token.as_deref())
        .await?;
    let Some(item) = items.iter().find(|i| i.id == file || i.name == file) else {
        bail!("No shared file named {} on {}", file, server);
    };

    let save_dir = out.unwrap_or_else(get_download_dir);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    let printer = tokio::spawn(async move {
        let mut last_percent = -1i64;
        while let Some(update) = rx.recv().await {
            let percent = update.percent() as i64;
            if percent != last_percent {
                last_percent = percent;
                eprint!(
                    "\r{:>3}%  {} / {}  {}   ",
                    percent,
                    format_file_size(update.downloaded_bytes),
                    format_file_size(update.total_bytes),
                    format_speed(update.speed_bps)
                );
            }
        }
        eprintln!();
    });

    let result = client
        .download_entry(server, item, &save_dir, &options, Arc::new(tx), cancel)
        .await;
    let _ = printer.await;

    let report = result?;
    println!(
        "{}: {} ({})",
        report.message,
        report.destination.display(),
        format_file_size(report.bytes)
    );
    Ok(())
}

async fn peers(config: TransferConfig, seconds: u64) -> Result<()> {
    let service = DiscoveryService::new(DiscoverySettings::from_config(&config));
    let mut changes = service.subscribe();
    service.start();

    if let Some(range) = network_range() {
        println!("Scanning {} for {} seconds...", range, seconds);
    }

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            snapshot = changes.recv() => {
                if let Ok(peers) = snapshot {
                    tracing::debug!("{} peers known", peers.len());
                }
            }
        }
    }
    service.stop();

    let peers = service.registry().snapshot();
    if peers.is_empty() {
        println!("No peers found.");
    }
    for peer in peers {
        let source = if peer.first_announced.is_some() { "beacon" } else { "scan" };
        println!("{}  ({})", peer.url(), source);
    }
    Ok(())
}
