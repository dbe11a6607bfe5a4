//! End-to-end downloads against a local share server.

mod common;

use common::{MIB, TestServer, payload};
use lanshare_core::integrity::checksum_bytes;
use lanshare_core::transfer::job::{merge_path, part_path, partial_path};
use lanshare_core::transfer::NoProgress;
use lanshare_core::{
    ChunkedDownloader, DownloadJob, DownloadOptions, ErrorKind, HashAlgorithm, JobState,
    ProgressUpdate, ResumeRecord, ResumeStore, TransferConfig, TransferError,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

fn downloader(dir: &Path, config: TransferConfig) -> ChunkedDownloader {
    ChunkedDownloader::new(Arc::new(config), ResumeStore::new(dir.join("resume"))).unwrap()
}

fn chunked_config() -> TransferConfig {
    TransferConfig {
        min_file_size_for_multithread: 10 * MIB as u64,
        thread_chunk_size: 2 * MIB as u64,
        max_download_threads: 4,
        ..TransferConfig::default()
    }
}

#[tokio::test]
async fn test_chunked_download_is_byte_identical() {
    let share_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;

    let data = payload(25 * MIB);
    let id = server.share(share_dir.path(), "big.bin", &data).await;
    let checksum = checksum_bytes(&data, HashAlgorithm::Sha256);

    let dl = downloader(save_dir.path(), chunked_config());
    let dest = save_dir.path().join("big.bin");
    let mut job = DownloadJob::new(server.download_url(&id), &dest, data.len() as u64, Some(checksum));

    let updates = Arc::new(Mutex::new(Vec::<ProgressUpdate>::new()));
    let sink = updates.clone();
    let observer = move |u: ProgressUpdate| sink.lock().unwrap().push(u);

    let options = DownloadOptions {
        workers: Some(4),
        ..DownloadOptions::default()
    };
    let message = dl
        .download(&mut job, &options, Arc::new(observer), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(message, "Download complete and verified");
    assert_eq!(job.state(), JobState::Completed);
    assert_eq!(job.chunk_plan.len(), 13);
    assert_eq!(job.downloaded_bytes, 25 * MIB as u64);
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);

    let updates = updates.lock().unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.downloaded_bytes, 25 * MIB as u64);
    assert_eq!(last.percent(), 100.0);

    for chunk in &job.chunk_plan {
        assert!(!part_path(&dest, chunk.id).exists());
    }
    assert!(!merge_path(&dest).exists());

    server.shutdown().await;
}

#[tokio::test]
async fn test_checksum_mismatch_keeps_merged_file() {
    let share_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;

    let data = payload(12 * MIB);
    let id = server.share(share_dir.path(), "big.bin", &data).await;

    let dl = downloader(save_dir.path(), chunked_config());
    let dest = save_dir.path().join("big.bin");
    let mut job = DownloadJob::new(
        server.download_url(&id),
        &dest,
        data.len() as u64,
        Some("0".repeat(64)),
    );

    let err = dl
        .download(
            &mut job,
            &DownloadOptions::default(),
            Arc::new(NoProgress),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        TransferError::ChecksumMismatch { artifact, .. } => {
            assert_eq!(artifact, merge_path(&dest));
            assert!(artifact.exists());
        }
        other => panic!("expected checksum mismatch, got {:?}", other),
    }
    assert_eq!(job.state(), JobState::Failed);
    assert!(!dest.exists());
    assert!(!part_path(&dest, 0).exists());

    server.shutdown().await;
}

fn small_chunk_config() -> TransferConfig {
    TransferConfig {
        min_file_size_for_multithread: 10,
        thread_chunk_size: 10,
        ..TransferConfig::default()
    }
}

#[tokio::test]
async fn test_recorded_parts_are_not_refetched() {
    let share_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;

    let data = payload(25);
    let id = server.share(share_dir.path(), "small.bin", &data).await;
    let url = server.download_url(&id);
    let dest = save_dir.path().join("small.bin");
    let dl = downloader(save_dir.path(), small_chunk_config());

    // Chunks 0 and 1 finished in an earlier attempt, chunk 2 never started
    tokio::fs::write(part_path(&dest, 0), &data[..10]).await.unwrap();
    tokio::fs::write(part_path(&dest, 1), &data[10..20]).await.unwrap();
    let mut job = DownloadJob::new(&url, &dest, 25, None);
    dl.resume_store()
        .save(&job.id, &ResumeRecord::new(&url, &dest, 25, 20, None))
        .await
        .unwrap();

    let updates = Arc::new(Mutex::new(Vec::<ProgressUpdate>::new()));
    let sink = updates.clone();
    let observer = move |u: ProgressUpdate| sink.lock().unwrap().push(u);

    dl.download(
        &mut job,
        &DownloadOptions::default(),
        Arc::new(observer),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    assert_eq!(job.downloaded_bytes, 25);
    // chunk 2 was the only one fetched, so progress never dips below the recorded bytes
    let updates = updates.lock().unwrap();
    assert!(!updates.is_empty());
    assert!(updates.iter().all(|u| u.downloaded_bytes > 20));
    drop(updates);
    assert!(dl.resume_store().load(&job.id).await.unwrap().is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_leftover_parts_without_record_are_refetched() {
    let share_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;

    let data = payload(25);
    let id = server.share(share_dir.path(), "f.bin", &data).await;
    let dest = save_dir.path().join("f.bin");
    let dl = downloader(save_dir.path(), small_chunk_config());

    // Right size, wrong bytes, and nothing on record
    tokio::fs::write(part_path(&dest, 0), [0xAAu8; 10]).await.unwrap();

    let mut job = DownloadJob::new(server.download_url(&id), &dest, 25, None);
    dl.download(
        &mut job,
        &DownloadOptions::default(),
        Arc::new(NoProgress),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    assert!(!part_path(&dest, 0).exists());

    server.shutdown().await;
}

#[tokio::test]
async fn test_inconsistent_record_discards_parts() {
    let share_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;

    let data = payload(25);
    let id = server.share(share_dir.path(), "f.bin", &data).await;
    let url = server.download_url(&id);
    let dest = save_dir.path().join("f.bin");
    let dl = downloader(save_dir.path(), small_chunk_config());

    tokio::fs::write(part_path(&dest, 0), [0xAAu8; 10]).await.unwrap();
    let mut job = DownloadJob::new(&url, &dest, 25, None);
    // record claims more bytes than are on disk
    dl.resume_store()
        .save(&job.id, &ResumeRecord::new(&url, &dest, 25, 20, None))
        .await
        .unwrap();

    dl.download(
        &mut job,
        &DownloadOptions::default(),
        Arc::new(NoProgress),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);

    server.shutdown().await;
}

#[tokio::test]
async fn test_worker_failure_fails_job() {
    let share_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;

    let data = payload(12 * MIB);
    let id = server.share(share_dir.path(), "big.bin", &data).await;
    let source = share_dir.path().join("big.bin");
    let dest = save_dir.path().join("big.bin");
    let dl = downloader(save_dir.path(), chunked_config());

    // The shared file vanishes while the first chunks are in flight, so
    // every later range request gets a 404
    let observer = move |_: ProgressUpdate| {
        let _ = std::fs::remove_file(&source);
    };

    let options = DownloadOptions {
        workers: Some(2),
        ..DownloadOptions::default()
    };
    let mut job = DownloadJob::new(server.download_url(&id), &dest, data.len() as u64, None);
    let err = dl
        .download(&mut job, &options, Arc::new(observer), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(err.to_string().contains("not found"));
    assert_eq!(job.state(), JobState::Failed);
    assert!(!dest.exists());
    assert!(!merge_path(&dest).exists());

    server.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_download_saves_record_and_resumes() {
    let share_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;

    let data = payload(12 * MIB);
    let id = server.share(share_dir.path(), "big.bin", &data).await;
    let url = server.download_url(&id);
    let dest = save_dir.path().join("big.bin");
    let dl = downloader(save_dir.path(), chunked_config());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let observer = move |_: ProgressUpdate| trigger.cancel();

    let mut job = DownloadJob::new(&url, &dest, data.len() as u64, None);
    let err = dl
        .download(&mut job, &DownloadOptions::default(), Arc::new(observer), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Cancelled));
    assert_eq!(job.state(), JobState::Cancelled);
    let record = dl.resume_store().load(&job.id).await.unwrap().unwrap();
    assert_eq!(record.total_size, data.len() as u64);
    assert_eq!(record.url, url);
    assert!(!dest.exists());

    let mut retry = DownloadJob::new(&url, &dest, data.len() as u64, None);
    assert_eq!(retry.id, job.id);
    dl.download(
        &mut retry,
        &DownloadOptions::default(),
        Arc::new(NoProgress),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    assert!(dl.resume_store().load(&retry.id).await.unwrap().is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_sequential_resume_continues_partial_file() {
    let share_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;

    let data = payload(100_000);
    let id = server.share(share_dir.path(), "doc.pdf", &data).await;
    let url = server.download_url(&id);
    let dest = save_dir.path().join("doc.pdf");
    let dl = downloader(save_dir.path(), TransferConfig::default());

    let mut job = DownloadJob::new(&url, &dest, data.len() as u64, None);
    tokio::fs::write(partial_path(&dest), &data[..40_000]).await.unwrap();
    dl.resume_store()
        .save(
            &job.id,
            &ResumeRecord::new(&url, &dest, data.len() as u64, 40_000, None),
        )
        .await
        .unwrap();

    let updates = Arc::new(Mutex::new(Vec::<ProgressUpdate>::new()));
    let sink = updates.clone();
    let observer = move |u: ProgressUpdate| sink.lock().unwrap().push(u);

    dl.download(
        &mut job,
        &DownloadOptions::default(),
        Arc::new(observer),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    assert!(!partial_path(&dest).exists());
    assert!(updates.lock().unwrap()[0].downloaded_bytes > 40_000);
    assert!(dl.resume_store().load(&job.id).await.unwrap().is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_remote_file_is_resource_error() {
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;
    let dl = downloader(save_dir.path(), TransferConfig::default());

    let err = dl
        .probe_size(&server.download_url("missing"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_file_during_sequential_get_is_resource_error() {
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;
    let dest = save_dir.path().join("gone.bin");
    let dl = downloader(save_dir.path(), TransferConfig::default());

    let mut job = DownloadJob::new(server.download_url("missing"), &dest, 100, None);
    let err = dl
        .download(
            &mut job,
            &DownloadOptions::default(),
            Arc::new(NoProgress),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(job.state(), JobState::Failed);
    assert!(!dest.exists());

    server.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_token_wins_over_live_server() {
    let share_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(None).await;

    let data = payload(12 * MIB);
    let id = server.share(share_dir.path(), "big.bin", &data).await;
    let dest = save_dir.path().join("big.bin");
    let dl = downloader(save_dir.path(), chunked_config());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut job = DownloadJob::new(server.download_url(&id), &dest, data.len() as u64, None);
    let err = dl
        .download(&mut job, &DownloadOptions::default(), Arc::new(NoProgress), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Cancelled));
    assert_eq!(job.state(), JobState::Cancelled);
    assert!(!dest.exists());
    assert!(!part_path(&dest, 0).exists());

    server.shutdown().await;
}
