//! Per-bucket streaming download.
//!
//! The manifest in the state store is authoritative for verification, but the
//! download follows a fresh listing so glacier-restored bodies and their
//! current metadata are picked up.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use sev_cloud::{ObjectEntry, ObjectStorage};
use sev_common::format::{format_bytes, format_duration};
use sev_common::progress::ProgressTracker;
use sev_state_store::MigrationStateStore;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::MigrationError;

struct SyncProgress {
    start: Instant,
    files_done: u64,
    bytes_done: u64,
    tracker: ProgressTracker,
}

impl SyncProgress {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            files_done: 0,
            bytes_done: 0,
            tracker: ProgressTracker::new(Duration::from_secs(1)),
        }
    }

    fn display(&self, extra_bytes: u64) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let bytes = self.bytes_done + extra_bytes;
        if elapsed > 0.0 && bytes > 0 {
            let throughput = bytes as f64 / elapsed;
            print!(
                "\r  Progress: {} files, {} ({}/s)  ",
                self.files_done,
                format_bytes(bytes),
                format_bytes(throughput as u64)
            );
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }
    }
}

fn sync_error(bucket: &str, reason: impl ToString) -> MigrationError {
    MigrationError::Sync {
        bucket: bucket.to_string(),
        reason: reason.to_string(),
    }
}

/// Streams one object to its destination file.
///
/// Returns the bytes written, or `None` when cancellation was observed
/// between chunks; in that case a partial file may remain on disk and will be
/// rewritten on the next run because `sync_complete` never flipped.
async fn download_object(
    cloud: &dyn ObjectStorage,
    bucket: &str,
    key: &str,
    destination: &Path,
    cancel: &CancellationToken,
    progress: &mut SyncProgress,
) -> Result<Option<u64>, MigrationError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let body = cloud
        .get_object(bucket, key)
        .await
        .map_err(|e| sync_error(bucket, format!("failed to fetch {}/{}: {}", bucket, key, e)))?;

    let mut file = tokio::fs::File::create(destination).await?;
    let mut stream = body.stream;
    let mut bytes_downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let chunk = chunk
            .map_err(|e| sync_error(bucket, format!("transfer of {}/{} failed: {}", bucket, key, e)))?;
        if chunk.is_empty() {
            continue;
        }
        file.write_all(&chunk).await?;
        bytes_downloaded += chunk.len() as u64;
        if progress.tracker.should_update() {
            progress.display(bytes_downloaded);
        }
    }
    file.flush().await?;

    progress.files_done += 1;
    progress.bytes_done += bytes_downloaded;
    Ok(Some(bytes_downloaded))
}

/// Lists one page of the bucket for download purposes.
async fn list_page(
    cloud: &dyn ObjectStorage,
    bucket: &str,
    continuation: Option<String>,
) -> Result<(Vec<ObjectEntry>, Option<String>), MigrationError> {
    let page = cloud
        .list_objects(bucket, continuation)
        .await
        .map_err(|e| sync_error(bucket, e))?;
    let entries = match page.contents {
        Some(entries) => entries,
        None => match page.key_count {
            None | Some(0) => Vec::new(),
            Some(key_count) => {
                return Err(sync_error(
                    bucket,
                    format!("listing reported {} keys without contents", key_count),
                ))
            }
        },
    };
    Ok((entries, page.next_token))
}

/// Downloads every object of the bucket under `base_path/bucket/`.
pub async fn sync_bucket(
    cloud: &dyn ObjectStorage,
    _state: &MigrationStateStore,
    base_path: &Path,
    bucket: &str,
    cancel: &CancellationToken,
) -> Result<(), MigrationError> {
    let local_path: PathBuf = base_path.join(bucket);
    tokio::fs::create_dir_all(&local_path).await?;
    println!("  Syncing {} -> {}/", bucket, local_path.display());
    println!();

    let mut progress = SyncProgress::new();
    let mut continuation = None;
    let mut interrupted = false;

    'pages: loop {
        if cancel.is_cancelled() {
            interrupted = true;
            break;
        }
        let (entries, next_token) = list_page(cloud, bucket, continuation).await?;
        for object in entries {
            if cancel.is_cancelled() {
                interrupted = true;
                break 'pages;
            }
            if object.key.ends_with('/') {
                continue;
            }
            let destination = local_path.join(&object.key);
            match download_object(cloud, bucket, &object.key, &destination, cancel, &mut progress)
                .await?
            {
                Some(_) => {}
                None => {
                    interrupted = true;
                    break 'pages;
                }
            }
        }
        continuation = next_token;
        if continuation.is_none() {
            break;
        }
    }

    if interrupted {
        println!();
        println!("  Sync interrupted");
        return Ok(());
    }

    progress.display(0);
    let elapsed = progress.start.elapsed().as_secs_f64().max(0.0001);
    let throughput = progress.bytes_done as f64 / elapsed;
    println!();
    println!("  Completed in {}", format_duration(elapsed));
    println!(
        "  Downloaded: {} files, {}",
        progress.files_done,
        format_bytes(progress.bytes_done)
    );
    println!("  Throughput: {}/s", format_bytes(throughput as u64));
    println!();
    info!(
        bucket,
        files = progress.files_done,
        bytes = progress.bytes_done,
        "Bucket sync finished"
    );
    Ok(())
}
