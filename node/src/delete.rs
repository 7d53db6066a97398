//! Versioned bucket deletion.
//!
//! Removes every object version and delete marker, aborts in-progress
//! multipart uploads, re-checks emptiness and only then deletes the bucket
//! itself. Runs strictly after verification passed and the operator
//! confirmed.

use std::time::{Duration, Instant};

use sev_cloud::{ObjectStorage, VersionRef};
use sev_common::format::{calculate_eta_items, format_duration};
use sev_common::progress::ProgressTracker;
use sev_state_store::MigrationStateStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::MigrationError;

/// Progress cadence: every ~2 seconds or every 1000 objects.
const PROGRESS_OBJECT_INTERVAL: u64 = 1000;

fn print_delete_progress(deleted: u64, total: u64, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    let pct = if total > 0 {
        deleted as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let eta = calculate_eta_items(elapsed, deleted, total);
    print!("\r  Progress: {} deleted ({:.1}%), ETA: {}  ", deleted, pct, eta);
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

/// Deletes one page worth of versions/markers. Returns how many entries were
/// actually deleted and whether any entry failed.
async fn delete_page_objects(
    cloud: &dyn ObjectStorage,
    bucket: &str,
    objects: &[VersionRef],
) -> Result<(u64, bool), MigrationError> {
    let outcome = cloud.delete_objects(bucket, objects).await?;
    if !outcome.errors.is_empty() {
        println!();
        println!("  Encountered delete errors:");
        for error in &outcome.errors {
            println!(
                "    Key={} VersionId={} Code={} Message={}",
                error.key, error.version_id, error.code, error.message
            );
        }
    }
    let deleted = (objects.len() - outcome.errors.len()) as u64;
    Ok((deleted, !outcome.errors.is_empty()))
}

/// Aborts any in-progress multipart uploads for the bucket.
async fn abort_multipart_uploads(
    cloud: &dyn ObjectStorage,
    bucket: &str,
) -> Result<u64, MigrationError> {
    let mut aborted: u64 = 0;
    let mut continuation = None;
    loop {
        let page = cloud.list_multipart_uploads(bucket, continuation).await?;
        for upload in page.uploads {
            cloud
                .abort_multipart_upload(bucket, &upload.key, &upload.upload_id)
                .await?;
            aborted += 1;
        }
        continuation = page.next_token;
        if continuation.is_none() {
            break;
        }
    }
    if aborted > 0 {
        println!("  Aborted {} multipart uploads before final delete", aborted);
    }
    Ok(aborted)
}

/// Whether any versions or delete markers remain.
async fn bucket_has_contents(
    cloud: &dyn ObjectStorage,
    bucket: &str,
) -> Result<bool, MigrationError> {
    let page = cloud.list_object_versions(bucket, None, Some(1)).await?;
    Ok(!page.versions.is_empty() || !page.delete_markers.is_empty())
}

/// Deletes a bucket and all its contents, including all versions.
pub async fn delete_bucket(
    cloud: &dyn ObjectStorage,
    state: &MigrationStateStore,
    bucket: &str,
    cancel: &CancellationToken,
) -> Result<(), MigrationError> {
    let total_objects = state
        .bucket_info(bucket)?
        .map(|info| info.file_count)
        .unwrap_or(0);
    println!(
        "  Deleting {} objects from the cloud (including all versions)...",
        total_objects
    );
    println!();

    let mut deleted_count: u64 = 0;
    let mut continuation: Option<String> = None;
    let mut retried_current_page = false;
    let mut tracker = ProgressTracker::new(Duration::from_secs(2));
    let start = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let page = cloud
            .list_object_versions(bucket, continuation.clone(), None)
            .await?;
        let mut objects: Vec<VersionRef> = page.versions;
        objects.extend(page.delete_markers);

        if !objects.is_empty() {
            let (deleted, had_errors) = delete_page_objects(cloud, bucket, &objects).await?;
            deleted_count += deleted;
            if tracker.should_update() || deleted_count % PROGRESS_OBJECT_INTERVAL == 0 {
                print_delete_progress(deleted_count, total_objects, start);
            }
            // Failed entries are retried once by re-listing the same page;
            // persistent failures surface at the emptiness check below.
            if had_errors && !retried_current_page {
                retried_current_page = true;
                continue;
            }
        }

        retried_current_page = false;
        continuation = page.next_token;
        if continuation.is_none() {
            break;
        }
    }

    println!();
    println!(
        "  Deleted {} objects/versions in {}",
        deleted_count,
        format_duration(start.elapsed().as_secs_f64())
    );
    println!();

    abort_multipart_uploads(cloud, bucket).await?;

    if bucket_has_contents(cloud, bucket).await? {
        return Err(MigrationError::BucketNotEmpty {
            bucket: bucket.to_string(),
        });
    }

    println!("  Deleting empty bucket...");
    cloud.delete_bucket(bucket).await?;
    info!(bucket, deleted = deleted_count, "Bucket deleted");
    Ok(())
}
