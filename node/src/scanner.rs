//! Phase 1: scanning buckets into the manifest.

use std::collections::BTreeMap;

use sev_cloud::{ObjectEntry, ObjectStorage, STORAGE_CLASS_STANDARD};
use sev_common::format::format_bytes;
use sev_state_store::{BucketScanStatus, FileMetadata, MigrationStateStore, Phase};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::MigrationError;

/// Progress line cadence, in objects.
const SCAN_PROGRESS_EVERY: u64 = 10_000;

#[derive(Default)]
struct BucketStats {
    file_count: u64,
    total_size: u64,
    storage_classes: BTreeMap<String, u64>,
}

impl BucketStats {
    fn record(&mut self, size: u64, storage_class: &str) {
        self.file_count += 1;
        self.total_size += size;
        *self
            .storage_classes
            .entry(storage_class.to_string())
            .or_insert(0) += 1;
    }
}

fn process_object(
    state: &MigrationStateStore,
    bucket: &str,
    object: ObjectEntry,
    stats: &mut BucketStats,
) -> Result<(), MigrationError> {
    if object.key.ends_with('/') {
        // Pseudo-directory placeholder, nothing to download.
        return Ok(());
    }

    // The entity tag is what verification later compares against; a listing
    // without one is an unusable manifest.
    let etag = object.etag.ok_or_else(|| MigrationError::Manifest {
        bucket: bucket.to_string(),
        key: object.key.clone(),
    })?;
    let etag = etag.trim_matches('"').to_string();

    let storage_class = object
        .storage_class
        .unwrap_or_else(|| STORAGE_CLASS_STANDARD.to_string());

    state.add_file(&FileMetadata {
        bucket: bucket.to_string(),
        key: object.key,
        size: object.size,
        etag,
        storage_class: storage_class.clone(),
        last_modified: object.last_modified.unwrap_or_default(),
    })?;

    stats.record(object.size, &storage_class);
    if stats.file_count % SCAN_PROGRESS_EVERY == 0 {
        print!(
            "\r  Found {} files, {}...",
            stats.file_count,
            format_bytes(stats.total_size)
        );
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
    Ok(())
}

/// Extracts a page's object list, validating it against the reported key
/// count. A page may legitimately have no contents only when it also reports
/// zero keys.
fn page_contents(
    bucket: &str,
    contents: Option<Vec<ObjectEntry>>,
    key_count: Option<u64>,
) -> Result<Vec<ObjectEntry>, MigrationError> {
    match contents {
        Some(contents) => Ok(contents),
        None => match key_count {
            None | Some(0) => Ok(Vec::new()),
            Some(key_count) => Err(MigrationError::MalformedListing {
                bucket: bucket.to_string(),
                key_count,
            }),
        },
    }
}

/// Scans a single bucket, recording every object in the manifest.
pub async fn scan_bucket(
    cloud: &dyn ObjectStorage,
    state: &MigrationStateStore,
    bucket: &str,
    cancel: &CancellationToken,
) -> Result<(), MigrationError> {
    let mut stats = BucketStats::default();
    let mut continuation = None;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let page = cloud.list_objects(bucket, continuation).await?;
        for object in page_contents(bucket, page.contents, page.key_count)? {
            process_object(state, bucket, object, &mut stats)?;
        }
        continuation = page.next_token;
        if continuation.is_none() {
            break;
        }
    }

    println!(
        "  Found {} files, {}",
        stats.file_count,
        format_bytes(stats.total_size)
    );
    state.save_bucket_status(&BucketScanStatus {
        bucket: bucket.to_string(),
        file_count: stats.file_count,
        total_size: stats.total_size,
        storage_classes: stats.storage_classes,
        scan_complete: true,
    })?;
    Ok(())
}

/// Scans every non-excluded bucket, then advances to the glacier-restore
/// phase.
pub async fn scan_all_buckets(
    cloud: &dyn ObjectStorage,
    state: &MigrationStateStore,
    excluded: &[String],
    cancel: &CancellationToken,
) -> Result<(), MigrationError> {
    println!("{}", "=".repeat(70));
    println!("PHASE 1/4: SCANNING BUCKETS");
    println!("{}", "=".repeat(70));
    println!();

    let buckets: Vec<String> = cloud
        .list_buckets()
        .await?
        .into_iter()
        .filter(|bucket| !excluded.contains(bucket))
        .collect();

    println!("Found {} bucket(s)", buckets.len());
    if !excluded.is_empty() {
        println!("Excluded {} bucket(s): {}", excluded.len(), excluded.join(", "));
    }
    println!();

    for (idx, bucket) in buckets.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(());
        }
        println!("[{}/{}] Scanning: {}", idx + 1, buckets.len(), bucket);
        scan_bucket(cloud, state, bucket, cancel).await?;
        println!();
    }

    if cancel.is_cancelled() {
        return Ok(());
    }

    info!(buckets = buckets.len(), "Scan phase complete");
    state.set_current_phase(Phase::GlacierRestore)?;
    println!("{}", "=".repeat(70));
    println!("PHASE 1 COMPLETE: All Buckets Scanned");
    println!("{}", "=".repeat(70));
    println!();
    Ok(())
}
