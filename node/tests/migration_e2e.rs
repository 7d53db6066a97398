//! End-to-end pipeline tests against the in-memory fake cloud.
//!
//! Each test drives the real orchestrator over a seeded fake cloud and a
//! temporary destination, then inspects the state store and the filesystem.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use s3_evac_node::confirm::AutoConfirm;
use s3_evac_node::errors::MigrationError;
use s3_evac_node::glacier::RestorePolicy;
use s3_evac_node::orchestrator::{Migrator, RunOutcome};
use s3_evac_node::scanner;
use s3_evac_node::sync;
use sev_cloud::{
    CloudError, DeleteOutcome, HeadObjectInfo, InMemoryCloud, MultipartPage, ObjectBody,
    ObjectPage, ObjectStorage, RestoreTier, VersionPage, VersionRef, STORAGE_CLASS_GLACIER,
};
use sev_state_store::{MigrationStateStore, Phase};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    cloud: InMemoryCloud,
    base: TempDir,
    state_dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            cloud: InMemoryCloud::new(),
            base: TempDir::new().unwrap(),
            state_dir: TempDir::new().unwrap(),
        }
    }

    fn base_path(&self) -> PathBuf {
        self.base.path().join("data")
    }

    fn open_state(&self) -> MigrationStateStore {
        MigrationStateStore::open(&self.state_dir.path().join("state.db")).unwrap()
    }

    fn policy() -> RestorePolicy {
        RestorePolicy {
            days: 1,
            default_tier: RestoreTier::Standard,
            poll_interval: Duration::from_millis(50),
        }
    }

    fn migrator_with(
        &self,
        cloud: Arc<dyn ObjectStorage>,
        confirm_delete: bool,
        cancel: CancellationToken,
    ) -> Migrator {
        Migrator::new(
            cloud,
            self.open_state(),
            self.base_path(),
            Vec::new(),
            Self::policy(),
            Arc::new(AutoConfirm(confirm_delete)),
            cancel,
        )
    }

    fn migrator(&self, confirm_delete: bool) -> Migrator {
        self.migrator_with(
            Arc::new(self.cloud.clone()),
            confirm_delete,
            CancellationToken::new(),
        )
    }
}

#[tokio::test]
async fn empty_bucket_migrates_to_complete() {
    let harness = Harness::new();
    harness.cloud.create_bucket("b1");

    let outcome = {
        let migrator = harness.migrator(true);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Complete);

    let state = harness.open_state();
    assert_eq!(state.current_phase().unwrap(), Phase::Complete);
    let info = state.bucket_info("b1").unwrap().unwrap();
    assert_eq!(info.file_count, 0);
    assert!(info.scan_complete && info.sync_complete);
    assert!(info.verify_complete && info.delete_complete);
    assert_eq!(info.verified_file_count, Some(0));

    assert!(harness.base_path().join("b1").is_dir());
    assert!(!harness.cloud.bucket_exists("b1"));
}

#[tokio::test]
async fn single_standard_object_round_trips() {
    let harness = Harness::new();
    harness.cloud.put_object("b2", "hello.txt", b"hi");

    let outcome = {
        let migrator = harness.migrator(true);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Complete);

    let state = harness.open_state();
    let info = state.bucket_info("b2").unwrap().unwrap();
    assert_eq!(info.verified_file_count, Some(1));
    assert_eq!(info.checksum_verified_count, Some(1));
    assert_eq!(info.total_bytes_verified, Some(2));

    // The manifest kept the unquoted MD5 etag.
    let files = state.files_for_bucket("b2").unwrap();
    assert_eq!(files[0].1.etag, "49f68a5c8493ec2c0bf489821c21fc3b");

    let local = harness.base_path().join("b2").join("hello.txt");
    assert_eq!(std::fs::read(&local).unwrap(), b"hi");
}

#[tokio::test]
async fn multipart_object_gets_health_check_instead_of_md5() {
    let harness = Harness::new();
    harness.cloud.put_object_with(
        "b3",
        "big.bin",
        b"multipart body bytes",
        Some("\"abcdef1234567890abcdef1234567890-3\""),
        "STANDARD",
    );

    let outcome = {
        let migrator = harness.migrator(true);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Complete);

    let state = harness.open_state();
    let info = state.bucket_info("b3").unwrap().unwrap();
    // The composite etag cannot be recomputed; the SHA-256 read-through
    // still counts it as checksum-verified.
    assert_eq!(info.checksum_verified_count, Some(1));
    assert_eq!(info.verified_file_count, Some(1));
}

#[tokio::test]
async fn glacier_round_trip_parks_then_completes() {
    let harness = Harness::new();
    harness
        .cloud
        .put_archived_object("b4", "archived.dat", b"cold data", STORAGE_CLASS_GLACIER);

    // First run: the restore is requested but never completes, so the run
    // parks in glacier_wait until the operator interrupts.
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });
    let outcome = {
        let migrator =
            harness.migrator_with(Arc::new(harness.cloud.clone()), true, cancel);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Interrupted);

    {
        let state = harness.open_state();
        assert_eq!(state.current_phase().unwrap(), Phase::GlacierWait);
        let restoring = state.files_restoring().unwrap();
        assert_eq!(restoring.len(), 1);
        assert_eq!(restoring[0].key, "archived.dat");
    }

    // The archive thaws; the second run resumes from glacier_wait and
    // finishes the whole pipeline.
    harness.cloud.complete_restores();
    let outcome = {
        let migrator = harness.migrator(true);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Complete);

    let state = harness.open_state();
    assert_eq!(state.current_phase().unwrap(), Phase::Complete);
    let files = state.files_for_bucket("b4").unwrap();
    assert!(files[0].1.glacier_restored_at.is_some());
    assert!(!harness.cloud.bucket_exists("b4"));
}

/// Delegates to the fake cloud but cancels the token after a fixed number of
/// successful downloads, emulating an operator interrupt mid-sync.
struct CancelAfterDownloads {
    inner: InMemoryCloud,
    cancel: CancellationToken,
    remaining: AtomicUsize,
}

#[async_trait]
impl ObjectStorage for CancelAfterDownloads {
    async fn list_buckets(&self) -> Result<Vec<String>, CloudError> {
        self.inner.list_buckets().await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage, CloudError> {
        self.inner.list_objects(bucket, continuation).await
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        continuation: Option<String>,
        max_keys: Option<i32>,
    ) -> Result<VersionPage, CloudError> {
        self.inner
            .list_object_versions(bucket, continuation, max_keys)
            .await
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Result<MultipartPage, CloudError> {
        self.inner.list_multipart_uploads(bucket, continuation).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectBody, CloudError> {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) <= 1 {
            self.cancel.cancel();
        }
        self.inner.get_object(bucket, key).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectInfo, CloudError> {
        self.inner.head_object(bucket, key).await
    }

    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: u32,
        tier: RestoreTier,
    ) -> Result<(), CloudError> {
        self.inner.restore_object(bucket, key, days, tier).await
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[VersionRef],
    ) -> Result<DeleteOutcome, CloudError> {
        self.inner.delete_objects(bucket, objects).await
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), CloudError> {
        self.inner.abort_multipart_upload(bucket, key, upload_id).await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), CloudError> {
        self.inner.delete_bucket(bucket).await
    }
}

#[tokio::test]
async fn interrupted_sync_resumes_and_completes() {
    let harness = Harness::new();
    for i in 0..100 {
        harness
            .cloud
            .put_object("b5", &format!("file{:03}.txt", i), format!("data{}", i).as_bytes());
    }

    // First run: interrupt after 40 downloads.
    let cancel = CancellationToken::new();
    let wrapper = Arc::new(CancelAfterDownloads {
        inner: harness.cloud.clone(),
        cancel: cancel.clone(),
        remaining: AtomicUsize::new(40),
    });
    let outcome = {
        let migrator = harness.migrator_with(wrapper, true, cancel);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Interrupted);

    {
        let state = harness.open_state();
        let info = state.bucket_info("b5").unwrap().unwrap();
        assert!(info.scan_complete);
        assert!(!info.sync_complete, "interrupted sync must not flip the flag");
        assert!(!info.verify_complete);
    }

    // Second run: the downloader re-lists and rewrites everything, then
    // verification and deletion proceed.
    let outcome = {
        let migrator = harness.migrator(true);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Complete);

    let state = harness.open_state();
    let info = state.bucket_info("b5").unwrap().unwrap();
    assert!(info.sync_complete && info.verify_complete && info.delete_complete);
    assert_eq!(info.verified_file_count, Some(100));
    assert!(!harness.cloud.bucket_exists("b5"));
}

#[tokio::test]
async fn locally_deleted_file_fails_inventory_and_blocks_deletion() {
    let harness = Harness::new();
    harness.cloud.put_object("b6", "keep.txt", b"keep");
    harness.cloud.put_object("b6", "lost.txt", b"lost");

    // Drive scan and sync directly, then sabotage the local tree before the
    // verifier runs.
    let cancel = CancellationToken::new();
    {
        let state = harness.open_state();
        scanner::scan_all_buckets(&harness.cloud, &state, &[], &cancel)
            .await
            .unwrap();
        sync::sync_bucket(&harness.cloud, &state, &harness.base_path(), "b6", &cancel)
            .await
            .unwrap();
        state.mark_bucket_sync_complete("b6").unwrap();
    }
    std::fs::remove_file(harness.base_path().join("b6").join("lost.txt")).unwrap();

    let result = {
        let migrator = harness.migrator(true);
        migrator.run().await
    };
    match result {
        Err(MigrationError::InventoryMismatch {
            bucket,
            missing,
            extra,
        }) => {
            assert_eq!(bucket, "b6");
            assert_eq!(missing, 1);
            assert_eq!(extra, 0);
        }
        other => panic!("expected InventoryMismatch, got {:?}", other),
    }

    let state = harness.open_state();
    let info = state.bucket_info("b6").unwrap().unwrap();
    assert!(!info.verify_complete);
    assert!(!info.delete_complete);
    assert!(harness.cloud.bucket_exists("b6"), "bucket must not be deleted");
}

#[tokio::test]
async fn declined_confirmation_pauses_without_deleting() {
    let harness = Harness::new();
    harness.cloud.put_object("b7", "data.txt", b"payload");

    let outcome = {
        let migrator = harness.migrator(false);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Paused);

    let state = harness.open_state();
    let info = state.bucket_info("b7").unwrap().unwrap();
    assert!(info.sync_complete && info.verify_complete);
    assert!(!info.delete_complete);
    assert!(harness.cloud.bucket_exists("b7"));
    assert_ne!(state.current_phase().unwrap(), Phase::Complete);
}

#[tokio::test]
async fn delete_sweep_covers_markers_and_multipart_uploads() {
    let harness = Harness::new();
    harness.cloud.put_object("b8", "current.txt", b"x");
    harness.cloud.add_delete_marker("b8", "old.txt");
    harness.cloud.add_multipart_upload("b8", "partial.bin", "upload-1");

    let outcome = {
        let migrator = harness.migrator(true);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Complete);
    assert!(!harness.cloud.bucket_exists("b8"));
}

#[tokio::test]
async fn zero_byte_object_verifies() {
    let harness = Harness::new();
    harness.cloud.put_object("b9", "empty.bin", b"");

    let outcome = {
        let migrator = harness.migrator(true);
        migrator.run().await.unwrap()
    };
    assert_eq!(outcome, RunOutcome::Complete);

    let state = harness.open_state();
    let info = state.bucket_info("b9").unwrap().unwrap();
    assert_eq!(info.verified_file_count, Some(1));
    assert_eq!(info.checksum_verified_count, Some(1));
    assert_eq!(info.total_bytes_verified, Some(0));
}

#[tokio::test]
async fn malformed_listing_aborts_the_scan() {
    let harness = Harness::new();
    harness.cloud.put_object("b10", "a.txt", b"x");
    harness.cloud.set_malformed_listing("b10");

    let result = {
        let migrator = harness.migrator(true);
        migrator.run().await
    };
    assert!(matches!(
        result,
        Err(MigrationError::MalformedListing { .. })
    ));

    // The scan never finished, so the phase cursor stays at scanning.
    let state = harness.open_state();
    assert_eq!(state.current_phase().unwrap(), Phase::Scanning);
}

#[tokio::test]
async fn missing_etag_in_listing_is_a_manifest_error() {
    let harness = Harness::new();
    harness
        .cloud
        .put_object_with("b11", "no-etag.bin", b"x", None, "STANDARD");

    let result = {
        let migrator = harness.migrator(true);
        migrator.run().await
    };
    assert!(matches!(result, Err(MigrationError::Manifest { .. })));
}
