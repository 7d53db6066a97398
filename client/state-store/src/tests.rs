//! Tests for the migration state store.

use std::collections::BTreeMap;

use tempfile::TempDir;

use crate::*;

fn open_store(tmp: &TempDir) -> MigrationStateStore {
    MigrationStateStore::open(tmp.path()).unwrap()
}

fn sample_file(bucket: &str, key: &str, storage_class: &str) -> FileMetadata {
    FileMetadata {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: 42,
        etag: "49f68a5c8493ec2c0bf489821c21fc3b".to_string(),
        storage_class: storage_class.to_string(),
        last_modified: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn sample_scan(bucket: &str, file_count: u64) -> BucketScanStatus {
    BucketScanStatus {
        bucket: bucket.to_string(),
        file_count,
        total_size: file_count * 42,
        storage_classes: BTreeMap::from([("STANDARD".to_string(), file_count)]),
        scan_complete: true,
    }
}

mod file_tests {
    use super::*;

    #[test]
    fn add_file_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        let metadata = sample_file("b1", "a.txt", "STANDARD");
        assert_eq!(store.add_file(&metadata).unwrap(), AddFileOutcome::Inserted);
        assert_eq!(
            store.add_file(&metadata).unwrap(),
            AddFileOutcome::DuplicateIgnored
        );

        let files = store.files_for_bucket("b1").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1.state, FileState::Discovered);
    }

    #[test]
    fn duplicate_insert_does_not_overwrite_existing_record() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        store.add_file(&sample_file("b1", "a.txt", "STANDARD")).unwrap();
        store.mark_glacier_restore_requested("b1", "a.txt").unwrap();

        // Re-inserting must not reset the glacier timestamp.
        store.add_file(&sample_file("b1", "a.txt", "STANDARD")).unwrap();
        let files = store.files_for_bucket("b1").unwrap();
        assert!(files[0].1.glacier_restore_requested_at.is_some());
    }

    #[test]
    fn glacier_queries_follow_restore_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        store.add_file(&sample_file("b1", "hot.txt", "STANDARD")).unwrap();
        store.add_file(&sample_file("b1", "cold.bin", "GLACIER")).unwrap();
        store.add_file(&sample_file("b1", "deep.bin", "DEEP_ARCHIVE")).unwrap();

        let needing = store.glacier_files_needing_restore().unwrap();
        let keys: Vec<_> = needing.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["cold.bin", "deep.bin"]);
        assert!(store.files_restoring().unwrap().is_empty());

        store.mark_glacier_restore_requested("b1", "cold.bin").unwrap();
        assert_eq!(store.glacier_files_needing_restore().unwrap().len(), 1);
        let restoring = store.files_restoring().unwrap();
        assert_eq!(restoring.len(), 1);
        assert_eq!(restoring[0].key, "cold.bin");

        store.mark_glacier_restored("b1", "cold.bin").unwrap();
        assert!(store.files_restoring().unwrap().iter().all(|f| f.key != "cold.bin"));

        // restored implies requested
        let files = store.files_for_bucket("b1").unwrap();
        let cold = &files.iter().find(|(k, _)| k == "cold.bin").unwrap().1;
        assert!(cold.glacier_restore_requested_at.is_some());
        assert!(cold.glacier_restored_at.is_some());
    }

    #[test]
    fn reseeded_files_start_out_downloaded_with_their_location() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        let metadata = FileMetadata {
            bucket: "b1".to_string(),
            key: "dir/a.txt".to_string(),
            size: 7,
            etag: String::new(),
            storage_class: "STANDARD".to_string(),
            last_modified: "2024-02-02T00:00:00+00:00".to_string(),
        };
        let outcome = store
            .add_reseeded_file(&metadata, std::path::Path::new("/mnt/backup/b1/dir/a.txt"))
            .unwrap();
        assert_eq!(outcome, AddFileOutcome::Inserted);

        let files = store.files_for_bucket("b1").unwrap();
        assert_eq!(files[0].1.state, FileState::Downloaded);
        assert_eq!(
            files[0].1.local_path.as_deref(),
            Some("/mnt/backup/b1/dir/a.txt")
        );
        assert_eq!(files[0].1.etag, "");

        // Reseeding is as idempotent as scanning.
        assert_eq!(
            store
                .add_reseeded_file(&metadata, std::path::Path::new("/elsewhere"))
                .unwrap(),
            AddFileOutcome::DuplicateIgnored
        );
    }

    #[test]
    fn downloaded_files_record_their_local_path() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        store.add_file(&sample_file("b1", "dir/a.txt", "STANDARD")).unwrap();
        store
            .mark_bucket_files_downloaded("b1", std::path::Path::new("/mnt/backup/b1"))
            .unwrap();

        let files = store.files_for_bucket("b1").unwrap();
        assert_eq!(files[0].1.state, FileState::Downloaded);
        assert_eq!(
            files[0].1.local_path.as_deref(),
            Some("/mnt/backup/b1/dir/a.txt")
        );
    }

    #[test]
    fn bucket_file_states_advance_in_bulk() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        store.add_file(&sample_file("b1", "a.txt", "STANDARD")).unwrap();
        store.add_file(&sample_file("b2", "b.txt", "STANDARD")).unwrap();

        store.mark_bucket_files_state("b1", FileState::Downloaded).unwrap();

        let b1 = store.files_for_bucket("b1").unwrap();
        let b2 = store.files_for_bucket("b2").unwrap();
        assert_eq!(b1[0].1.state, FileState::Downloaded);
        assert_eq!(b2[0].1.state, FileState::Discovered);
    }
}

mod bucket_tests {
    use super::*;

    #[test]
    fn save_bucket_status_preserves_created_at_and_resets_progress() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        store.save_bucket_status(&sample_scan("b1", 3)).unwrap();
        let first = store.bucket_info("b1").unwrap().unwrap();

        store.mark_bucket_sync_complete("b1").unwrap();

        // A re-scan resets progress but keeps the original creation stamp.
        store.save_bucket_status(&sample_scan("b1", 5)).unwrap();
        let second = store.bucket_info("b1").unwrap().unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.file_count, 5);
        assert!(!second.sync_complete);
        assert!(second.verified_file_count.is_none());
    }

    #[test]
    fn progress_flags_enforce_pipeline_order() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        store.save_bucket_status(&sample_scan("b1", 1)).unwrap();

        // verify before sync is rejected
        let premature = store.mark_bucket_verify_complete(&BucketVerificationResult {
            bucket: "b1".to_string(),
            verified_file_count: 1,
            size_verified_count: 1,
            checksum_verified_count: 1,
            total_bytes_verified: 42,
            local_file_count: 1,
        });
        assert!(matches!(
            premature,
            Err(StateStoreError::FlagOrdering { .. })
        ));

        // delete before verify is rejected
        assert!(matches!(
            store.mark_bucket_delete_complete("b1"),
            Err(StateStoreError::FlagOrdering { .. })
        ));

        store.mark_bucket_sync_complete("b1").unwrap();
        store
            .mark_bucket_verify_complete(&BucketVerificationResult {
                bucket: "b1".to_string(),
                verified_file_count: 1,
                size_verified_count: 1,
                checksum_verified_count: 1,
                total_bytes_verified: 42,
                local_file_count: 1,
            })
            .unwrap();
        store.mark_bucket_delete_complete("b1").unwrap();

        let record = store.bucket_info("b1").unwrap().unwrap();
        assert!(record.scan_complete && record.sync_complete);
        assert!(record.verify_complete && record.delete_complete);
        assert_eq!(record.verified_file_count, Some(1));
        assert_eq!(record.total_bytes_verified, Some(42));
    }

    #[test]
    fn completed_buckets_filter_by_flag() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        store.save_bucket_status(&sample_scan("b1", 1)).unwrap();
        store.save_bucket_status(&sample_scan("b2", 1)).unwrap();
        store.mark_bucket_sync_complete("b2").unwrap();

        assert_eq!(
            store.completed_buckets_for_phase(BucketFlag::Scan).unwrap(),
            vec!["b1", "b2"]
        );
        assert_eq!(
            store.completed_buckets_for_phase(BucketFlag::Sync).unwrap(),
            vec!["b2"]
        );
        assert!(store
            .completed_buckets_for_phase(BucketFlag::Delete)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn scan_summary_totals_scanned_buckets() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        store.add_file(&sample_file("b1", "a.txt", "STANDARD")).unwrap();
        store.add_file(&sample_file("b1", "b.bin", "GLACIER")).unwrap();
        store.save_bucket_status(&sample_scan("b1", 2)).unwrap();

        let summary = store.scan_summary().unwrap();
        assert_eq!(summary.bucket_count, 1);
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.storage_classes.get("STANDARD"), Some(&1));
        assert_eq!(summary.storage_classes.get("GLACIER"), Some(&1));
    }
}

mod phase_tests {
    use super::*;

    #[test]
    fn fresh_store_starts_in_scanning() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);
        assert_eq!(store.current_phase().unwrap(), Phase::Scanning);
    }

    #[test]
    fn phase_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open_store(&tmp);
            store.set_current_phase(Phase::GlacierWait).unwrap();
        }
        let store = open_store(&tmp);
        assert_eq!(store.current_phase().unwrap(), Phase::GlacierWait);
    }

    #[test]
    fn phase_round_trips_through_strings() {
        for phase in [
            Phase::Scanning,
            Phase::GlacierRestore,
            Phase::GlacierWait,
            Phase::Syncing,
            Phase::Verifying,
            Phase::Deleting,
            Phase::Complete,
        ] {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
    }
}

mod manifest_tests {
    use super::*;

    #[test]
    fn manifest_rows_are_ordered_and_fall_back_to_etag() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        store.add_file(&sample_file("b2", "x.txt", "STANDARD")).unwrap();
        store.add_file(&sample_file("b1", "z.txt", "STANDARD")).unwrap();
        store.add_file(&sample_file("b1", "a.txt", "STANDARD")).unwrap();

        let rows = store.manifest_rows().unwrap();
        let identities: Vec<_> = rows
            .iter()
            .map(|r| (r.bucket.as_str(), r.key.as_str()))
            .collect();
        assert_eq!(
            identities,
            vec![("b1", "a.txt"), ("b1", "z.txt"), ("b2", "x.txt")]
        );
        assert!(rows.iter().all(|r| r.checksum == "49f68a5c8493ec2c0bf489821c21fc3b"));
    }
}

mod duplicate_cache_tests {
    use super::*;

    fn cache_key() -> DuplicateCacheKey {
        DuplicateCacheKey {
            fingerprint: "abc123".to_string(),
            min_files: 2,
            min_bytes: 512 * 1024 * 1024,
            base_path: "/mnt/backup".to_string(),
        }
    }

    #[test]
    fn cache_hit_requires_matching_total_files() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        let report = CachedDuplicateReport {
            total_files: 10,
            generated_at: "2024-01-01T00:00:00Z".to_string(),
            report_json: "[]".to_string(),
        };
        store.store_duplicate_cache(&cache_key(), &report).unwrap();

        assert!(store.load_duplicate_cache(&cache_key(), 10).unwrap().is_some());
        // Stale snapshot: same fingerprint slot but the manifest grew.
        assert!(store.load_duplicate_cache(&cache_key(), 11).unwrap().is_none());
    }

    #[test]
    fn cache_miss_for_different_thresholds() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        let report = CachedDuplicateReport {
            total_files: 10,
            generated_at: "2024-01-01T00:00:00Z".to_string(),
            report_json: "[]".to_string(),
        };
        store.store_duplicate_cache(&cache_key(), &report).unwrap();

        let mut other = cache_key();
        other.min_files = 5;
        assert!(store.load_duplicate_cache(&other, 10).unwrap().is_none());
    }
}
