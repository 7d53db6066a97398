//! The migration state store.

use std::path::Path;

use chrono::Utc;
use sev_common::typed_store::{BufferedWriteSupport, TypedDbContext, TypedRocksDB};
use tracing::debug;

use crate::schema::*;
use crate::StateStoreError;

type RwContext<'a> = TypedDbContext<'a, TypedRocksDB, BufferedWriteSupport<'a, TypedRocksDB>>;

/// One manifest entry together with its identity.
#[derive(Clone, Debug, PartialEq)]
pub struct FileEntry {
    pub bucket: String,
    pub key: String,
    pub record: FileRecord,
}

/// Durable store recording every object's lifecycle, every bucket's progress
/// and the global phase cursor.
///
/// The store is owned exclusively by one process for the duration of a run;
/// concurrent processes against the same database are unsupported.
pub struct MigrationStateStore {
    rocks: TypedRocksDB,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl MigrationStateStore {
    /// Opens (or creates) the state database at `path`.
    ///
    /// Existing databases are brought up to the current schema: newly
    /// required column families are added transparently and families retired
    /// by the schema history are dropped. The phase cursor is initialized to
    /// `scanning` when absent.
    pub fn open(path: &Path) -> Result<Self, StateStoreError> {
        std::fs::create_dir_all(path).map_err(sev_common::rocksdb::SchemaError::from)?;
        let path_str = path.to_string_lossy();
        debug!(path = %path_str, "Opening migration state store");

        let rocks = TypedRocksDB::open(&path_str, ALL_COLUMN_FAMILIES, &STATE_STORE_SCHEMA)?;
        let store = Self { rocks };

        // First open of a fresh database: the migration starts by scanning.
        {
            let ctx = store.rw();
            if ctx.cf(&CurrentPhaseCf).get(&()).is_none() {
                ctx.cf(&CurrentPhaseCf).put(
                    &(),
                    &PhaseRecord {
                        phase: Phase::Scanning,
                        updated_at: now(),
                    },
                );
                ctx.flush();
            }
        }

        Ok(store)
    }

    fn rw(&self) -> RwContext<'_> {
        TypedDbContext::new(&self.rocks, BufferedWriteSupport::new(&self.rocks))
    }

    // File operations.

    /// Records metadata for a discovered object. Idempotent: re-inserting an
    /// existing `(bucket, key)` is a silent no-op.
    pub fn add_file(&self, metadata: &FileMetadata) -> Result<AddFileOutcome, StateStoreError> {
        let ctx = self.rw();
        let cf_key = (metadata.bucket.clone(), metadata.key.clone());
        if ctx.cf(&FilesCf).get(&cf_key).is_some() {
            return Ok(AddFileOutcome::DuplicateIgnored);
        }

        let timestamp = now();
        ctx.cf(&FilesCf).put(
            &cf_key,
            &FileRecord {
                size: metadata.size,
                etag: metadata.etag.clone(),
                storage_class: metadata.storage_class.clone(),
                last_modified: metadata.last_modified.clone(),
                local_path: None,
                local_checksum: None,
                state: FileState::Discovered,
                error_message: None,
                glacier_restore_requested_at: None,
                glacier_restored_at: None,
                created_at: timestamp.clone(),
                updated_at: timestamp,
            },
        );
        ctx.flush();
        Ok(AddFileOutcome::Inserted)
    }

    /// Records a manifest entry recovered from an already-downloaded local
    /// file, as the reseed admin flow does when the state database was lost
    /// after the data had landed on disk. The entry starts out downloaded
    /// with its on-disk location filled in; the server etag is gone with the
    /// old database, so it is recorded empty.
    pub fn add_reseeded_file(
        &self,
        metadata: &FileMetadata,
        local_path: &Path,
    ) -> Result<AddFileOutcome, StateStoreError> {
        let ctx = self.rw();
        let cf_key = (metadata.bucket.clone(), metadata.key.clone());
        if ctx.cf(&FilesCf).get(&cf_key).is_some() {
            return Ok(AddFileOutcome::DuplicateIgnored);
        }

        ctx.cf(&FilesCf).put(
            &cf_key,
            &FileRecord {
                size: metadata.size,
                etag: metadata.etag.clone(),
                storage_class: metadata.storage_class.clone(),
                last_modified: metadata.last_modified.clone(),
                local_path: Some(local_path.to_string_lossy().into_owned()),
                local_checksum: None,
                state: FileState::Downloaded,
                error_message: None,
                glacier_restore_requested_at: None,
                glacier_restored_at: None,
                created_at: now(),
                updated_at: metadata.last_modified.clone(),
            },
        );
        ctx.flush();
        Ok(AddFileOutcome::Inserted)
    }

    /// Tracks that a restore request has been issued. Never clears the
    /// timestamp.
    pub fn mark_glacier_restore_requested(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(), StateStoreError> {
        self.update_file(bucket, key, |record| {
            record.glacier_restore_requested_at = Some(now());
            record.state = FileState::Restoring;
        })
    }

    /// Marks that an archived object finished restoration.
    pub fn mark_glacier_restored(&self, bucket: &str, key: &str) -> Result<(), StateStoreError> {
        self.update_file(bucket, key, |record| {
            record.glacier_restored_at = Some(now());
            record.state = FileState::Restored;
        })
    }

    fn update_file(
        &self,
        bucket: &str,
        key: &str,
        mutate: impl FnOnce(&mut FileRecord),
    ) -> Result<(), StateStoreError> {
        let ctx = self.rw();
        let cf_key = (bucket.to_string(), key.to_string());
        if let Some(mut record) = ctx.cf(&FilesCf).get(&cf_key) {
            mutate(&mut record);
            record.updated_at = now();
            ctx.cf(&FilesCf).put(&cf_key, &record);
            ctx.flush();
        }
        Ok(())
    }

    /// Marks every manifest entry of a bucket as downloaded and records
    /// where each one landed on disk.
    pub fn mark_bucket_files_downloaded(
        &self,
        bucket: &str,
        local_root: &Path,
    ) -> Result<(), StateStoreError> {
        let ctx = self.rw();
        let entries: Vec<((String, String), FileRecord)> = ctx
            .cf(&FilesCf)
            .iterate()
            .filter(|((entry_bucket, _), _)| entry_bucket == bucket)
            .collect();
        let timestamp = now();
        for (cf_key, mut record) in entries {
            record.state = FileState::Downloaded;
            record.local_path = Some(local_root.join(&cf_key.1).to_string_lossy().into_owned());
            record.updated_at = timestamp.clone();
            ctx.cf(&FilesCf).put(&cf_key, &record);
        }
        ctx.flush();
        Ok(())
    }

    /// Advances the state of every manifest entry of a bucket, as the
    /// downloader/verifier/deleter finish their steps.
    pub fn mark_bucket_files_state(
        &self,
        bucket: &str,
        state: FileState,
    ) -> Result<(), StateStoreError> {
        let ctx = self.rw();
        let entries: Vec<((String, String), FileRecord)> = ctx
            .cf(&FilesCf)
            .iterate()
            .filter(|((entry_bucket, _), _)| entry_bucket == bucket)
            .collect();
        let timestamp = now();
        for (cf_key, mut record) in entries {
            record.state = state;
            record.updated_at = timestamp.clone();
            ctx.cf(&FilesCf).put(&cf_key, &record);
        }
        ctx.flush();
        Ok(())
    }

    /// Archived objects whose restore has not been requested yet.
    pub fn glacier_files_needing_restore(&self) -> Result<Vec<FileEntry>, StateStoreError> {
        self.collect_files(|record| {
            is_archived(&record.storage_class) && record.glacier_restore_requested_at.is_none()
        })
    }

    /// Archived objects with a requested but unfinished restore.
    pub fn files_restoring(&self) -> Result<Vec<FileEntry>, StateStoreError> {
        self.collect_files(|record| {
            is_archived(&record.storage_class)
                && record.glacier_restore_requested_at.is_some()
                && record.glacier_restored_at.is_none()
        })
    }

    fn collect_files(
        &self,
        filter: impl Fn(&FileRecord) -> bool,
    ) -> Result<Vec<FileEntry>, StateStoreError> {
        let ctx = self.rw();
        let mut entries: Vec<FileEntry> = ctx
            .cf(&FilesCf)
            .iterate()
            .filter(|(_, record)| filter(record))
            .map(|((bucket, key), record)| FileEntry {
                bucket,
                key,
                record,
            })
            .collect();
        entries.sort_by(|a, b| (&a.bucket, &a.key).cmp(&(&b.bucket, &b.key)));
        Ok(entries)
    }

    /// Expected file map for one bucket, sorted by key.
    pub fn files_for_bucket(
        &self,
        bucket: &str,
    ) -> Result<Vec<(String, FileRecord)>, StateStoreError> {
        let ctx = self.rw();
        let mut files: Vec<(String, FileRecord)> = ctx
            .cf(&FilesCf)
            .iterate()
            .filter(|((entry_bucket, _), _)| entry_bucket == bucket)
            .map(|((_, key), record)| (key, record))
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    /// The full manifest ordered by `(bucket, key)`, as consumed by the
    /// duplicate-tree analyzer.
    pub fn manifest_rows(&self) -> Result<Vec<ManifestRow>, StateStoreError> {
        let ctx = self.rw();
        let mut rows: Vec<ManifestRow> = ctx
            .cf(&FilesCf)
            .iterate()
            .map(|((bucket, key), record)| {
                let checksum = record
                    .local_checksum
                    .clone()
                    .unwrap_or_else(|| record.etag.clone());
                ManifestRow {
                    bucket,
                    key,
                    size: record.size,
                    checksum,
                }
            })
            .collect();
        rows.sort_by(|a, b| (&a.bucket, &a.key).cmp(&(&b.bucket, &b.key)));
        Ok(rows)
    }

    // Bucket operations.

    /// Saves scan results for a bucket. On update the original `created_at`
    /// is preserved while progress flags and verification metrics reset, so a
    /// re-scan restarts the bucket's pipeline.
    pub fn save_bucket_status(&self, status: &BucketScanStatus) -> Result<(), StateStoreError> {
        let ctx = self.rw();
        let created_at = ctx
            .cf(&BucketStatusCf)
            .get(&status.bucket)
            .map(|existing| existing.created_at)
            .unwrap_or_else(now);

        ctx.cf(&BucketStatusCf).put(
            &status.bucket,
            &BucketStatusRecord {
                file_count: status.file_count,
                total_size: status.total_size,
                storage_class_counts: status.storage_classes.clone(),
                scan_complete: status.scan_complete,
                sync_complete: false,
                verify_complete: false,
                delete_complete: false,
                verified_file_count: None,
                size_verified_count: None,
                checksum_verified_count: None,
                total_bytes_verified: None,
                local_file_count: None,
                created_at,
                updated_at: now(),
            },
        );
        ctx.flush();
        Ok(())
    }

    /// Flags that bucket sync finished.
    pub fn mark_bucket_sync_complete(&self, bucket: &str) -> Result<(), StateStoreError> {
        self.update_bucket(bucket, |record| {
            if !record.scan_complete {
                return Err(StateStoreError::FlagOrdering {
                    bucket: bucket.to_string(),
                    flag: "sync_complete",
                });
            }
            record.sync_complete = true;
            Ok(())
        })
    }

    /// Flags that bucket verification finished and stores its metrics.
    pub fn mark_bucket_verify_complete(
        &self,
        verification: &BucketVerificationResult,
    ) -> Result<(), StateStoreError> {
        self.update_bucket(&verification.bucket, |record| {
            if !record.sync_complete {
                return Err(StateStoreError::FlagOrdering {
                    bucket: verification.bucket.clone(),
                    flag: "verify_complete",
                });
            }
            record.verify_complete = true;
            record.verified_file_count = Some(verification.verified_file_count);
            record.size_verified_count = Some(verification.size_verified_count);
            record.checksum_verified_count = Some(verification.checksum_verified_count);
            record.total_bytes_verified = Some(verification.total_bytes_verified);
            record.local_file_count = Some(verification.local_file_count);
            Ok(())
        })
    }

    /// Flags that a bucket was deleted from the cloud.
    pub fn mark_bucket_delete_complete(&self, bucket: &str) -> Result<(), StateStoreError> {
        self.update_bucket(bucket, |record| {
            if !record.verify_complete {
                return Err(StateStoreError::FlagOrdering {
                    bucket: bucket.to_string(),
                    flag: "delete_complete",
                });
            }
            record.delete_complete = true;
            Ok(())
        })
    }

    fn update_bucket(
        &self,
        bucket: &str,
        mutate: impl FnOnce(&mut BucketStatusRecord) -> Result<(), StateStoreError>,
    ) -> Result<(), StateStoreError> {
        let ctx = self.rw();
        let mut record = ctx.cf(&BucketStatusCf).get(&bucket.to_string()).ok_or_else(|| {
            StateStoreError::Corrupt(format!("bucket '{}' missing from migration state", bucket))
        })?;
        mutate(&mut record)?;
        record.updated_at = now();
        ctx.cf(&BucketStatusCf).put(&bucket.to_string(), &record);
        ctx.flush();
        Ok(())
    }

    /// Every tracked bucket, sorted by name.
    pub fn all_buckets(&self) -> Result<Vec<String>, StateStoreError> {
        let ctx = self.rw();
        let mut buckets: Vec<String> = ctx
            .cf(&BucketStatusCf)
            .iterate()
            .map(|(bucket, _)| bucket)
            .collect();
        buckets.sort();
        Ok(buckets)
    }

    /// Buckets that completed the requested progress flag, sorted by name.
    pub fn completed_buckets_for_phase(
        &self,
        flag: BucketFlag,
    ) -> Result<Vec<String>, StateStoreError> {
        let ctx = self.rw();
        let mut buckets: Vec<String> = ctx
            .cf(&BucketStatusCf)
            .iterate()
            .filter(|(_, record)| match flag {
                BucketFlag::Scan => record.scan_complete,
                BucketFlag::Sync => record.sync_complete,
                BucketFlag::Verify => record.verify_complete,
                BucketFlag::Delete => record.delete_complete,
            })
            .map(|(bucket, _)| bucket)
            .collect();
        buckets.sort();
        Ok(buckets)
    }

    /// The stored status record for one bucket.
    pub fn bucket_info(&self, bucket: &str) -> Result<Option<BucketStatusRecord>, StateStoreError> {
        let ctx = self.rw();
        Ok(ctx.cf(&BucketStatusCf).get(&bucket.to_string()))
    }

    /// High-level statistics over scanned buckets.
    pub fn scan_summary(&self) -> Result<ScanSummary, StateStoreError> {
        let ctx = self.rw();
        let mut summary = ScanSummary::default();
        for (_, record) in ctx.cf(&BucketStatusCf).iterate() {
            if record.scan_complete {
                summary.bucket_count += 1;
                summary.total_files += record.file_count;
                summary.total_size += record.total_size;
            }
        }
        for (_, record) in ctx.cf(&FilesCf).iterate() {
            *summary
                .storage_classes
                .entry(record.storage_class.clone())
                .or_insert(0) += 1;
        }
        Ok(summary)
    }

    // Phase operations.

    /// Reads the phase cursor.
    ///
    /// Fails when the metadata row is missing: an unknown phase is never
    /// silently treated as `scanning`, the operator must reset.
    pub fn current_phase(&self) -> Result<Phase, StateStoreError> {
        let ctx = self.rw();
        ctx.cf(&CurrentPhaseCf)
            .get(&())
            .map(|record| record.phase)
            .ok_or_else(|| {
                StateStoreError::Corrupt(
                    "phase metadata is missing; refusing to resume from an unknown phase"
                        .to_string(),
                )
            })
    }

    /// Persists the new active phase.
    pub fn set_current_phase(&self, phase: Phase) -> Result<(), StateStoreError> {
        let ctx = self.rw();
        ctx.cf(&CurrentPhaseCf).put(
            &(),
            &PhaseRecord {
                phase,
                updated_at: now(),
            },
        );
        ctx.flush();
        Ok(())
    }

    // Duplicate-tree cache.

    /// Returns the cached report when the slot exists and its recorded file
    /// count still matches `expected_total_files`. Any mismatch silently
    /// invalidates the cache.
    pub fn load_duplicate_cache(
        &self,
        key: &DuplicateCacheKey,
        expected_total_files: u64,
    ) -> Result<Option<CachedDuplicateReport>, StateStoreError> {
        let ctx = self.rw();
        let cached = ctx.cf(&DuplicateTreeCacheCf).get(key);
        Ok(cached.filter(|report| report.total_files == expected_total_files))
    }

    /// Persists a duplicate-tree report for its snapshot slot.
    pub fn store_duplicate_cache(
        &self,
        key: &DuplicateCacheKey,
        report: &CachedDuplicateReport,
    ) -> Result<(), StateStoreError> {
        let ctx = self.rw();
        ctx.cf(&DuplicateTreeCacheCf).put(key, report);
        ctx.flush();
        Ok(())
    }
}

fn is_archived(storage_class: &str) -> bool {
    storage_class == "GLACIER" || storage_class == "DEEP_ARCHIVE"
}
