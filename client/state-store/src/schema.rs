//! Column family definitions and record types for the migration state store.

use codec::{Decode, Encode};
use sev_common::rocksdb::{SchemaHistory, SchemaStep};
use sev_common::typed_store::{ScaleEncodedCf, SingleScaleEncodedValueCf};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of one tracked object.
#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileState {
    Discovered,
    Restoring,
    Restored,
    Downloaded,
    Verified,
    Deleted,
    Error,
}

/// Stored manifest entry for one object, keyed by `(bucket, key)`.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct FileRecord {
    pub size: u64,
    /// Server entity tag, quotes stripped. A `-` inside marks a multipart
    /// upload whose tag is not a plain content hash.
    pub etag: String,
    pub storage_class: String,
    pub last_modified: String,
    pub local_path: Option<String>,
    pub local_checksum: Option<String>,
    pub state: FileState,
    pub error_message: Option<String>,
    pub glacier_restore_requested_at: Option<String>,
    pub glacier_restored_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload describing a discovered object, as produced by the scanner.
#[derive(Clone, Debug, PartialEq)]
pub struct FileMetadata {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub storage_class: String,
    pub last_modified: String,
}

/// Outcome of inserting a manifest entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddFileOutcome {
    Inserted,
    /// The `(bucket, key)` pair already existed; the insert was a no-op.
    DuplicateIgnored,
}

/// Stored per-bucket progress record.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct BucketStatusRecord {
    pub file_count: u64,
    pub total_size: u64,
    pub storage_class_counts: BTreeMap<String, u64>,
    pub scan_complete: bool,
    pub sync_complete: bool,
    pub verify_complete: bool,
    pub delete_complete: bool,
    /// Verification metrics are optional because records written before the
    /// metrics existed read back as `None`; the orchestrator re-runs
    /// verification for those buckets.
    pub verified_file_count: Option<u64>,
    pub size_verified_count: Option<u64>,
    pub checksum_verified_count: Option<u64>,
    pub total_bytes_verified: Option<u64>,
    pub local_file_count: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload describing the results of a bucket scan.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketScanStatus {
    pub bucket: String,
    pub file_count: u64,
    pub total_size: u64,
    pub storage_classes: BTreeMap<String, u64>,
    pub scan_complete: bool,
}

/// Payload describing verification metrics for a bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketVerificationResult {
    pub bucket: String,
    pub verified_file_count: u64,
    pub size_verified_count: u64,
    pub checksum_verified_count: u64,
    pub total_bytes_verified: u64,
    pub local_file_count: u64,
}

/// The boolean progress flags of a bucket, in pipeline order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketFlag {
    Scan,
    Sync,
    Verify,
    Delete,
}

/// Global migration phase: the resume cursor for the whole pipeline.
/// Ordered by pipeline position; transitions are strictly monotonic.
#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Scanning,
    GlacierRestore,
    GlacierWait,
    Syncing,
    Verifying,
    Deleting,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Scanning => "scanning",
            Phase::GlacierRestore => "glacier_restore",
            Phase::GlacierWait => "glacier_wait",
            Phase::Syncing => "syncing",
            Phase::Verifying => "verifying",
            Phase::Deleting => "deleting",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scanning" => Ok(Phase::Scanning),
            "glacier_restore" => Ok(Phase::GlacierRestore),
            "glacier_wait" => Ok(Phase::GlacierWait),
            "syncing" => Ok(Phase::Syncing),
            "verifying" => Ok(Phase::Verifying),
            "deleting" => Ok(Phase::Deleting),
            "complete" => Ok(Phase::Complete),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

/// Stored phase cursor.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub updated_at: String,
}

/// One row of the manifest stream consumed by the duplicate-tree analyzer.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestRow {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Local checksum when recorded, else the server etag, else empty.
    pub checksum: String,
}

/// High-level statistics over scanned buckets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanSummary {
    pub bucket_count: u64,
    pub total_files: u64,
    pub total_size: u64,
    pub storage_classes: BTreeMap<String, u64>,
}

/// Cache slot identity for one duplicate-tree analysis snapshot.
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
pub struct DuplicateCacheKey {
    pub fingerprint: String,
    pub min_files: u64,
    pub min_bytes: u64,
    pub base_path: String,
}

/// Cached duplicate-tree report.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct CachedDuplicateReport {
    pub total_files: u64,
    pub generated_at: String,
    pub report_json: String,
}

// Column families.

/// Object manifest, keyed by `(bucket, key)`.
#[derive(Default)]
pub struct FilesCf;

impl ScaleEncodedCf for FilesCf {
    type Key = (String, String);
    type Value = FileRecord;

    const SCALE_ENCODED_NAME: &'static str = "files";
}

/// Per-bucket progress, keyed by bucket name.
#[derive(Default)]
pub struct BucketStatusCf;

impl ScaleEncodedCf for BucketStatusCf {
    type Key = String;
    type Value = BucketStatusRecord;

    const SCALE_ENCODED_NAME: &'static str = "bucket_status";
}

/// The single phase cursor.
#[derive(Default)]
pub struct CurrentPhaseCf;

impl SingleScaleEncodedValueCf for CurrentPhaseCf {
    type Value = PhaseRecord;

    const SINGLE_SCALE_ENCODED_VALUE_NAME: &'static str = "migration_metadata";
}

/// Duplicate-tree report cache.
#[derive(Default)]
pub struct DuplicateTreeCacheCf;

impl ScaleEncodedCf for DuplicateTreeCacheCf {
    type Key = DuplicateCacheKey;
    type Value = CachedDuplicateReport;

    const SCALE_ENCODED_NAME: &'static str = "duplicate_tree_cache";
}

/// Every column family of the current schema.
pub const ALL_COLUMN_FAMILIES: &[&str] = &[
    FilesCf::SCALE_ENCODED_NAME,
    BucketStatusCf::SCALE_ENCODED_NAME,
    CurrentPhaseCf::SINGLE_SCALE_ENCODED_VALUE_NAME,
    DuplicateTreeCacheCf::SCALE_ENCODED_NAME,
];

/// Schema history of the migration state store.
///
/// v1 retires the per-file `sync_progress` family from the layout that
/// predates bucket-level verification metrics. Databases from that era keep
/// their manifest and bucket rows; only the retired family is dropped.
pub static STATE_STORE_SCHEMA: SchemaHistory = SchemaHistory::new(&[SchemaStep {
    version: 1,
    retires: &["sync_progress"],
    note: "retire per-file sync progress tracking",
}]);
