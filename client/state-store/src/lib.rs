//! Durable state store for the s3-evac migration engine.
//!
//! One RocksDB database records everything the pipeline needs to resume after
//! a crash: the object manifest discovered by the scanner, per-bucket
//! progress flags and verification metrics, the global phase cursor, and the
//! duplicate-tree analysis cache. Every mutator commits its write batch
//! before returning, so state on disk never lags behind reported progress.

mod schema;
mod store;

#[cfg(test)]
mod tests;

pub use schema::{
    AddFileOutcome, BucketFlag, BucketScanStatus, BucketStatusRecord, BucketVerificationResult,
    CachedDuplicateReport, DuplicateCacheKey, FileMetadata, FileRecord, FileState, ManifestRow,
    Phase, ScanSummary, STATE_STORE_SCHEMA,
};
pub use store::{FileEntry, MigrationStateStore};

use thiserror::Error;

/// Errors surfaced by the state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The underlying database could not be opened or upgraded.
    #[error("state database error: {0}")]
    Database(#[from] sev_common::rocksdb::SchemaError),

    /// The store's contents are not what a healthy migration writes.
    /// Never guessed around: the operator must `reset` the state database.
    #[error("migration state is corrupt: {0} (run 'reset' to recreate the state database)")]
    Corrupt(String),

    /// A bucket progress flag was set out of order.
    #[error("bucket '{bucket}': cannot set {flag} before its predecessor flag")]
    FlagOrdering {
        bucket: String,
        flag: &'static str,
    },
}
