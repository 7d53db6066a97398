//! Error taxonomy of the migration pipeline.
//!
//! Semantic errors abort the affected phase or bucket with the state store
//! untouched past the last completed unit, so a re-run resumes at the same
//! point. Only `RestoreAlreadyInProgress` (handled inside the glacier
//! coordinator) and duplicate manifest inserts are recovered locally; every
//! other cloud failure propagates.

use std::path::PathBuf;

use sev_cloud::CloudError;
use sev_state_store::StateStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    /// A listing page carried a key count but no object list.
    #[error("bucket '{bucket}': listing reported {key_count} keys without contents")]
    MalformedListing { bucket: String, key_count: u64 },

    /// A listed object was missing its entity tag.
    #[error("bucket '{bucket}': object '{key}' has no entity tag in the listing")]
    Manifest { bucket: String, key: String },

    /// The destination drive is not mounted.
    #[error("destination drive is not mounted: {path} does not exist")]
    DriveNotAvailable { path: PathBuf },

    /// The destination exists but is not writable.
    #[error("permission denied writing to destination: {path}")]
    PermissionDenied { path: PathBuf },

    /// Listing or transport failure mid-download. The bucket's
    /// `sync_complete` flag never flipped, so a re-run redownloads it.
    #[error("sync failed for bucket '{bucket}': {reason}")]
    Sync { bucket: String, reason: String },

    /// Local inventory does not match the recorded manifest.
    #[error(
        "file inventory check failed for bucket '{bucket}': {missing} missing, {extra} extra"
    )]
    InventoryMismatch {
        bucket: String,
        missing: usize,
        extra: usize,
    },

    /// Size or checksum mismatches during the content check.
    #[error("verification failed for bucket '{bucket}':\n{details}")]
    Verification { bucket: String, details: String },

    /// Fewer files verified than the manifest expects.
    #[error("bucket '{bucket}': verified {verified} of {expected} files")]
    VerificationCountMismatch {
        bucket: String,
        verified: u64,
        expected: u64,
    },

    /// The bucket's state record is absent; likely a schema downgrade.
    #[error(
        "bucket '{bucket}' is missing its state record; \
         was the state database written by a newer version?"
    )]
    BucketStateIncomplete { bucket: String },

    /// Versions or markers remained after the delete sweep; the bucket is
    /// not deleted.
    #[error("bucket '{bucket}' still has contents after the delete sweep")]
    BucketNotEmpty { bucket: String },

    #[error(transparent)]
    State(#[from] StateStoreError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
