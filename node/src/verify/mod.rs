//! Two-stage bucket verification: inventory match, then content check.

mod checksums;
mod inventory;

pub use checksums::hash_file_hex;

use std::path::Path;

use sev_common::format::format_bytes;
use sev_state_store::{BucketVerificationResult, MigrationStateStore};
use tracing::info;

use crate::errors::MigrationError;

/// Metrics produced by a successful verification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyResults {
    pub verified_count: u64,
    pub size_verified: u64,
    pub checksum_verified: u64,
    pub total_bytes_verified: u64,
    pub local_file_count: u64,
}

impl VerifyResults {
    pub fn into_bucket_result(self, bucket: &str) -> BucketVerificationResult {
        BucketVerificationResult {
            bucket: bucket.to_string(),
            verified_file_count: self.verified_count,
            size_verified_count: self.size_verified,
            checksum_verified_count: self.checksum_verified,
            total_bytes_verified: self.total_bytes_verified,
            local_file_count: self.local_file_count,
        }
    }
}

/// Verifies a bucket's local files with complete integrity checking.
///
/// Stage one rebuilds the local inventory and compares key sets against the
/// manifest. Stage two re-reads every file: sizes always, MD5 against the
/// entity tag for single-part objects, and a SHA-256 read-through for
/// multipart objects whose tag is not a content hash. Both stages must pass
/// before a bucket may be deleted.
pub fn verify_bucket(
    state: &MigrationStateStore,
    base_path: &Path,
    bucket: &str,
) -> Result<VerifyResults, MigrationError> {
    let bucket_info = state
        .bucket_info(bucket)?
        .ok_or_else(|| MigrationError::BucketStateIncomplete {
            bucket: bucket.to_string(),
        })?;
    let expected_files = bucket_info.file_count;
    let expected_size = bucket_info.total_size;

    let local_path = base_path.join(bucket);
    if !local_path.exists() {
        return Err(MigrationError::Verification {
            bucket: bucket.to_string(),
            details: format!("local path {} does not exist", local_path.display()),
        });
    }

    println!(
        "  Expected: {} files, {}",
        expected_files,
        format_bytes(expected_size)
    );
    println!();

    let expected_file_map = inventory::load_expected_files(state, bucket)?;
    let local_files = inventory::scan_local_files(&local_path, expected_files)?;
    inventory::check_inventory(bucket, &expected_file_map, &local_files)?;
    println!(
        "  All {} files present (no missing or extra files)",
        expected_files
    );
    println!();

    let stats = checksums::verify_files(
        bucket,
        &local_files,
        &expected_file_map,
        expected_files,
        expected_size,
    )?;

    let ignored_count = (local_files.len() as u64).saturating_sub(expected_files);

    println!("  Cloud files:          {}", expected_files);
    println!("  Verified files:       {}", stats.verified_count);
    println!("  - Size verified:      {}", stats.size_verified);
    println!("  - Checksum verified:  {}", stats.checksum_verified);
    if ignored_count > 0 {
        println!();
        println!(
            "  (Ignored {} system metadata files: .DS_Store, etc.)",
            ignored_count
        );
    }
    println!();

    if stats.verified_count != expected_files {
        return Err(MigrationError::VerificationCountMismatch {
            bucket: bucket.to_string(),
            verified: stats.verified_count,
            expected: expected_files,
        });
    }

    println!("  All {} files verified successfully", stats.verified_count);
    println!("  Total size: {}", format_bytes(expected_size));
    println!();
    info!(
        bucket,
        verified = stats.verified_count,
        bytes = stats.total_bytes_verified,
        "Bucket verification passed"
    );

    Ok(VerifyResults {
        verified_count: stats.verified_count,
        size_verified: stats.size_verified,
        checksum_verified: stats.checksum_verified,
        total_bytes_verified: stats.total_bytes_verified,
        local_file_count: local_files.len() as u64,
    })
}
