//! The phase machine: drives the global pipeline and the per-bucket
//! sync -> verify -> delete sub-pipeline, resuming from the stored phase.

use std::path::PathBuf;
use std::sync::Arc;

use sev_cloud::ObjectStorage;
use sev_common::format::format_bytes;
use sev_state_store::{
    BucketFlag, BucketStatusRecord, FileState, MigrationStateStore, Phase,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::confirm::Confirm;
use crate::delete;
use crate::errors::MigrationError;
use crate::fs_check::check_drive_available;
use crate::glacier::{self, RestorePolicy};
use crate::scanner;
use crate::status::show_migration_status;
use crate::sync;
use crate::verify;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every bucket migrated and deleted.
    Complete,
    /// The operator interrupted; state is saved and a re-run resumes.
    Interrupted,
    /// Buckets remain (e.g. deletion was declined); a re-run continues.
    Paused,
}

/// Main orchestrator: owns the collaborators and drives phases forward.
pub struct Migrator {
    cloud: Arc<dyn ObjectStorage>,
    state: MigrationStateStore,
    base_path: PathBuf,
    excluded_buckets: Vec<String>,
    restore_policy: RestorePolicy,
    confirm: Arc<dyn Confirm>,
    cancel: CancellationToken,
}

impl Migrator {
    pub fn new(
        cloud: Arc<dyn ObjectStorage>,
        state: MigrationStateStore,
        base_path: PathBuf,
        excluded_buckets: Vec<String>,
        restore_policy: RestorePolicy,
        confirm: Arc<dyn Confirm>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cloud,
            state,
            base_path,
            excluded_buckets,
            restore_policy,
            confirm,
            cancel,
        }
    }

    pub fn state(&self) -> &MigrationStateStore {
        &self.state
    }

    /// Runs or resumes the migration from the stored phase. Never moves a
    /// phase backward; cancellation preserves the current phase.
    pub async fn run(&self) -> Result<RunOutcome, MigrationError> {
        check_drive_available(&self.base_path)?;

        let mut phase = self.state.current_phase()?;
        if phase == Phase::Complete {
            println!("Migration already complete!");
            show_migration_status(&self.state)?;
            return Ok(RunOutcome::Complete);
        }
        println!("Resuming from: {}", phase);
        println!();

        if phase == Phase::Scanning {
            scanner::scan_all_buckets(
                self.cloud.as_ref(),
                &self.state,
                &self.excluded_buckets,
                &self.cancel,
            )
            .await?;
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            phase = Phase::GlacierRestore;
        }

        if phase == Phase::GlacierRestore {
            glacier::request_all_restores(
                self.cloud.as_ref(),
                &self.state,
                &self.restore_policy,
                &self.cancel,
            )
            .await?;
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            phase = Phase::GlacierWait;
        }

        if phase == Phase::GlacierWait {
            glacier::wait_for_restores(
                self.cloud.as_ref(),
                &self.state,
                &self.restore_policy,
                &self.cancel,
            )
            .await?;
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            phase = Phase::Syncing;
        }

        if matches!(phase, Phase::Syncing | Phase::Verifying | Phase::Deleting) {
            self.migrate_all_buckets().await?;
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            phase = self.state.current_phase()?;
        }

        if phase == Phase::Complete {
            println!();
            println!("{}", "=".repeat(70));
            println!("MIGRATION COMPLETE!");
            println!("{}", "=".repeat(70));
            println!("All files have been migrated and verified.");
            println!("All cloud buckets have been deleted.");
            println!("{}", "=".repeat(70));
            Ok(RunOutcome::Complete)
        } else {
            Ok(RunOutcome::Paused)
        }
    }

    /// Phase 4: every bucket not yet deleted, in order.
    async fn migrate_all_buckets(&self) -> Result<(), MigrationError> {
        println!("{}", "=".repeat(70));
        println!("PHASE 4/4: MIGRATING BUCKETS (Sync -> Verify -> Delete)");
        println!("{}", "=".repeat(70));
        println!();

        let all_buckets = self.state.all_buckets()?;
        let completed = self.state.completed_buckets_for_phase(BucketFlag::Delete)?;
        let remaining: Vec<String> = all_buckets
            .iter()
            .filter(|bucket| !completed.contains(*bucket))
            .cloned()
            .collect();

        if remaining.is_empty() {
            println!("All buckets already migrated");
            self.state.set_current_phase(Phase::Complete)?;
            return Ok(());
        }

        println!("Migrating {} bucket(s)", remaining.len());
        println!("Already complete: {} bucket(s)", completed.len());
        println!();

        for (idx, bucket) in remaining.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            check_drive_available(&self.base_path)?;
            println!("{}", "=".repeat(70));
            println!("BUCKET {}/{}: {}", idx + 1, remaining.len(), bucket);
            println!("{}", "=".repeat(70));
            println!();
            self.process_bucket(bucket).await?;
            println!();
        }

        let still_incomplete: Vec<String> = {
            let done = self.state.completed_buckets_for_phase(BucketFlag::Delete)?;
            all_buckets
                .into_iter()
                .filter(|bucket| !done.contains(bucket))
                .collect()
        };
        if still_incomplete.is_empty() {
            println!("{}", "=".repeat(70));
            println!("PHASE 4 COMPLETE: All Buckets Migrated");
            println!("{}", "=".repeat(70));
            println!();
            self.state.set_current_phase(Phase::Complete)?;
        } else if !self.cancel.is_cancelled() {
            println!("{}", "=".repeat(70));
            println!("MIGRATION PAUSED");
            println!("{}", "=".repeat(70));
            println!("Remaining: {} bucket(s)", still_incomplete.len());
            println!("Re-run to continue.");
            println!("{}", "=".repeat(70));
            println!();
        }
        Ok(())
    }

    fn require_bucket_record(
        &self,
        bucket: &str,
    ) -> Result<BucketStatusRecord, MigrationError> {
        // The typed record carries every mandatory field by construction, so
        // the check reduces to the record being present and decodable.
        self.state
            .bucket_info(bucket)?
            .ok_or_else(|| MigrationError::BucketStateIncomplete {
                bucket: bucket.to_string(),
            })
    }

    /// One bucket through the sync -> verify -> delete sub-pipeline.
    async fn process_bucket(&self, bucket: &str) -> Result<(), MigrationError> {
        let bucket_info = self.require_bucket_record(bucket)?;

        if !bucket_info.sync_complete {
            self.state.set_current_phase(Phase::Syncing)?;
            println!("-> Step 1/3: Syncing from the cloud...");
            println!();
            sync::sync_bucket(
                self.cloud.as_ref(),
                &self.state,
                &self.base_path,
                bucket,
                &self.cancel,
            )
            .await?;
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.state
                .mark_bucket_files_downloaded(bucket, &self.base_path.join(bucket))?;
            self.state.mark_bucket_sync_complete(bucket)?;
            println!("  Sync complete");
            println!();
        } else {
            println!("-> Step 1/3: Already synced");
            println!();
        }

        // Re-verify when the flag is set but metrics are absent: those
        // records predate the verification metrics.
        let needs_verification =
            !bucket_info.verify_complete || bucket_info.verified_file_count.is_none();
        if needs_verification {
            self.state.set_current_phase(Phase::Verifying)?;
            if bucket_info.verify_complete {
                println!("-> Step 2/3: Re-verifying to compute detailed stats...");
            } else {
                println!("-> Step 2/3: Verifying local files...");
            }
            println!();
            let results = verify::verify_bucket(&self.state, &self.base_path, bucket)?;
            self.state
                .mark_bucket_verify_complete(&results.into_bucket_result(bucket))?;
            self.state
                .mark_bucket_files_state(bucket, FileState::Verified)?;
            println!("  Verification complete");
            println!();
        } else {
            println!("-> Step 2/3: Already verified");
            println!();
        }

        if !bucket_info.delete_complete {
            let bucket_info = self.require_bucket_record(bucket)?;
            self.state.set_current_phase(Phase::Deleting)?;
            println!("-> Step 3/3: Delete from the cloud");
            println!();
            self.delete_with_confirmation(bucket, &bucket_info).await?;
            println!();
        } else {
            println!("-> Step 3/3: Already deleted");
            println!();
        }
        Ok(())
    }

    async fn delete_with_confirmation(
        &self,
        bucket: &str,
        bucket_info: &BucketStatusRecord,
    ) -> Result<(), MigrationError> {
        show_verification_summary(bucket_info);
        println!();
        println!("{}", "=".repeat(70));
        println!("READY TO DELETE BUCKET");
        println!("{}", "=".repeat(70));
        println!();
        println!("  Bucket: {}", bucket);
        println!("  Files:  {}", bucket_info.file_count);
        println!("  Size:   {}", format_bytes(bucket_info.total_size));
        println!();
        println!("  Local verification: PASSED");
        println!();

        if self
            .confirm
            .confirm("  Delete this bucket from the cloud? (yes/no):")
        {
            println!();
            println!("  Deleting bucket '{}'...", bucket);
            delete::delete_bucket(self.cloud.as_ref(), &self.state, bucket, &self.cancel).await?;
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.state
                .mark_bucket_files_state(bucket, FileState::Deleted)?;
            self.state.mark_bucket_delete_complete(bucket)?;
            println!("  Deleted from the cloud");
        } else {
            warn!(bucket, "Deletion declined, bucket left in place");
            println!();
            println!("  Skipped - bucket NOT deleted");
            println!("  (You can delete it later manually)");
        }
        Ok(())
    }
}

fn show_verification_summary(bucket_info: &BucketStatusRecord) {
    let metric = |value: Option<u64>| value.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
    println!("  {}", "=".repeat(66));
    println!("  VERIFICATION SUMMARY");
    println!("  {}", "=".repeat(66));
    println!();
    println!("  Files in the cloud:   {}", bucket_info.file_count);
    println!("  Files found locally:  {}", metric(bucket_info.local_file_count));
    println!("  Size verified:        {} files", metric(bucket_info.size_verified_count));
    println!(
        "  Checksum verified:    {} files",
        metric(bucket_info.checksum_verified_count)
    );
    println!(
        "  Total verified:       {} files",
        metric(bucket_info.verified_file_count)
    );
    println!();
    println!(
        "  Total size: {}",
        format_bytes(bucket_info.total_bytes_verified.unwrap_or(0))
    );
    println!();
    println!("  Verification complete");
    println!("  {}", "=".repeat(66));
}
