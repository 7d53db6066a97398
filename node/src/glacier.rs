//! Phases 2 and 3: requesting archive restores and waiting them out.

use std::time::Duration;

use sev_cloud::{CloudError, ObjectStorage, RestoreTier, STORAGE_CLASS_DEEP_ARCHIVE};
use sev_state_store::{FileEntry, MigrationStateStore, Phase};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::MigrationError;

/// Restore parameters, resolved from configuration once at startup.
#[derive(Clone, Copy, Debug)]
pub struct RestorePolicy {
    /// Retention window of restored bodies, in days.
    pub days: u32,
    /// Default retrieval tier; DEEP_ARCHIVE objects always use Bulk.
    pub default_tier: RestoreTier,
    /// Pause between restore-status polls.
    pub poll_interval: Duration,
}

/// Requests a restore for one archived file, treating an already-running
/// restore as success.
async fn request_restore(
    cloud: &dyn ObjectStorage,
    state: &MigrationStateStore,
    policy: &RestorePolicy,
    file: &FileEntry,
    idx: usize,
    total: usize,
) -> Result<(), MigrationError> {
    // Deep archive only supports the Bulk tier.
    let tier = if file.record.storage_class == STORAGE_CLASS_DEEP_ARCHIVE {
        RestoreTier::Bulk
    } else {
        policy.default_tier
    };

    match cloud
        .restore_object(&file.bucket, &file.key, policy.days, tier)
        .await
    {
        Ok(()) => {
            state.mark_glacier_restore_requested(&file.bucket, &file.key)?;
            println!("  [{}/{}] Requested: {}/{}", idx, total, file.bucket, file.key);
            Ok(())
        }
        Err(CloudError::RestoreAlreadyInProgress { .. }) => {
            warn!(
                bucket = %file.bucket,
                key = %file.key,
                "Restore already in progress, treating as requested"
            );
            state.mark_glacier_restore_requested(&file.bucket, &file.key)?;
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

/// Requests restores for every archived file still missing one, then
/// advances to the wait phase.
pub async fn request_all_restores(
    cloud: &dyn ObjectStorage,
    state: &MigrationStateStore,
    policy: &RestorePolicy,
    cancel: &CancellationToken,
) -> Result<(), MigrationError> {
    println!("{}", "=".repeat(70));
    println!("PHASE 2/4: REQUESTING GLACIER RESTORES");
    println!("{}", "=".repeat(70));
    println!();

    let files = state.glacier_files_needing_restore()?;
    if files.is_empty() {
        println!("No Glacier files need restore");
        println!();
        state.set_current_phase(Phase::GlacierWait)?;
        return Ok(());
    }

    println!("Requesting restores for {} file(s)", files.len());
    println!();
    for (idx, file) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(());
        }
        request_restore(cloud, state, policy, file, idx + 1, files.len()).await?;
    }

    if cancel.is_cancelled() {
        return Ok(());
    }

    state.set_current_phase(Phase::GlacierWait)?;
    println!();
    println!("{}", "=".repeat(70));
    println!("PHASE 2 COMPLETE: All Restores Requested");
    println!("{}", "=".repeat(70));
    println!();
    Ok(())
}

/// Heads one restoring file; a `Restore` header with
/// `ongoing-request="false"` means the body is available.
async fn check_restore_status(
    cloud: &dyn ObjectStorage,
    state: &MigrationStateStore,
    file: &FileEntry,
) -> Result<bool, MigrationError> {
    let head = cloud.head_object(&file.bucket, &file.key).await?;
    if let Some(restore) = head.restore {
        if restore.contains("ongoing-request=\"false\"") {
            state.mark_glacier_restored(&file.bucket, &file.key)?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Polls until every requested restore completed, sleeping interruptibly
/// between rounds, then advances to the sync phase.
pub async fn wait_for_restores(
    cloud: &dyn ObjectStorage,
    state: &MigrationStateStore,
    policy: &RestorePolicy,
    cancel: &CancellationToken,
) -> Result<(), MigrationError> {
    println!("{}", "=".repeat(70));
    println!("PHASE 3/4: WAITING FOR GLACIER RESTORES");
    println!("{}", "=".repeat(70));
    println!();

    while !cancel.is_cancelled() {
        let restoring = state.files_restoring()?;
        if restoring.is_empty() {
            break;
        }

        println!("Checking {} file(s) still restoring...", restoring.len());
        for (idx, file) in restoring.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if check_restore_status(cloud, state, file).await? {
                println!(
                    "  [{}/{}] Restored: {}/{}",
                    idx + 1,
                    restoring.len(),
                    file.bucket,
                    file.key
                );
            }
        }

        if state.files_restoring()?.is_empty() {
            continue;
        }

        // The poll pause must stay interruptible so an operator signal
        // returns immediately instead of after five minutes.
        println!();
        println!(
            "Waiting {} seconds before next check...",
            policy.poll_interval.as_secs()
        );
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(policy.poll_interval) => {}
        }
    }

    if cancel.is_cancelled() {
        return Ok(());
    }

    info!("All glacier restores complete");
    state.set_current_phase(Phase::Syncing)?;
    println!("{}", "=".repeat(70));
    println!("PHASE 3 COMPLETE: All Restores Complete");
    println!("{}", "=".repeat(70));
    println!();
    Ok(())
}
