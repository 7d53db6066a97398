//! The `status` report.

use sev_common::format::format_bytes;
use sev_state_store::{BucketFlag, MigrationStateStore, Phase};

use crate::errors::MigrationError;

/// Prints the current phase and per-bucket progress table.
pub fn show_migration_status(state: &MigrationStateStore) -> Result<(), MigrationError> {
    println!();
    println!("{}", "=".repeat(70));
    println!("MIGRATION STATUS");
    println!("{}", "=".repeat(70));
    let current_phase = state.current_phase()?;
    println!("Current Phase: {}", current_phase);
    println!();

    if current_phase >= Phase::GlacierRestore {
        let summary = state.scan_summary()?;
        println!("Overall Summary:");
        println!("  Total Buckets: {}", summary.bucket_count);
        println!("  Total Files: {}", summary.total_files);
        println!("  Total Size: {}", format_bytes(summary.total_size));
        if !summary.storage_classes.is_empty() {
            println!("  Storage Classes:");
            for (class, count) in &summary.storage_classes {
                println!("    {}: {}", class, count);
            }
        }
        println!();
    }

    let all_buckets = state.all_buckets()?;
    if !all_buckets.is_empty() {
        let completed = state.completed_buckets_for_phase(BucketFlag::Delete)?;
        println!("Bucket Progress:");
        println!(
            "  Completed: {}/{} buckets",
            completed.len(),
            all_buckets.len()
        );
        println!();
        println!("Bucket Details:");
        for bucket in &all_buckets {
            let Some(status) = state.bucket_info(bucket)? else {
                continue;
            };
            let mark = |done: bool| if done { "x" } else { "o" };
            println!("  {}", bucket);
            println!(
                "    Sync:{} Verify:{} Delete:{}  ({} files, {})",
                mark(status.sync_complete),
                mark(status.verify_complete),
                mark(status.delete_complete),
                status.file_count,
                format_bytes(status.total_size)
            );
        }
    }
    println!("{}", "=".repeat(70));
    Ok(())
}
