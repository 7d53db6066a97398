//! The `reseed` command: rebuild the manifest from the local drive layout.
//!
//! Disaster recovery for the case where the state database is lost or
//! corrupted after data already landed on disk: the database is recreated
//! empty and repopulated by scanning `<base>/<bucket>/<key>`. Recovered
//! entries start out downloaded with their on-disk location filled in; the
//! server etags died with the old database, so they are recorded empty and
//! only a fresh cloud scan can restore checksum verification.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sev_common::format::format_bytes;
use sev_state_store::{FileMetadata, MigrationStateStore};
use tracing::info;

use crate::confirm::Confirm;

/// Progress line cadence, in files.
const RESEED_PROGRESS_EVERY: u64 = 10_000;

/// What a reseed recovered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReseedSummary {
    pub files: u64,
    pub bytes: u64,
}

/// Bucket directories are the immediate subdirectories of the base path,
/// in name order; stray files at the top level are not buckets.
fn bucket_dirs(base_path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut buckets = Vec::new();
    for entry in std::fs::read_dir(base_path)
        .with_context(|| format!("reading base path {}", base_path.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            buckets.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    buckets.sort();
    Ok(buckets)
}

fn reseed_bucket(
    store: &MigrationStateStore,
    bucket: &str,
    bucket_dir: &Path,
    summary: &mut ReseedSummary,
) -> Result<()> {
    let mut pending: Vec<PathBuf> = vec![bucket_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            // Files can vanish or lose permissions mid-scan; skip those and
            // keep recovering the rest.
            let Ok(metadata) = path.metadata() else {
                continue;
            };
            let key = path
                .strip_prefix(bucket_dir)
                .expect("walked path is under the bucket dir")
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let last_modified = metadata
                .modified()
                .map(|mtime| DateTime::<Utc>::from(mtime).to_rfc3339())
                .unwrap_or_default();

            store.add_reseeded_file(
                &FileMetadata {
                    bucket: bucket.to_string(),
                    key,
                    size: metadata.len(),
                    etag: String::new(),
                    storage_class: "STANDARD".to_string(),
                    last_modified,
                },
                &path,
            )?;
            summary.files += 1;
            summary.bytes += metadata.len();
            if summary.files % RESEED_PROGRESS_EVERY == 0 {
                print!("\r  Recovered {} files, {}...", summary.files, format_bytes(summary.bytes));
                use std::io::Write;
                let _ = std::io::stdout().flush();
            }
        }
    }
    Ok(())
}

/// Recreates the state database and repopulates the manifest by scanning the
/// local drive layout, after interactive confirmation.
///
/// Returns `None` when the operator declined, otherwise what was recovered.
pub fn reseed_state_db_from_local_drive(
    base_path: &Path,
    state_db_path: &Path,
    confirm: &dyn Confirm,
) -> Result<Option<ReseedSummary>> {
    if !base_path.exists() {
        bail!("base path does not exist: {}", base_path.display());
    }

    println!();
    println!("{}", "=".repeat(70));
    println!("RESEED MIGRATION STATE FROM LOCAL DRIVE");
    println!("{}", "=".repeat(70));
    println!();
    println!("This will delete the current migration state and rebuild the");
    println!("manifest from the files under {}.", base_path.display());
    println!("Local files will NOT be modified. Cloud-side etags cannot be");
    println!("recovered; re-run a scan before trusting checksum verification.");
    println!();

    if !confirm.confirm("Are you sure? (yes/no):") {
        println!();
        println!("Reseed cancelled");
        return Ok(None);
    }

    if state_db_path.exists() {
        std::fs::remove_dir_all(state_db_path).with_context(|| {
            format!("removing state database at {}", state_db_path.display())
        })?;
    }
    let store = MigrationStateStore::open(state_db_path)
        .with_context(|| format!("recreating state database at {}", state_db_path.display()))?;

    let mut summary = ReseedSummary::default();
    for (bucket, bucket_dir) in bucket_dirs(base_path)? {
        println!("Reseeding bucket: {}", bucket);
        reseed_bucket(&store, &bucket, &bucket_dir, &mut summary)?;
    }

    info!(
        files = summary.files,
        bytes = summary.bytes,
        "State database reseeded from local drive"
    );
    println!();
    println!(
        "Recovered {} files, {} into {}",
        summary.files,
        format_bytes(summary.bytes),
        state_db_path.display()
    );
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::AutoConfirm;
    use sev_state_store::{FileState, Phase};
    use tempfile::TempDir;

    fn seed_local_tree(base: &Path) {
        std::fs::create_dir_all(base.join("b1/dir")).unwrap();
        std::fs::create_dir_all(base.join("b2")).unwrap();
        std::fs::write(base.join("b1/top.txt"), b"12345").unwrap();
        std::fs::write(base.join("b1/dir/deep.bin"), b"xyz").unwrap();
        std::fs::write(base.join("b2/only.dat"), b"").unwrap();
        // A stray file at the top level is not a bucket.
        std::fs::write(base.join("notes.txt"), b"ignore me").unwrap();
    }

    #[test]
    fn reseed_rebuilds_the_manifest_from_disk() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("data");
        let db = tmp.path().join("state.db");
        seed_local_tree(&base);

        let summary = reseed_state_db_from_local_drive(&base, &db, &AutoConfirm(true))
            .unwrap()
            .unwrap();
        assert_eq!(summary, ReseedSummary { files: 3, bytes: 8 });

        let store = MigrationStateStore::open(&db).unwrap();
        assert_eq!(store.all_buckets().unwrap(), Vec::<String>::new());
        assert_eq!(store.current_phase().unwrap(), Phase::Scanning);

        let b1 = store.files_for_bucket("b1").unwrap();
        let keys: Vec<&str> = b1.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["dir/deep.bin", "top.txt"]);
        for (_, record) in &b1 {
            assert_eq!(record.state, FileState::Downloaded);
            assert_eq!(record.etag, "");
            assert!(record.local_path.is_some());
        }

        let b2 = store.files_for_bucket("b2").unwrap();
        assert_eq!(b2.len(), 1);
        assert_eq!(b2[0].1.size, 0);
    }

    #[test]
    fn reseed_replaces_previous_state() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("data");
        let db = tmp.path().join("state.db");
        seed_local_tree(&base);

        {
            let store = MigrationStateStore::open(&db).unwrap();
            store.set_current_phase(Phase::Deleting).unwrap();
        }

        reseed_state_db_from_local_drive(&base, &db, &AutoConfirm(true)).unwrap();

        let store = MigrationStateStore::open(&db).unwrap();
        assert_eq!(store.current_phase().unwrap(), Phase::Scanning);
    }

    #[test]
    fn declined_confirmation_leaves_state_alone() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("data");
        let db = tmp.path().join("state.db");
        seed_local_tree(&base);

        {
            let store = MigrationStateStore::open(&db).unwrap();
            store.set_current_phase(Phase::Syncing).unwrap();
        }

        let outcome =
            reseed_state_db_from_local_drive(&base, &db, &AutoConfirm(false)).unwrap();
        assert!(outcome.is_none());

        let store = MigrationStateStore::open(&db).unwrap();
        assert_eq!(store.current_phase().unwrap(), Phase::Syncing);
    }

    #[test]
    fn missing_base_path_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = reseed_state_db_from_local_drive(
            &tmp.path().join("nope"),
            &tmp.path().join("state.db"),
            &AutoConfirm(true),
        );
        assert!(result.is_err());
    }
}
