//! The `reset` command: recreate the state database empty.

use std::path::Path;

use anyhow::{Context, Result};
use sev_state_store::MigrationStateStore;
use tracing::info;

use crate::confirm::Confirm;

/// Deletes all migration state and recreates an empty database after
/// interactive confirmation. Local files are never touched.
///
/// Returns whether the reset actually happened.
pub fn reset_migration_state(state_db_path: &Path, confirm: &dyn Confirm) -> Result<bool> {
    println!();
    println!("{}", "=".repeat(70));
    println!("RESET MIGRATION");
    println!("{}", "=".repeat(70));
    println!();
    println!("This will delete all migration state and start over.");
    println!("Local files will NOT be deleted.");
    println!();

    if !confirm.confirm("Are you sure? (yes/no):") {
        println!();
        println!("Reset cancelled");
        return Ok(false);
    }

    let existed = state_db_path.exists();
    if existed {
        std::fs::remove_dir_all(state_db_path).with_context(|| {
            format!(
                "Failed to remove state database at {}",
                state_db_path.display()
            )
        })?;
    }
    MigrationStateStore::open(state_db_path)
        .with_context(|| format!("Failed to recreate state database at {}", state_db_path.display()))?;

    info!(path = %state_db_path.display(), existed, "State database reset");
    println!();
    if existed {
        println!("State database reset at {}", state_db_path.display());
    } else {
        println!("Created fresh state database at {}", state_db_path.display());
    }
    println!("Re-run the migration to start fresh");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::AutoConfirm;
    use sev_state_store::{FileMetadata, Phase};
    use tempfile::TempDir;

    fn seed(path: &Path) {
        let store = MigrationStateStore::open(path).unwrap();
        store
            .add_file(&FileMetadata {
                bucket: "b".to_string(),
                key: "k".to_string(),
                size: 1,
                etag: "aa".to_string(),
                storage_class: "STANDARD".to_string(),
                last_modified: String::new(),
            })
            .unwrap();
        store.set_current_phase(Phase::Syncing).unwrap();
    }

    #[test]
    fn declined_confirmation_leaves_state_alone() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("state.db");
        seed(&db);

        assert!(!reset_migration_state(&db, &AutoConfirm(false)).unwrap());

        let store = MigrationStateStore::open(&db).unwrap();
        assert_eq!(store.current_phase().unwrap(), Phase::Syncing);
        assert_eq!(store.files_for_bucket("b").unwrap().len(), 1);
    }

    #[test]
    fn confirmed_reset_recreates_an_empty_store() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("state.db");
        seed(&db);

        assert!(reset_migration_state(&db, &AutoConfirm(true)).unwrap());

        let store = MigrationStateStore::open(&db).unwrap();
        assert_eq!(store.current_phase().unwrap(), Phase::Scanning);
        assert!(store.files_for_bucket("b").unwrap().is_empty());
        assert!(store.all_buckets().unwrap().is_empty());
    }
}
