//! Stage one: local inventory against the recorded manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sev_state_store::MigrationStateStore;

use crate::errors::MigrationError;

/// At most this many example paths are shown per problem class.
const MAX_ERROR_DISPLAY: usize = 10;

/// Expected metadata for one key, straight from the manifest.
#[derive(Clone, Debug)]
pub struct ExpectedFile {
    pub size: u64,
    pub etag: String,
}

/// Filesystem metadata files that may appear locally without being part of
/// the migrated data. Counted, never treated as errors.
fn is_system_metadata(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    matches!(name, ".DS_Store" | "Thumbs.db" | "desktop.ini") || name.starts_with("._")
}

/// Loads the expected `(key -> (size, etag))` map for the bucket, keys
/// normalized to forward-slash form.
pub fn load_expected_files(
    state: &MigrationStateStore,
    bucket: &str,
) -> Result<BTreeMap<String, ExpectedFile>, MigrationError> {
    println!("  Loading file metadata from database...");
    let mut expected = BTreeMap::new();
    for (key, record) in state.files_for_bucket(bucket)? {
        let normalized = key.replace('\\', "/");
        expected.insert(
            normalized,
            ExpectedFile {
                size: record.size,
                etag: record.etag,
            },
        );
    }
    println!("  Loaded {} file records", expected.len());
    println!();
    Ok(expected)
}

/// Walks the on-disk bucket directory, producing a map from normalized
/// relative path to absolute path.
pub fn scan_local_files(
    local_path: &Path,
    expected_files: u64,
) -> Result<BTreeMap<String, PathBuf>, MigrationError> {
    println!("  Scanning local files...");
    let mut local_files = BTreeMap::new();
    let mut pending: Vec<PathBuf> = vec![local_path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(local_path)
                .expect("walked path is under the scan root");
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
                .replace('\\', "/");
            local_files.insert(key, path);
        }
    }

    let _ = expected_files;
    println!("  Found {} local files", local_files.len());
    println!();
    Ok(local_files)
}

/// Compares the key sets, ignoring system metadata among the extras, and
/// fails with examples when the inventories diverge.
pub fn check_inventory(
    bucket: &str,
    expected: &BTreeMap<String, ExpectedFile>,
    local: &BTreeMap<String, PathBuf>,
) -> Result<(), MigrationError> {
    println!("  Checking file inventory...");

    let missing: Vec<&String> = expected.keys().filter(|key| !local.contains_key(*key)).collect();
    let extra_raw: Vec<&String> = local.keys().filter(|key| !expected.contains_key(*key)).collect();
    let (ignored, extra): (Vec<&String>, Vec<&String>) = extra_raw
        .into_iter()
        .partition(|key| is_system_metadata(key));

    if !ignored.is_empty() {
        println!(
            "  Ignoring {} system metadata file(s) (.DS_Store, Thumbs.db, etc.)",
            ignored.len()
        );
    }

    if missing.is_empty() && extra.is_empty() {
        return Ok(());
    }

    println!("  File inventory mismatch:");
    for key in missing.iter().take(MAX_ERROR_DISPLAY) {
        println!("    - Missing file: {}", key);
    }
    if missing.len() > MAX_ERROR_DISPLAY {
        println!(
            "    - ... and {} more missing files",
            missing.len() - MAX_ERROR_DISPLAY
        );
    }
    for key in extra.iter().take(MAX_ERROR_DISPLAY) {
        println!("    - Extra file (not in cloud): {}", key);
    }
    if extra.len() > MAX_ERROR_DISPLAY {
        println!(
            "    - ... and {} more extra files",
            extra.len() - MAX_ERROR_DISPLAY
        );
    }
    println!();

    Err(MigrationError::InventoryMismatch {
        bucket: bucket.to_string(),
        missing: missing.len(),
        extra: extra.len(),
    })
}
