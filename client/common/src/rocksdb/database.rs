//! Opening RocksDB databases against a schema history.

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use std::path::Path;
use tracing::debug;

use super::migrations::{SchemaError, SchemaHistory, SCHEMA_META_CF};

/// Opens (or creates) a database and brings it up to `history`.
///
/// RocksDB insists that every existing column family is opened, including
/// retired ones, so the open set is the union of what is on disk and what the
/// current schema declares (plus the schema-meta family). Families the
/// current schema added since the database was created are created here
/// transparently; families the history retired are dropped right after the
/// open by [`SchemaHistory::apply`].
pub fn open_database(
    path: &str,
    current_schema_cfs: &[&str],
    history: &SchemaHistory,
) -> Result<DB, SchemaError> {
    for name in current_schema_cfs {
        if *name == SCHEMA_META_CF || history.is_retired(name) {
            return Err(SchemaError::ReservedColumnFamily(name.to_string()));
        }
    }

    let existing = discover_existing_cfs(path)?;
    let all_cfs = union_column_families(&existing, current_schema_cfs);
    debug!(path, column_families = ?all_cfs, "Opening database");

    let descriptors: Vec<ColumnFamilyDescriptor> = all_cfs
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect();
    let mut db = DB::open_cf_descriptors(&db_options(), path, descriptors)?;

    history.apply(&mut db)?;
    Ok(db)
}

/// The union of on-disk and current-schema column families, sorted, always
/// including the schema-meta family. Retired families are intentionally kept
/// in the open set; dropping them is the history's job, after the open.
pub fn union_column_families(existing: &[String], current_schema_cfs: &[&str]) -> Vec<String> {
    let mut all: Vec<String> = existing.to_vec();
    for name in current_schema_cfs {
        all.push(name.to_string());
    }
    all.push(SCHEMA_META_CF.to_string());
    all.sort();
    all.dedup();
    all
}

/// Lists the column families of an existing database, or returns an empty
/// list for a fresh directory.
///
/// RocksDB always maintains a CURRENT marker for an initialized database. A
/// directory that has RocksDB files but no CURRENT is a half-written or
/// damaged database; reinitializing over it would silently discard whatever
/// it held, so that case is an error.
fn discover_existing_cfs(path: &str) -> Result<Vec<String>, SchemaError> {
    let db_path = Path::new(path);
    if db_path.join("CURRENT").exists() {
        return Ok(DB::list_cf(&db_options(), path)?);
    }

    let has_rocksdb_files = std::fs::read_dir(db_path)
        .map(|entries| {
            entries.flatten().any(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.ends_with(".sst")
                    || name.ends_with(".log")
                    || name.starts_with("MANIFEST")
                    || name.starts_with("OPTIONS")
                    || name == "IDENTITY"
            })
        })
        .unwrap_or(false);
    if has_rocksdb_files {
        return Err(SchemaError::MissingCurrentMarker(path.to_string()));
    }

    debug!(path, "No CURRENT marker, treating as a new database");
    Ok(Vec::new())
}

fn db_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    opts
}
