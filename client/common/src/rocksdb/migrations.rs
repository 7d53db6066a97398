//! Schema history for RocksDB-backed stores.
//!
//! Every schema change the stores in this workspace have ever made is of one
//! kind: a column family is retired and its data discarded. That shape allows
//! a much simpler upgrade model than general migrations. A store declares its
//! whole history as a static list of [`SchemaStep`]s, and bringing a database
//! up to date is a single idempotent sweep: drop every retired family that
//! still exists, then stamp the latest version.
//!
//! Because the sweep does not care what the recorded version says, it also
//! repairs databases where a crash landed between a drop and the version
//! stamp, and databases where tampering resurrected a retired family. The
//! recorded version exists for one reason only: refusing to open a database
//! written by a newer build.
//!
//! RocksDB itself forces the awkward part. A database can only be opened
//! read-write with *all* of its existing column families, so a retired family
//! must still be opened before it can be dropped; the open path in
//! [`database`](super::database) handles that by unioning the on-disk
//! families with the current schema.

use rocksdb::DB;
use thiserror::Error;
use tracing::{debug, info};

/// Column family holding the schema version stamp. Reserved; stores must not
/// declare it in their current schema.
pub const SCHEMA_META_CF: &str = "schema_meta";

const VERSION_KEY: &[u8] = b"version";

/// Errors from opening or upgrading a store's database.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// An error from RocksDB itself.
    #[error("RocksDB error: {0}")]
    Backend(#[from] rocksdb::Error),

    /// An I/O error while preparing the database directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored version stamp could not be decoded.
    #[error("unreadable schema version stamp: {0}")]
    BadVersionStamp(String),

    /// The database was written by a newer build. Opening it here could
    /// resurrect retired data, so refuse.
    #[error(
        "state database is at schema v{stored}, but this build only understands up to v{supported}"
    )]
    NewerThanSupported { stored: u32, supported: u32 },

    /// A store declared a column family name that is reserved or was retired
    /// by an earlier step. Retired names stay reserved forever so old data
    /// can never be mistaken for new.
    #[error("column family '{0}' clashes with the schema history and cannot be used")]
    ReservedColumnFamily(String),

    /// The directory holds RocksDB files but no CURRENT marker, which
    /// RocksDB always writes. Treat as corruption rather than reinitialize
    /// over it.
    #[error(
        "database directory '{0}' has RocksDB files but no CURRENT marker; \
         it looks corrupted, not fresh"
    )]
    MissingCurrentMarker(String),
}

/// One step of a store's schema history: reaching `version` retires the
/// listed column families.
pub struct SchemaStep {
    pub version: u32,
    pub retires: &'static [&'static str],
    pub note: &'static str,
}

/// A store's complete, append-only schema history, declared in version order.
pub struct SchemaHistory {
    steps: &'static [SchemaStep],
}

impl SchemaHistory {
    pub const fn new(steps: &'static [SchemaStep]) -> Self {
        Self { steps }
    }

    /// A history with no steps, for stores that have never changed schema.
    /// Opening a database stamped at a later version still fails, which is
    /// exactly the protection a schema-less build needs.
    pub const fn empty() -> Self {
        Self { steps: &[] }
    }

    /// The version a fully upgraded database carries.
    pub fn latest_version(&self) -> u32 {
        self.steps.last().map(|step| step.version).unwrap_or(0)
    }

    /// Whether `name` was retired by any step. Retired names are reserved
    /// permanently.
    pub fn is_retired(&self, name: &str) -> bool {
        self.steps
            .iter()
            .any(|step| step.retires.contains(&name))
    }

    /// Reads the version stamp, `None` for a database that has never been
    /// stamped.
    pub fn read_version(db: &DB) -> Result<Option<u32>, SchemaError> {
        let Some(cf) = db.cf_handle(SCHEMA_META_CF) else {
            return Ok(None);
        };
        match db.get_cf(&cf, VERSION_KEY)? {
            Some(bytes) => {
                let stamp: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    SchemaError::BadVersionStamp(format!("{} bytes, expected 4", bytes.len()))
                })?;
                Ok(Some(u32::from_le_bytes(stamp)))
            }
            None => Ok(None),
        }
    }

    fn stamp_version(db: &DB, version: u32) -> Result<(), SchemaError> {
        let cf = db.cf_handle(SCHEMA_META_CF).ok_or_else(|| {
            SchemaError::BadVersionStamp(format!("column family '{}' missing", SCHEMA_META_CF))
        })?;
        db.put_cf(&cf, VERSION_KEY, version.to_le_bytes())?;
        Ok(())
    }

    /// Brings an open database up to this history.
    ///
    /// The sweep drops every retired family still present, regardless of the
    /// recorded version; drops are independent operations in RocksDB (no
    /// atomic batch exists for them), so idempotence is what makes a crash
    /// mid-upgrade harmless. Returns the version the database ends at.
    pub fn apply(&self, db: &mut DB) -> Result<u32, SchemaError> {
        let stored = Self::read_version(db)?.unwrap_or(0);
        let supported = self.latest_version();
        if stored > supported {
            return Err(SchemaError::NewerThanSupported { stored, supported });
        }

        for step in self.steps {
            for name in step.retires {
                if db.cf_handle(name).is_some() {
                    info!(
                        version = step.version,
                        column_family = name,
                        note = step.note,
                        "Dropping retired column family"
                    );
                    db.drop_cf(name)?;
                }
            }
        }

        if stored < supported {
            Self::stamp_version(db, supported)?;
            info!(from = stored, to = supported, "Schema upgraded");
        } else {
            debug!(version = stored, "Schema already current");
        }
        Ok(supported)
    }
}
