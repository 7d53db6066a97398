//! RocksDB opening and schema-history support.
//!
//! - [`database`]: opening a database against a declared schema history
//! - [`migrations`]: the history model itself (retired column families and
//!   the version stamp)

mod database;
mod migrations;


pub use database::{open_database, union_column_families};
pub use migrations::{SchemaError, SchemaHistory, SchemaStep, SCHEMA_META_CF};
