//! Shared infrastructure for the s3-evac migration engine.
//!
//! This crate hosts the pieces every other crate leans on: the typed RocksDB
//! storage framework ([`typed_store`]), database opening with schema-history
//! upgrades ([`rocksdb`]), and small terminal helpers ([`format`],
//! [`progress`]).

pub mod format;
pub mod progress;
pub mod rocksdb;
pub mod typed_store;
