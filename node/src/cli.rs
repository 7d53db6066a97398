//! Command line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "s3-evac")]
#[command(
    about = "Evacuate object-store buckets onto local disk, verify byte-for-byte, then delete the originals",
    long_about = None
)]
pub struct Args {
    /// Command to execute (default: run or resume the migration)
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the local destination directory
    #[arg(long, env = "SEV_LOCAL_BASE_PATH")]
    pub base_path: Option<PathBuf>,

    /// Override the state database path
    #[arg(long, env = "SEV_STATE_DB_PATH")]
    pub state_db: Option<PathBuf>,

    /// Run an end-to-end smoke test instead of a migration
    #[arg(long)]
    pub test: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the current phase and per-bucket progress
    Status,
    /// Recreate the state database empty (local files are not touched)
    Reset,
    /// Rebuild the state database by scanning the local drive layout, for
    /// recovery when the database was lost after data landed on disk
    Reseed,
    /// Report exact-duplicate directory subtrees in the migrated data
    Duplicates {
        /// Only report directories with more than this many files
        #[arg(long)]
        min_files: Option<u64>,
        /// Only report directories of at least this many bytes
        #[arg(long)]
        min_bytes: Option<u64>,
        /// Recompute even when a cached report matches the snapshot
        #[arg(long)]
        no_cache: bool,
    },
}
