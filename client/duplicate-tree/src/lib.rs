//! Duplicate directory detection over the migration manifest.
//!
//! After a migration lands every object on disk, the manifest in the state
//! store describes the whole tree. This crate builds an in-memory directory
//! index from that manifest, computes a bottom-up content signature per
//! directory, and reports groups of directories whose signatures are equal:
//! exact duplicate subtrees. Results are cached in the state store, keyed by
//! a snapshot fingerprint, so re-running against an unchanged manifest is
//! instant.

mod analysis;
mod index;
mod report;
mod workflow;

pub use analysis::{
    apply_thresholds, build_directory_index, clusters_to_rows, find_exact_duplicates, ClusterRow,
    DuplicateCluster, NodeRow, ScanFingerprint, MIN_DUPLICATE_NODES, MIN_REPORT_BYTES,
    MIN_REPORT_FILES,
};
pub use index::{DirectoryIndex, DirectoryNode, PathTuple};
pub use report::render_report_rows;
pub use workflow::{run_duplicate_analysis, DuplicateAnalysisContext};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DuplicateTreeError {
    #[error(transparent)]
    State(#[from] sev_state_store::StateStoreError),

    /// A child directory had no signature during finalize; the index was not
    /// built bottom-up correctly.
    #[error("child {0:?} missing signature during finalize")]
    ChildSignatureMissing(Vec<String>),

    #[error("cached report payload is not valid JSON: {0}")]
    CorruptCache(#[from] serde_json::Error),
}
