//! Load-or-compute workflow around the cached duplicate analysis.

use std::path::PathBuf;

use chrono::Utc;
use sev_state_store::{CachedDuplicateReport, DuplicateCacheKey, MigrationStateStore};
use tracing::info;

use crate::analysis::{
    apply_thresholds, build_directory_index, clusters_to_rows, find_exact_duplicates, ClusterRow,
    ScanFingerprint,
};
use crate::report::render_report_rows;
use crate::DuplicateTreeError;

/// Parameters of one duplicate analysis run.
#[derive(Clone, Debug)]
pub struct DuplicateAnalysisContext {
    /// Where the migrated buckets live on disk; only used to render paths.
    pub base_path: PathBuf,
    pub min_files: u64,
    pub min_bytes: u64,
    pub use_cache: bool,
}

fn cache_key(context: &DuplicateAnalysisContext, fingerprint: &ScanFingerprint) -> DuplicateCacheKey {
    DuplicateCacheKey {
        fingerprint: fingerprint.checksum.clone(),
        min_files: context.min_files,
        min_bytes: context.min_bytes,
        base_path: context.base_path.display().to_string(),
    }
}

/// Runs the analysis against the state store, honoring the cache when its
/// snapshot still matches, and returns the cluster rows plus the rendered
/// report.
pub fn run_duplicate_analysis(
    store: &MigrationStateStore,
    context: &DuplicateAnalysisContext,
) -> Result<(Vec<ClusterRow>, String), DuplicateTreeError> {
    let rows = store.manifest_rows()?;
    let (index, fingerprint) = build_directory_index(&rows, "Scanning files")?;

    if context.use_cache {
        let key = cache_key(context, &fingerprint);
        if let Some(cached) = store.load_duplicate_cache(&key, fingerprint.total_files)? {
            info!(
                generated_at = %cached.generated_at,
                total_files = cached.total_files,
                "Using cached duplicate analysis"
            );
            let cluster_rows: Vec<ClusterRow> = serde_json::from_str(&cached.report_json)?;
            let report = render_report_rows(&cluster_rows, &context.base_path);
            return Ok((cluster_rows, report));
        }
    }

    let clusters = find_exact_duplicates(&index);
    let clusters = apply_thresholds(clusters, context.min_files, context.min_bytes);
    let cluster_rows = clusters_to_rows(clusters);
    let report = render_report_rows(&cluster_rows, &context.base_path);

    if context.use_cache {
        let key = cache_key(context, &fingerprint);
        store.store_duplicate_cache(
            &key,
            &CachedDuplicateReport {
                total_files: fingerprint.total_files,
                generated_at: Utc::now().to_rfc3339(),
                report_json: serde_json::to_string(&cluster_rows)?,
            },
        )?;
    }

    Ok((cluster_rows, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sev_state_store::FileMetadata;
    use tempfile::TempDir;

    fn seeded_store(tmp: &TempDir) -> MigrationStateStore {
        let store = MigrationStateStore::open(tmp.path()).unwrap();
        for (key, checksum) in [
            ("left/data/f1.bin", "cs1"),
            ("left/data/f2.bin", "cs2"),
            ("right/data/f1.bin", "cs1"),
            ("right/data/f2.bin", "cs2"),
        ] {
            store
                .add_file(&FileMetadata {
                    bucket: "b".to_string(),
                    key: key.to_string(),
                    size: 600_000_000,
                    etag: checksum.to_string(),
                    storage_class: "STANDARD".to_string(),
                    last_modified: "2024-01-01T00:00:00Z".to_string(),
                })
                .unwrap();
        }
        store
    }

    fn context(use_cache: bool) -> DuplicateAnalysisContext {
        DuplicateAnalysisContext {
            base_path: PathBuf::from("/mnt/backup"),
            min_files: 1,
            min_bytes: 1,
            use_cache,
        }
    }

    #[test]
    fn analysis_finds_duplicate_directories() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp);

        let (rows, report) = run_duplicate_analysis(&store, &context(false)).unwrap();
        assert!(!rows.is_empty());
        assert!(report.contains("left"));
        assert!(report.contains("right"));
    }

    #[test]
    fn second_run_hits_the_cache_and_agrees() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp);

        let (fresh, _) = run_duplicate_analysis(&store, &context(true)).unwrap();
        let (cached, _) = run_duplicate_analysis(&store, &context(true)).unwrap();
        assert_eq!(fresh, cached);
    }

    #[test]
    fn manifest_change_invalidates_the_cache() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp);

        let (before, _) = run_duplicate_analysis(&store, &context(true)).unwrap();

        store
            .add_file(&FileMetadata {
                bucket: "b".to_string(),
                key: "right/data/extra.bin".to_string(),
                size: 600_000_000,
                etag: "cs9".to_string(),
                storage_class: "STANDARD".to_string(),
                last_modified: "2024-01-01T00:00:00Z".to_string(),
            })
            .unwrap();

        // right/data gained a file, so the trees no longer match.
        let (after, _) = run_duplicate_analysis(&store, &context(true)).unwrap();
        assert_ne!(before, after);
    }
}
