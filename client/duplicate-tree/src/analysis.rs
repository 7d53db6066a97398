//! Duplicate detection and snapshot fingerprinting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sev_common::progress::ProgressBar;
use sev_state_store::ManifestRow;
use sha2::{Digest, Sha256};

use crate::index::{DirectoryIndex, PathTuple};
use crate::DuplicateTreeError;

/// Clusters below these thresholds are noise for storage reclamation.
pub const MIN_REPORT_FILES: u64 = 2;
pub const MIN_REPORT_BYTES: u64 = 512 * 1024 * 1024;
pub const MIN_DUPLICATE_NODES: usize = 2;

/// Uniquely identifies a manifest snapshot by file count + stream digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanFingerprint {
    pub total_files: u64,
    pub checksum: String,
}

/// A group of directories with identical content signatures.
#[derive(Clone, Debug)]
pub struct DuplicateCluster {
    pub signature: String,
    pub nodes: Vec<NodeRow>,
}

/// Serializable summary of one duplicate directory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeRow {
    pub path: PathTuple,
    pub total_files: u64,
    pub total_size: u64,
}

/// Serializable summary of one cluster, as cached in the state store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClusterRow {
    pub total_files: u64,
    pub total_size: u64,
    pub nodes: Vec<NodeRow>,
}

/// Streams the manifest into a directory index while maintaining the
/// snapshot fingerprint digest.
pub fn build_directory_index(
    rows: &[ManifestRow],
    progress_label: &str,
) -> Result<(DirectoryIndex, ScanFingerprint), DuplicateTreeError> {
    let mut index = DirectoryIndex::new();
    let mut hasher = Sha256::new();
    let mut total_files: u64 = 0;

    let mut progress = ProgressBar::new(rows.len() as u64, progress_label);
    for (processed, row) in rows.iter().enumerate() {
        if row.key.ends_with('/') {
            continue;
        }
        index.add_file(&row.bucket, &row.key, row.size, &row.checksum);
        for value in [
            row.bucket.as_str(),
            row.key.as_str(),
            &row.size.to_string(),
            row.checksum.as_str(),
        ] {
            hasher.update(value.as_bytes());
            hasher.update([0]);
        }
        total_files += 1;
        progress.update(processed as u64 + 1, false);
    }
    progress.finish(None);

    index.finalize()?;
    let fingerprint = ScanFingerprint {
        total_files,
        checksum: hex::encode(hasher.finalize()),
    };
    Ok((index, fingerprint))
}

/// Groups finalized nodes by signature; clusters of one are not duplicates.
pub fn find_exact_duplicates(index: &DirectoryIndex) -> Vec<DuplicateCluster> {
    let mut by_signature: BTreeMap<String, Vec<NodeRow>> = BTreeMap::new();
    for node in index.nodes() {
        let Some(signature) = &node.signature else {
            continue;
        };
        by_signature
            .entry(signature.clone())
            .or_default()
            .push(NodeRow {
                path: node.path.clone(),
                total_files: node.total_files,
                total_size: node.total_size,
            });
    }

    by_signature
        .into_iter()
        .filter(|(_, nodes)| nodes.len() >= MIN_DUPLICATE_NODES)
        .map(|(signature, nodes)| DuplicateCluster { signature, nodes })
        .collect()
}

/// Filters clusters down to nodes meeting the file and size thresholds.
pub fn apply_thresholds(
    clusters: Vec<DuplicateCluster>,
    min_files: u64,
    min_bytes: u64,
) -> Vec<DuplicateCluster> {
    clusters
        .into_iter()
        .filter_map(|cluster| {
            let nodes: Vec<NodeRow> = cluster
                .nodes
                .into_iter()
                .filter(|node| node.total_files > min_files && node.total_size >= min_bytes)
                .collect();
            (nodes.len() >= MIN_DUPLICATE_NODES).then_some(DuplicateCluster {
                signature: cluster.signature,
                nodes,
            })
        })
        .collect()
}

/// Converts clusters to the serializable row format, largest first.
pub fn clusters_to_rows(mut clusters: Vec<DuplicateCluster>) -> Vec<ClusterRow> {
    clusters.sort_by_key(|cluster| {
        std::cmp::Reverse(cluster.nodes.first().map(|n| n.total_size).unwrap_or(0))
    });
    clusters
        .into_iter()
        .filter(|cluster| !cluster.nodes.is_empty())
        .map(|cluster| ClusterRow {
            total_files: cluster.nodes[0].total_files,
            total_size: cluster.nodes[0].total_size,
            nodes: cluster.nodes,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(bucket: &str, key: &str, size: u64, checksum: &str) -> ManifestRow {
        ManifestRow {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            checksum: checksum.to_string(),
        }
    }

    fn sample_rows() -> Vec<ManifestRow> {
        vec![
            row("b", "left/data/f1.bin", 600_000_000, "cs1"),
            row("b", "left/data/f2.bin", 600_000_000, "cs2"),
            row("b", "right/data/f1.bin", 600_000_000, "cs1"),
            row("b", "right/data/f2.bin", 600_000_000, "cs2"),
            row("b", "small/tiny.txt", 1, "cs3"),
        ]
    }

    #[test]
    fn fingerprint_is_stable_across_reruns() {
        let rows = sample_rows();
        let (_, first) = build_directory_index(&rows, "scan").unwrap();
        let (_, second) = build_directory_index(&rows, "scan").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total_files, 5);
    }

    #[test]
    fn fingerprint_changes_with_any_field() {
        let rows = sample_rows();
        let (_, baseline) = build_directory_index(&rows, "scan").unwrap();

        let mut resized = sample_rows();
        resized[0].size += 1;
        let (_, changed) = build_directory_index(&resized, "scan").unwrap();
        assert_ne!(baseline.checksum, changed.checksum);
    }

    #[test]
    fn duplicate_subtrees_form_one_cluster() {
        let (index, _) = build_directory_index(&sample_rows(), "scan").unwrap();
        let clusters = find_exact_duplicates(&index);

        // left/data and right/data match, and so do left and right themselves.
        let paths: Vec<Vec<&str>> = clusters
            .iter()
            .flat_map(|c| c.nodes.iter())
            .map(|n| n.path.iter().map(String::as_str).collect())
            .collect();
        assert!(paths.contains(&vec!["b", "left", "data"]));
        assert!(paths.contains(&vec!["b", "right", "data"]));
    }

    #[test]
    fn thresholds_filter_small_nodes() {
        let (index, _) = build_directory_index(&sample_rows(), "scan").unwrap();
        let clusters = find_exact_duplicates(&index);

        let filtered = apply_thresholds(clusters.clone(), MIN_REPORT_FILES, MIN_REPORT_BYTES);
        assert!(!filtered.is_empty());
        for cluster in &filtered {
            for node in &cluster.nodes {
                assert!(node.total_files > MIN_REPORT_FILES);
                assert!(node.total_size >= MIN_REPORT_BYTES);
            }
        }

        // An impossible threshold filters everything.
        assert!(apply_thresholds(clusters, 1_000, MIN_REPORT_BYTES).is_empty());
    }

    #[test]
    fn rows_are_sorted_by_size_descending() {
        let clusters = vec![
            DuplicateCluster {
                signature: "a".into(),
                nodes: vec![NodeRow {
                    path: vec!["b".into(), "small".into()],
                    total_files: 3,
                    total_size: 10,
                }],
            },
            DuplicateCluster {
                signature: "b".into(),
                nodes: vec![NodeRow {
                    path: vec!["b".into(), "big".into()],
                    total_files: 3,
                    total_size: 100,
                }],
            },
        ];
        let rows = clusters_to_rows(clusters);
        assert_eq!(rows[0].total_size, 100);
        assert_eq!(rows[1].total_size, 10);
    }
}
