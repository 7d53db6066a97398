//! Human-readable rendering of duplicate clusters.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use sev_common::format::format_bytes;

use crate::analysis::{ClusterRow, NodeRow};

/// Renders cluster rows as the terminal report.
pub fn render_report_rows(cluster_rows: &[ClusterRow], base_path: &Path) -> String {
    let mut out = String::new();
    if cluster_rows.is_empty() {
        out.push_str("No exact duplicate directories found.\n");
        return out;
    }

    out.push('\n');
    let _ = writeln!(out, "{}", "=".repeat(70));
    let _ = writeln!(out, "EXACT DUPLICATE TREES");
    let _ = writeln!(out, "{}", "=".repeat(70));
    for (idx, cluster) in cluster_rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] {} files, {}",
            idx + 1,
            cluster.total_files,
            format_bytes(cluster.total_size)
        );
        for node in sort_node_rows(&cluster.nodes) {
            let _ = writeln!(
                out,
                "  - {:>12}  {}",
                format_bytes(node.total_size),
                path_on_disk(base_path, &node.path).display()
            );
        }
        out.push('\n');
    }
    out
}

/// Size descending, then path, for deterministic output.
fn sort_node_rows(nodes: &[NodeRow]) -> Vec<&NodeRow> {
    let mut sorted: Vec<&NodeRow> = nodes.iter().collect();
    sorted.sort_by(|a, b| {
        b.total_size
            .cmp(&a.total_size)
            .then_with(|| a.path.cmp(&b.path))
    });
    sorted
}

/// Where a node's directory lives on disk.
fn path_on_disk(base_path: &Path, node_path: &[String]) -> PathBuf {
    let mut path = base_path.to_path_buf();
    for segment in node_path {
        path.push(segment);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_says_so() {
        let report = render_report_rows(&[], Path::new("/mnt/backup"));
        assert!(report.contains("No exact duplicate directories found"));
    }

    #[test]
    fn report_lists_nodes_under_base_path() {
        let rows = vec![ClusterRow {
            total_files: 3,
            total_size: 700_000_000,
            nodes: vec![
                NodeRow {
                    path: vec!["b".into(), "left".into()],
                    total_files: 3,
                    total_size: 700_000_000,
                },
                NodeRow {
                    path: vec!["b".into(), "right".into()],
                    total_files: 3,
                    total_size: 700_000_000,
                },
            ],
        }];
        let report = render_report_rows(&rows, Path::new("/mnt/backup"));
        assert!(report.contains("EXACT DUPLICATE TREES"));
        assert!(report.contains("/mnt/backup/b/left"));
        assert!(report.contains("/mnt/backup/b/right"));
    }
}
