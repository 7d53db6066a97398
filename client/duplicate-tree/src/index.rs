//! In-memory directory index built from the migration manifest.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use crate::DuplicateTreeError;

/// Identity of a directory: `(bucket, segment, segment, …)`.
pub type PathTuple = Vec<String>;

/// File metadata tracked for duplicate comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedFile {
    pub name: String,
    pub size: u64,
    pub checksum: String,
}

/// One directory of the index.
#[derive(Clone, Debug, Default)]
pub struct DirectoryNode {
    pub path: PathTuple,
    pub files: Vec<IndexedFile>,
    pub children: BTreeSet<PathTuple>,
    pub direct_size: u64,
    pub direct_files: u64,
    pub total_size: u64,
    pub total_files: u64,
    /// Content signature, set by [`DirectoryIndex::finalize`]. Two nodes with
    /// equal signatures are exact duplicate subtrees.
    pub signature: Option<String>,
}

/// Flat map of path tuples to directory nodes.
///
/// The tree is a DAG rooted at the virtual empty tuple; child links are
/// ordinary value keys into the map, so finalization is a post-order walk
/// with no parent pointers and no cycles.
#[derive(Default)]
pub struct DirectoryIndex {
    nodes: BTreeMap<PathTuple, DirectoryNode>,
}

impl DirectoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one manifest entry. The key's `/` segments become directory
    /// levels under the bucket; the last segment is the file name.
    pub fn add_file(&mut self, bucket: &str, key: &str, size: u64, checksum: &str) {
        let mut segments: Vec<String> = key
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        let name = match segments.pop() {
            Some(name) => name,
            None => return,
        };

        let mut dir_path: PathTuple = Vec::with_capacity(segments.len() + 1);
        dir_path.push(bucket.to_string());
        dir_path.extend(segments);

        // Materialize the ancestor chain and link children.
        for depth in 1..=dir_path.len() {
            let ancestor = dir_path[..depth].to_vec();
            let node = self.nodes.entry(ancestor.clone()).or_insert_with(|| {
                DirectoryNode {
                    path: ancestor.clone(),
                    ..Default::default()
                }
            });
            if depth < dir_path.len() {
                let child = dir_path[..depth + 1].to_vec();
                node.children.insert(child);
            }
        }

        let node = self
            .nodes
            .get_mut(&dir_path)
            .expect("ancestor chain materialized above");
        node.files.push(IndexedFile {
            name,
            size,
            checksum: checksum.to_string(),
        });
        node.direct_files += 1;
        node.direct_size += size;
    }

    /// Computes totals and signatures bottom-up.
    ///
    /// A node's signature hashes its sorted file tuples and its sorted
    /// `(child name, child signature)` pairs, so two directories hash equal
    /// exactly when their entire subtrees match by name, size and checksum.
    pub fn finalize(&mut self) -> Result<(), DuplicateTreeError> {
        let mut paths: Vec<PathTuple> = self.nodes.keys().cloned().collect();
        // Deepest first: children are always finalized before their parent.
        paths.sort_by_key(|path| std::cmp::Reverse(path.len()));

        for path in paths {
            let node = self.nodes.get(&path).expect("path taken from the map");

            let mut total_size = node.direct_size;
            let mut total_files = node.direct_files;
            let mut child_entries: Vec<(String, String)> = Vec::with_capacity(node.children.len());
            for child_path in &node.children {
                let child = self
                    .nodes
                    .get(child_path)
                    .ok_or_else(|| DuplicateTreeError::ChildSignatureMissing(child_path.clone()))?;
                let signature = child.signature.clone().ok_or_else(|| {
                    DuplicateTreeError::ChildSignatureMissing(child_path.clone())
                })?;
                total_size += child.total_size;
                total_files += child.total_files;
                let child_name = child_path.last().cloned().unwrap_or_default();
                child_entries.push((child_name, signature));
            }
            child_entries.sort();

            let mut files: Vec<&IndexedFile> = node.files.iter().collect();
            files.sort_by(|a, b| a.name.cmp(&b.name));

            let mut hasher = Sha256::new();
            for file in files {
                hasher.update(b"F");
                hasher.update(file.name.as_bytes());
                hasher.update([0]);
                hasher.update(file.size.to_string().as_bytes());
                hasher.update([0]);
                hasher.update(file.checksum.as_bytes());
                hasher.update([0]);
            }
            for (child_name, signature) in child_entries {
                hasher.update(b"D");
                hasher.update(child_name.as_bytes());
                hasher.update([0]);
                hasher.update(signature.as_bytes());
                hasher.update([0]);
            }
            let signature = hex::encode(hasher.finalize());

            let node = self.nodes.get_mut(&path).expect("path taken from the map");
            node.total_size = total_size;
            node.total_files = total_files;
            node.signature = Some(signature);
        }

        Ok(())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DirectoryNode> {
        self.nodes.values()
    }

    pub fn get(&self, path: &PathTuple) -> Option<&DirectoryNode> {
        self.nodes.get(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
