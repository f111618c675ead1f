//! Flat staging <-> hierarchical tree objects (§4.4).
//!
//! Grounded on `libbit::obj::tree`'s recursive tree-writer, generalized from
//! the teacher's single-hash `TreeEntry` to this spec's three-alternative
//! entry (`blob_hash` / `entity_list_hash` / `subtree_hash`).

use crate::error::Result;
use crate::hash::Hash;
use crate::index::{Staging, StagingEntry};
use crate::object::{FileMode, Tree, TreeEntry};
use crate::store::ObjectStore;
use std::collections::BTreeMap;

/// Builds the tree hierarchy from a flat staging map and returns the root hash.
pub fn build_tree<S: ObjectStore>(store: &S, staging: &Staging) -> Result<Hash> {
    let entries: Vec<(&str, &StagingEntry)> = staging.entries.iter().map(|(p, e)| (p.as_str(), e)).collect();
    build_subtree(store, &entries, "")
}

fn build_subtree<S: ObjectStore>(store: &S, entries: &[(&str, &StagingEntry)], prefix: &str) -> Result<Hash> {
    // direct-child files at this level, keyed by their basename
    let mut files: BTreeMap<&str, &StagingEntry> = BTreeMap::new();
    // immediate subdirectory name -> entries that live under it (suffix path)
    let mut subdirs: BTreeMap<&str, Vec<(&str, &StagingEntry)>> = BTreeMap::new();

    for &(path, entry) in entries {
        let rest = match prefix.is_empty() {
            true => path,
            false => match path.strip_prefix(prefix).and_then(|s| s.strip_prefix('/')) {
                Some(r) => r,
                None => continue,
            },
        };
        match rest.split_once('/') {
            None => {
                files.insert(rest, entry);
            }
            Some((dir, _)) => {
                subdirs.entry(dir).or_default().push((path, entry));
            }
        }
    }

    let mut names: Vec<&str> = files.keys().copied().chain(subdirs.keys().copied()).collect();
    names.sort_unstable();
    names.dedup();

    let mut tree = Tree::default();
    for name in names {
        // a name present as both a file and a directory resolves as a file
        if let Some(entry) = files.get(name) {
            let blob_hash = entry.blob_hash;
            let mode = entry.mode;
            tree.entries.push(TreeEntry::file(name, mode, blob_hash, entry.entity_list_hash));
        } else if let Some(children) = subdirs.get(name) {
            let child_prefix = if prefix.is_empty() { name.to_owned() } else { format!("{prefix}/{name}") };
            let subtree_hash = build_subtree(store, children, &child_prefix)?;
            tree.entries.push(TreeEntry::dir(name, subtree_hash));
        }
    }
    tree.entries.sort();
    store.write_tree(&tree)
}

/// Pre-order DFS over `tree_hash`, joining path segments with `/` and no
/// cleaning — a child literally named `..` round-trips verbatim.
pub fn flatten_tree<S: ObjectStore>(store: &S, tree_hash: Hash) -> Result<Vec<FlatEntry>> {
    let mut out = Vec::new();
    flatten_into(store, tree_hash, "", &mut out)?;
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    pub path: String,
    pub blob_hash: Hash,
    pub entity_list_hash: Option<Hash>,
    pub mode: FileMode,
}

fn flatten_into<S: ObjectStore>(store: &S, tree_hash: Hash, prefix: &str, out: &mut Vec<FlatEntry>) -> Result<()> {
    let tree = store.read_tree(tree_hash)?;
    for entry in &tree.entries {
        let path = if prefix.is_empty() { entry.name.clone() } else { format!("{prefix}/{}", entry.name) };
        if entry.is_dir {
            flatten_into(store, entry.subtree_hash.expect("dir entry missing subtree_hash"), &path, out)?;
        } else {
            out.push(FlatEntry {
                path,
                blob_hash: entry.blob_hash.expect("file entry missing blob_hash"),
                entity_list_hash: entry.entity_list_hash,
                mode: entry.mode,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsObjectStore;

    fn store(dir: &std::path::Path) -> FsObjectStore {
        crate::store::ensure_object_dirs(dir).unwrap();
        FsObjectStore::new(dir)
    }

    fn entry(data: &[u8]) -> StagingEntry {
        StagingEntry {
            path: String::new(),
            blob_hash: crate::hash::hash_object("blob", data),
            entity_list_hash: None,
            mode: FileMode::File,
            conflict: false,
            base_blob_hash: None,
            ours_blob_hash: None,
            theirs_blob_hash: None,
            mod_time: 0,
            size: data.len() as i64,
        }
    }

    #[test]
    fn flatten_after_build_equals_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut staging = Staging::default();
        staging.entries.insert("a.txt".into(), entry(b"a"));
        staging.entries.insert("dir/b.txt".into(), entry(b"b"));
        staging.entries.insert("dir/sub/c.txt".into(), entry(b"c"));

        let root = build_tree(&store, &staging).unwrap();
        let mut flat = flatten_tree(&store, root).unwrap();
        flat.sort_by(|a, b| a.path.cmp(&b.path));

        let mut expected: Vec<(String, Hash)> =
            staging.entries.iter().map(|(p, e)| (p.clone(), e.blob_hash)).collect();
        expected.sort();

        assert_eq!(flat.len(), expected.len());
        for (f, (path, hash)) in flat.iter().zip(expected.iter()) {
            assert_eq!(&f.path, path);
            assert_eq!(&f.blob_hash, hash);
        }
    }

    #[test]
    fn file_wins_over_directory_name_collision() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut staging = Staging::default();
        staging.entries.insert("x".into(), entry(b"file"));
        staging.entries.insert("x/y".into(), entry(b"nested"));

        let root = build_tree(&store, &staging).unwrap();
        let tree = store.read_tree(root).unwrap();
        assert_eq!(tree.entries.len(), 1);
        assert!(!tree.entries[0].is_dir);
    }

    #[test]
    fn entries_are_sorted_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut staging = Staging::default();
        staging.entries.insert("zebra.txt".into(), entry(b"z"));
        staging.entries.insert("apple.txt".into(), entry(b"a"));
        let root = build_tree(&store, &staging).unwrap();
        let tree = store.read_tree(root).unwrap();
        let names: Vec<&str> = tree.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["apple.txt", "zebra.txt"]);
    }
}
