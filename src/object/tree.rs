//! Trees: ordered lists of entries, sorted ascending by name at builder boundaries.
//!
//! Adapted from `libbit::obj::tree` (`Tree`/`TreeEntry`, `Ord` over a
//! trailing-slash sort key) to this spec's attribute set (`blob_hash`,
//! `entity_list_hash`, `subtree_hash` as alternatives rather than a single `hash`).

use crate::hash::Hash;
use crate::object::FileMode;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub is_dir: bool,
    pub mode: FileMode,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub blob_hash: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entity_list_hash: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subtree_hash: Option<Hash>,
}

impl TreeEntry {
    pub fn file(name: impl Into<String>, mode: FileMode, blob_hash: Hash, entity_list_hash: Option<Hash>) -> Self {
        Self { name: name.into(), is_dir: false, mode, blob_hash: Some(blob_hash), entity_list_hash, subtree_hash: None }
    }

    pub fn dir(name: impl Into<String>, subtree_hash: Hash) -> Self {
        Self { name: name.into(), is_dir: true, mode: FileMode::Dir, blob_hash: None, entity_list_hash: None, subtree_hash: Some(subtree_hash) }
    }

    /// Files sort before directories of the same name, matching the
    /// teacher's "append a trailing slash before comparing" trick.
    fn sort_key(&self) -> String {
        if self.is_dir { format!("{}/", self.name) } else { self.name.clone() }
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}
