//! Entity continuity: resolving the same logical entity across a commit
//! boundary even when its path or ordinal shifts (§4.7).
//!
//! Grounded on `libbit::core`'s per-repo lazy caches (the teacher caches
//! parsed trees and blobs by hash under a single repo context); this module
//! applies the same "cache per commit, short-circuit on repeat lookups"
//! shape to entity lists and their contained entities.

use crate::error::Result;
use crate::hash::Hash;
use crate::mergebase::changed_candidate_paths;
use crate::object::{Entity, EntityList};
use crate::store::ObjectStore;
use crate::tree_builder::{flatten_tree, FlatEntry};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// A locator into a commit's entity space: a file path plus the entity's
/// stable identity key within that file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub path: String,
    pub key: String,
}

impl Locator {
    pub fn parse(selector: &str) -> Result<Self> {
        let selector = selector.trim();
        let (path, key) = selector
            .split_once("::")
            .ok_or_else(|| crate::error::Error::InvalidSelector { value: selector.to_owned() })?;
        let (path, key) = (path.trim(), key.trim());
        if path.is_empty() || key.is_empty() {
            return Err(crate::error::Error::InvalidSelector { value: selector.to_owned() });
        }
        Ok(Self { path: path.to_owned(), key: key.to_owned() })
    }
}

/// Memoizes per-path entity lists and entities for a single commit.
#[derive(Default)]
pub struct CommitEntityCache {
    /// path -> (entity list, keyed entities)
    by_path: Mutex<BTreeMap<String, Option<Vec<(String, Entity)>>>>,
}

impl CommitEntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn load_path<S: ObjectStore>(&self, store: &S, tree: &BTreeMap<String, FlatEntry>, path: &str) -> Result<Option<Vec<(String, Entity)>>> {
        if let Some(cached) = self.by_path.lock().unwrap().get(path) {
            return Ok(cached.clone());
        }
        let result = match tree.get(path).and_then(|e| e.entity_list_hash) {
            Some(list_hash) => {
                let list: EntityList = store.read_entity_list(list_hash)?;
                let mut keyed = Vec::with_capacity(list.entity_refs.len());
                let mut ordinals: BTreeMap<(String, String, String, String), usize> = BTreeMap::new();
                for hash in &list.entity_refs {
                    let entity: Entity = store.read_entity(*hash)?;
                    let triple = (
                        format!("{:?}", entity.kind),
                        entity.decl_kind.clone(),
                        entity.receiver.clone().unwrap_or_default(),
                        entity.name.clone(),
                    );
                    let ordinal = ordinals.entry(triple).or_insert(0);
                    let key = entity.identity_key(*ordinal);
                    *ordinal += 1;
                    keyed.push((key, entity));
                }
                Some(keyed)
            }
            None => None,
        };
        self.by_path.lock().unwrap().insert(path.to_owned(), result.clone());
        Ok(result)
    }

    pub fn entity_at<S: ObjectStore>(
        &self,
        store: &S,
        tree: &BTreeMap<String, FlatEntry>,
        locator: &Locator,
    ) -> Result<Option<Entity>> {
        let entries = self.load_path(store, tree, &locator.path)?;
        Ok(entries.and_then(|entries| entries.into_iter().find(|(k, _)| k == &locator.key).map(|(_, e)| e)))
    }
}

/// Resolves `current`'s entity in `parent_tree`, applying the fallback ladder
/// of §4.7: exact locator, then same-file uniqueness by body hash or
/// normalized signature, then cross-file uniqueness restricted to same-
/// extension changed paths.
pub fn resolve_parent_entity<S: ObjectStore>(
    store: &S,
    cache: &CommitEntityCache,
    current: &Locator,
    current_entity: &Entity,
    current_tree: &BTreeMap<String, FlatEntry>,
    parent_tree: &BTreeMap<String, FlatEntry>,
) -> Result<Option<(Locator, Entity)>> {
    if let Some(found) = cache.entity_at(store, parent_tree, current)? {
        return Ok(Some((current.clone(), found)));
    }

    if current_entity.kind != crate::object::EntityKind::Declaration {
        return Ok(None);
    }

    if let Some(list) = cache.load_path(store, parent_tree, &current.path)? {
        if let Some(found) = unique_same_file_match(&list, current_entity) {
            return Ok(Some((Locator { path: current.path.clone(), key: found.0.clone() }, found.1)));
        }
    }

    let candidates = changed_candidate_paths(
        &parent_tree.iter().map(|(p, e)| (p.clone(), e.blob_hash)).collect(),
        &current_tree.iter().map(|(p, e)| (p.clone(), e.blob_hash)).collect(),
    );
    let ext = extension_of(&current.path);
    let mut union: Vec<(String, Entity)> = Vec::new();
    for path in &candidates {
        if path == &current.path {
            continue;
        }
        if extension_of(path) != ext {
            continue;
        }
        if let Some(list) = cache.load_path(store, parent_tree, path)? {
            union.extend(list.into_iter().map(|(k, e)| (format!("{path}::{k}"), e)));
        }
    }
    if let Some((full_key, entity)) = unique_cross_file_match(&union, current_entity) {
        let (path, key) = full_key.split_once("::").unwrap();
        return Ok(Some((Locator { path: path.to_owned(), key: key.to_owned() }, entity)));
    }

    Ok(None)
}

fn unique_same_file_match(list: &[(String, Entity)], current: &Entity) -> Option<(String, Entity)> {
    let by_body: Vec<&(String, Entity)> = list
        .iter()
        .filter(|(_, e)| e.kind == current.kind && e.decl_kind == current.decl_kind && e.receiver == current.receiver && e.body_hash == current.body_hash)
        .collect();
    if by_body.len() == 1 {
        return Some(by_body[0].clone());
    }
    let by_sig: Vec<&(String, Entity)> = list
        .iter()
        .filter(|(_, e)| {
            e.kind == current.kind
                && e.decl_kind == current.decl_kind
                && e.receiver == current.receiver
                && e.normalized_signature() == current.normalized_signature()
        })
        .collect();
    if by_sig.len() == 1 {
        return Some(by_sig[0].clone());
    }
    None
}

fn unique_cross_file_match(union: &[(String, Entity)], current: &Entity) -> Option<(String, Entity)> {
    unique_same_file_match(union, current)
}

fn extension_of(path: &str) -> String {
    path.rsplit('.').next().map(|s| s.to_lowercase()).unwrap_or_default()
}

/// Loads a commit's tree as a `path -> FlatEntry` map, for continuity lookups.
pub fn tree_map<S: ObjectStore>(store: &S, tree_hash: Hash) -> Result<BTreeMap<String, FlatEntry>> {
    Ok(flatten_tree(store, tree_hash)?.into_iter().map(|e| (e.path.clone(), e)).collect())
}
