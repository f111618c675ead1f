//! Blame and log-by-entity: first-parent history walks driven by entity
//! continuity (§4.11).
//!
//! Grounded on `libbit::core`'s first-parent walk pattern (`BitRepo::log`)
//! generalized from whole-commit log entries to per-entity body-hash
//! comparisons via [`crate::continuity`].

use crate::continuity::{resolve_parent_entity, tree_map, CommitEntityCache, Locator};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::mergebase::changed_candidate_paths;
use crate::object::Commit;
use crate::store::ObjectStore;

/// Walks first-parent history from `start`, yielding `(hash, commit)` pairs,
/// up to `limit` commits.
fn first_parent_walk<S: ObjectStore>(store: &S, start: Hash, limit: usize) -> Result<Vec<(Hash, Commit)>> {
    let mut out = Vec::new();
    let mut current = Some(start);
    while let Some(hash) = current {
        if out.len() >= limit {
            break;
        }
        let commit = store.read_commit(hash)?;
        current = commit.first_parent();
        out.push((hash, commit));
    }
    Ok(out)
}

/// Finds the commit that last changed the entity identified by `selector`,
/// walking first-parent history from `start` up to `limit` commits.
///
/// The locator that identifies the entity is itself re-resolved at every
/// step via [`resolve_parent_entity`] — a key shift between a commit and its
/// parent carries the walk to the parent's own key, not the original one.
pub fn blame_entity<S: ObjectStore>(store: &S, start: Hash, selector: &str, limit: usize) -> Result<Hash> {
    let cache = CommitEntityCache::new();
    let mut locator = Locator::parse(selector)?;

    let mut hash = start;
    let mut commit = store.read_commit(hash)?;
    let mut tree = tree_map(store, commit.tree_hash)?;
    let mut entity = cache
        .entity_at(store, &tree, &locator)?
        .ok_or_else(|| Error::EntityNotFound { reason: format!("entity `{selector}` not found") })?;

    for _ in 0..limit {
        let Some(parent_hash) = commit.first_parent() else {
            return Ok(hash);
        };
        let parent_commit = store.read_commit(parent_hash)?;
        let parent_tree = tree_map(store, parent_commit.tree_hash)?;

        match resolve_parent_entity(store, &cache, &locator, &entity, &tree, &parent_tree)? {
            Some((parent_locator, parent_entity)) if parent_entity.body_hash == entity.body_hash => {
                hash = parent_hash;
                commit = parent_commit;
                tree = parent_tree;
                locator = parent_locator;
                entity = parent_entity;
            }
            _ => return Ok(hash),
        }
    }

    Err(Error::EntityNotFound { reason: format!("no change found within {limit} commits") })
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub hash: Hash,
    pub commit: Commit,
}

/// Finds commits (newest-first) where the entity identified by `entity_key`
/// changed, optionally restricted to `path_filter`.
pub fn log_by_entity<S: ObjectStore>(
    store: &S,
    start: Hash,
    limit: usize,
    path_filter: Option<&str>,
    entity_key: &str,
) -> Result<Vec<LogEntry>> {
    let history = first_parent_walk(store, start, limit)?;
    let cache = CommitEntityCache::new();
    let mut results = Vec::new();

    for (hash, commit) in &history {
        let Some(parent_hash) = commit.first_parent() else { continue };
        let parent_commit = store.read_commit(parent_hash)?;
        let tree = tree_map(store, commit.tree_hash)?;
        let parent_tree = tree_map(store, parent_commit.tree_hash)?;

        let candidate_paths: Vec<String> = match path_filter {
            Some(p) => vec![p.to_owned()],
            None => changed_candidate_paths(
                &parent_tree.iter().map(|(p, e)| (p.clone(), e.blob_hash)).collect(),
                &tree.iter().map(|(p, e)| (p.clone(), e.blob_hash)).collect(),
            ),
        };

        for path in candidate_paths {
            let locator = Locator { path: path.clone(), key: entity_key.to_owned() };
            let current = match cache.entity_at(store, &tree, &locator) {
                Ok(Some(e)) => e,
                Ok(None) => continue,
                Err(_) => continue, // extractor-style failures never abort the walk (§4.11)
            };
            let changed = match resolve_parent_entity(store, &cache, &locator, &current, &tree, &parent_tree) {
                Ok(Some((_, parent_entity))) => parent_entity.body_hash != current.body_hash,
                Ok(None) => true,
                Err(_) => false,
            };
            if changed {
                results.push(LogEntry { hash: *hash, commit: commit.clone() });
                break;
            }
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{Extractor, GoLikeExtractor};
    use crate::object::{EntityList, Signature};
    use crate::store::FsObjectStore;

    fn store(dir: &std::path::Path) -> FsObjectStore {
        crate::store::ensure_object_dirs(dir).unwrap();
        FsObjectStore::new(dir)
    }

    fn commit_file<S: ObjectStore>(store: &S, parent: Option<Hash>, path: &str, content: &[u8], seed: i64) -> Hash {
        let ex = GoLikeExtractor;
        let entities = ex.extract(path, content);
        let blob_hash = store.write_blob(content).unwrap();
        let entity_list_hash = entities.map(|ents| {
            let mut refs = Vec::new();
            for e in &ents {
                refs.push(store.write_entity(e).unwrap());
            }
            store
                .write_entity_list(&EntityList { language: crate::object::Language::Go, path: path.to_owned(), entity_refs: refs })
                .unwrap()
        });
        let mut staging = crate::index::Staging::default();
        staging.entries.insert(
            path.to_owned(),
            crate::index::StagingEntry {
                path: path.to_owned(),
                blob_hash,
                entity_list_hash,
                mode: crate::object::FileMode::File,
                conflict: false,
                base_blob_hash: None,
                ours_blob_hash: None,
                theirs_blob_hash: None,
                mod_time: seed,
                size: content.len() as i64,
            },
        );
        let tree_hash = crate::tree_builder::build_tree(store, &staging).unwrap();
        let commit = Commit {
            tree_hash,
            parents: parent.into_iter().collect(),
            author: Signature::new("a", "a@x.com", seed, 0),
            timestamp: seed,
            message: format!("commit {seed}"),
            signature: None,
        };
        store.write_commit(&commit).unwrap()
    }

    #[test]
    fn blame_finds_key_shift_via_body_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let c1 = commit_file(&store, None, "main.go", b"func Target(){\nreturn 1\n}\n", 1);
        let c2 = commit_file(
            &store,
            Some(c1),
            "main.go",
            b"func Target(){\nreturn 99\n}\nfunc Target(){\nreturn 1\n}\n",
            2,
        );
        let c3 = commit_file(
            &store,
            Some(c2),
            "main.go",
            b"func Target(){\nreturn 99\n}\nfunc Target(){\nreturn 1\n}\nfunc helper(){\nreturn 0\n}\n",
            3,
        );

        let ex = GoLikeExtractor;
        let entities = ex.extract("main.go", b"func Target(){\nreturn 99\n}\nfunc Target(){\nreturn 1\n}\n").unwrap();
        let second_key = entities[1].identity_key(1);
        let selector = format!("main.go::{second_key}");

        let result = blame_entity(&store, c3, &selector, 10).unwrap();
        assert_eq!(result, c1);
    }

    #[test]
    fn blame_reports_not_found_for_unknown_entity() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let c1 = commit_file(&store, None, "main.go", b"func A(){\nreturn 1\n}\n", 1);
        let err = blame_entity(&store, c1, "main.go::nonexistent#0", 10).unwrap_err();
        assert!(matches!(err, Error::EntityNotFound { .. }));
    }
}
