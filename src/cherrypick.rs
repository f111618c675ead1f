//! Entity cherry-pick: rebase a single entity's change from a target commit
//! onto HEAD via a synthetic `theirs` file and the structural merge engine
//! (§4.10).
//!
//! Grounded on `libbit::merge`'s general "build a synthetic side, then merge"
//! shape, narrowed from a whole-tree operation to a single entity using
//! [`crate::continuity`] and the extractor's `reconstruct` inverse.

use crate::continuity::{tree_map, Locator};
use crate::error::{Error, Result};
use crate::extractor::Extractor;
use crate::hash::Hash;
use crate::index::{Staging, StagingEntry};
use crate::merge::merge_files;
use crate::object::{Commit, EntityList, Signature};
use crate::refs::{Head, RefStore, HEAD};
use crate::store::ObjectStore;
use crate::tree_builder::FlatEntry;

struct FileState {
    data: Vec<u8>,
    entities: Vec<crate::object::Entity>,
}

fn file_state_at<S: ObjectStore>(store: &S, tree: &std::collections::BTreeMap<String, FlatEntry>, path: &str) -> Result<FileState> {
    let Some(entry) = tree.get(path) else {
        return Ok(FileState { data: Vec::new(), entities: Vec::new() });
    };
    let data = store.read_blob(entry.blob_hash)?;
    let entities = match entry.entity_list_hash {
        Some(h) => {
            let list: EntityList = store.read_entity_list(h)?;
            list.entity_refs.iter().map(|r| store.read_entity(*r)).collect::<Result<Vec<_>>>()?
        }
        None => Vec::new(),
    };
    Ok(FileState { data, entities })
}

/// Cherry-picks the single entity named by `selector` from `target` onto
/// HEAD, using `extractor` to rebuild file bytes from the rebased entity list.
#[allow(clippy::too_many_arguments)]
pub fn cherry_pick_entity<S: ObjectStore, E: Extractor>(
    repo_root: &std::path::Path,
    store: &S,
    refs: &RefStore,
    staging: &mut Staging,
    extractor: &E,
    selector: &str,
    target: Hash,
    head: Hash,
    author_of_target: Signature,
) -> Result<Hash> {
    let locator = Locator::parse(selector)?;
    let target_commit = store.read_commit(target)?;
    let parent_hash = target_commit
        .first_parent()
        .ok_or_else(|| Error::Other("root commits cannot be cherry-picked".into()))?;
    let parent_commit = store.read_commit(parent_hash)?;
    let head_commit = store.read_commit(head)?;

    let base_tree = tree_map(store, parent_commit.tree_hash)?;
    let target_tree = tree_map(store, target_commit.tree_hash)?;
    let ours_tree = tree_map(store, head_commit.tree_hash)?;

    let base_state = file_state_at(store, &base_tree, &locator.path)?;
    let target_state = file_state_at(store, &target_tree, &locator.path)?;
    let ours_state = file_state_at(store, &ours_tree, &locator.path)?;

    let target_entity = target_state.entities.iter().enumerate().find_map(|(i, e)| {
        let key = identity_key_at(&target_state.entities, i);
        (key == locator.key).then(|| e.clone())
    });

    let mut found_in_base = false;
    let mut rebased: Vec<crate::object::Entity> = Vec::new();
    for (i, entity) in base_state.entities.iter().enumerate() {
        let key = identity_key_at(&base_state.entities, i);
        if key == locator.key {
            found_in_base = true;
            if let Some(ref target_entity) = target_entity {
                let mut edited = entity.clone();
                edited.body = target_entity.body.clone();
                edited.recompute_body_hash();
                rebased.push(edited);
            }
            // absent in target: drop the entity entirely
        } else {
            rebased.push(entity.clone());
        }
    }

    if !found_in_base {
        return Err(Error::Other("additions are ambiguous".into()));
    }

    let synthetic = extractor.reconstruct(&rebased);

    let (merged, has_conflicts, _count) = merge_files(&base_state.data, &ours_state.data, &synthetic);
    if has_conflicts {
        return Err(Error::Other(format!("cherry-pick of `{selector}` conflicts")));
    }
    if merged == ours_state.data {
        return Err(Error::Other(format!("target commit does not change {selector}")));
    }

    let abs = repo_root.join(&locator.path);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("create_dir_all", parent, e))?;
    }
    std::fs::write(&abs, &merged).map_err(|e| Error::io("write_file", &abs, e))?;

    let blob_hash = store.write_blob(&merged)?;
    let mode = ours_tree.get(&locator.path).map(|e| e.mode).unwrap_or(crate::object::FileMode::File);
    staging.entries.insert(
        locator.path.clone(),
        StagingEntry {
            path: locator.path.clone(),
            blob_hash,
            entity_list_hash: None,
            mode,
            conflict: false,
            base_blob_hash: None,
            ours_blob_hash: None,
            theirs_blob_hash: None,
            mod_time: 0,
            size: merged.len() as i64,
        },
    );

    let tree_hash = crate::tree_builder::build_tree(store, staging)?;
    let commit = Commit {
        tree_hash,
        parents: vec![head],
        author: author_of_target,
        timestamp: now_unix(),
        message: format!("cherry-pick {} --entity {selector}", target.short()),
        signature: None,
    };
    let commit_hash = store.write_commit(&commit)?;
    let ref_name = match refs.read_head()? {
        Head::Symbolic(path) => path.0,
        Head::Detached(_) => HEAD.to_owned(),
    };
    refs.update_cas(&ref_name, commit_hash, Some(head), "cherry-pick")?;
    Ok(commit_hash)
}

fn identity_key_at(entities: &[crate::object::Entity], index: usize) -> String {
    crate::object::identity_keys(entities)[index].clone()
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
