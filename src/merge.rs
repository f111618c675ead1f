//! File-tree merge driver: 3-way dispatch over all paths, delete-vs-modify
//! policy, conflict staging (§4.9).
//!
//! Grounded on `libbit::merge`'s overall `Merge(branch)` shape (resolve
//! ours/theirs/base, flatten, walk the union of paths), rebuilt around this
//! spec's truth table and the external `diffy` structural merge engine in
//! place of the teacher's own (out-of-scope) merge algorithm.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::index::{Staging, StagingEntry};
use crate::object::{Commit, FileMode, Signature};
use crate::refs::{Head, RefStore, HEAD};
use crate::store::ObjectStore;
use crate::tree_builder::{flatten_tree, FlatEntry};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct MergeConflictState {
    pub path: String,
    pub base_blob_hash: Option<Hash>,
    pub ours_blob_hash: Option<Hash>,
    pub theirs_blob_hash: Option<Hash>,
    pub mode: FileMode,
}

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub has_conflicts: bool,
    pub total_conflicts: usize,
    pub conflicts: Vec<MergeConflictState>,
    pub merge_commit: Option<Hash>,
}

enum MergeOutcome {
    Write { content: Vec<u8>, mode: FileMode },
    Delete,
    Conflict { content: Vec<u8>, mode: FileMode, state: MergeConflictState },
}

fn flat_map<S: ObjectStore>(store: &S, tree_hash: Option<Hash>) -> Result<BTreeMap<String, FlatEntry>> {
    match tree_hash {
        Some(h) => Ok(flatten_tree(store, h)?.into_iter().map(|e| (e.path.clone(), e)).collect()),
        None => Ok(BTreeMap::new()),
    }
}

/// Invokes the external structural merge engine (`diffy`) over raw bytes.
pub fn merge_files(base: &[u8], ours: &[u8], theirs: &[u8]) -> (Vec<u8>, bool, usize) {
    let base = String::from_utf8_lossy(base);
    let ours_s = String::from_utf8_lossy(ours);
    let theirs_s = String::from_utf8_lossy(theirs);
    match diffy::merge(&base, &ours_s, &theirs_s) {
        Ok(merged) => (merged.into_bytes(), false, 0),
        Err(conflicted) => {
            let count = conflicted.matches("<<<<<<<").count().max(1);
            (conflicted.into_bytes(), true, count)
        }
    }
}

/// Renders the exact conflict-marker layout from §4.9.1.
pub fn render_conflict(ours: &[u8], theirs: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"<<<<<<< ours\n");
    out.extend_from_slice(ours);
    if !ours.is_empty() && !ours.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(b"=======\n");
    out.extend_from_slice(theirs);
    if !theirs.is_empty() && !theirs.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(b">>>>>>> theirs\n");
    out
}

fn three_way_merge<S: ObjectStore>(
    store: &S,
    path: &str,
    base: Option<&FlatEntry>,
    ours: &FlatEntry,
    theirs: &FlatEntry,
) -> Result<MergeOutcome> {
    if ours.blob_hash == theirs.blob_hash {
        return Ok(MergeOutcome::Write { content: store.read_blob(ours.blob_hash)?, mode: ours.mode });
    }
    if let Some(base) = base {
        if ours.blob_hash == base.blob_hash {
            return Ok(MergeOutcome::Write { content: store.read_blob(theirs.blob_hash)?, mode: theirs.mode });
        }
        if theirs.blob_hash == base.blob_hash {
            return Ok(MergeOutcome::Write { content: store.read_blob(ours.blob_hash)?, mode: ours.mode });
        }
    }
    let base_bytes = match base {
        Some(b) => store.read_blob(b.blob_hash)?,
        None => Vec::new(),
    };
    let ours_bytes = store.read_blob(ours.blob_hash)?;
    let theirs_bytes = store.read_blob(theirs.blob_hash)?;
    let (merged, has_conflicts, _count) = merge_files(&base_bytes, &ours_bytes, &theirs_bytes);
    if has_conflicts {
        let content = render_conflict(&ours_bytes, &theirs_bytes);
        Ok(MergeOutcome::Conflict {
            content,
            mode: ours.mode,
            state: MergeConflictState {
                path: path.to_owned(),
                base_blob_hash: base.map(|b| b.blob_hash),
                ours_blob_hash: Some(ours.blob_hash),
                theirs_blob_hash: Some(theirs.blob_hash),
                mode: ours.mode,
            },
        })
    } else {
        Ok(MergeOutcome::Write { content: merged, mode: ours.mode })
    }
}

/// Performs the full merge: computes the truth-table outcome for every path,
/// materializes the worktree, and either commits (clean) or stages
/// conflicts (dirty). Does not resolve `branch_name` to a hash itself; the
/// caller supplies `ours`/`theirs`/`base` already resolved.
#[allow(clippy::too_many_arguments)]
pub fn merge<S: ObjectStore>(
    repo_root: &Path,
    store: &S,
    refs: &RefStore,
    staging: &mut Staging,
    ours: Hash,
    theirs: Hash,
    base: Option<Hash>,
    branch_name: &str,
    author: Signature,
) -> Result<MergeReport> {
    let ours_commit = store.read_commit(ours)?;
    let theirs_commit = store.read_commit(theirs)?;
    let ours_map = flat_map(store, Some(ours_commit.tree_hash))?;
    let theirs_map = flat_map(store, Some(theirs_commit.tree_hash))?;
    let base_map = match base {
        Some(b) => flat_map(store, Some(store.read_commit(b)?.tree_hash))?,
        None => BTreeMap::new(),
    };

    let mut all_paths: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
    all_paths.extend(ours_map.keys().map(String::as_str));
    all_paths.extend(theirs_map.keys().map(String::as_str));
    all_paths.extend(base_map.keys().map(String::as_str));

    let mut writes: Vec<(String, Vec<u8>, FileMode)> = Vec::new();
    let mut deletes: Vec<String> = Vec::new();
    let mut conflicts: Vec<(String, Vec<u8>, FileMode, MergeConflictState)> = Vec::new();

    for path in all_paths {
        let in_base = base_map.get(path);
        let in_ours = ours_map.get(path);
        let in_theirs = theirs_map.get(path);

        match (in_base, in_ours, in_theirs) {
            (Some(b), Some(o), Some(t)) => match three_way_merge(store, path, Some(b), o, t)? {
                MergeOutcome::Write { content, mode } => writes.push((path.to_owned(), content, mode)),
                MergeOutcome::Delete => deletes.push(path.to_owned()),
                MergeOutcome::Conflict { content, mode, state } => conflicts.push((path.to_owned(), content, mode, state)),
            },
            (None, Some(o), Some(t)) => {
                if o.blob_hash == t.blob_hash {
                    writes.push((path.to_owned(), store.read_blob(o.blob_hash)?, o.mode));
                } else {
                    match three_way_merge(store, path, None, o, t)? {
                        MergeOutcome::Write { content, mode } => writes.push((path.to_owned(), content, mode)),
                        MergeOutcome::Delete => deletes.push(path.to_owned()),
                        MergeOutcome::Conflict { content, mode, state } => conflicts.push((path.to_owned(), content, mode, state)),
                    }
                }
            }
            (Some(b), Some(o), None) => {
                if o.blob_hash == b.blob_hash {
                    deletes.push(path.to_owned());
                } else {
                    let ours_bytes = store.read_blob(o.blob_hash)?;
                    let content = render_conflict(&ours_bytes, b"");
                    conflicts.push((
                        path.to_owned(),
                        content,
                        o.mode,
                        MergeConflictState { path: path.to_owned(), base_blob_hash: Some(b.blob_hash), ours_blob_hash: Some(o.blob_hash), theirs_blob_hash: None, mode: o.mode },
                    ));
                }
            }
            (Some(b), None, Some(t)) => {
                if t.blob_hash == b.blob_hash {
                    deletes.push(path.to_owned());
                } else {
                    let theirs_bytes = store.read_blob(t.blob_hash)?;
                    let content = render_conflict(b"", &theirs_bytes);
                    conflicts.push((
                        path.to_owned(),
                        content,
                        t.mode,
                        MergeConflictState { path: path.to_owned(), base_blob_hash: Some(b.blob_hash), ours_blob_hash: None, theirs_blob_hash: Some(t.blob_hash), mode: t.mode },
                    ));
                }
            }
            (None, Some(o), None) => writes.push((path.to_owned(), store.read_blob(o.blob_hash)?, o.mode)),
            (None, None, Some(t)) => writes.push((path.to_owned(), store.read_blob(t.blob_hash)?, t.mode)),
            (Some(_), None, None) => deletes.push(path.to_owned()),
            (None, None, None) => unreachable!("path present in union but absent from all three maps"),
        }
    }

    for (path, content, mode) in &writes {
        write_worktree_file(repo_root, path, content, *mode)?;
    }
    for (path, content, mode, _) in &conflicts {
        write_worktree_file(repo_root, path, content, *mode)?;
    }
    for path in &deletes {
        let abs = repo_root.join(path);
        if abs.exists() {
            std::fs::remove_file(&abs).map_err(|e| Error::io("remove_file", &abs, e))?;
        }
    }

    if conflicts.is_empty() {
        for (path, content, mode) in &writes {
            let blob_hash = store.write_blob(content)?;
            staging.entries.insert(
                path.clone(),
                StagingEntry {
                    path: path.clone(),
                    blob_hash,
                    entity_list_hash: None,
                    mode: *mode,
                    conflict: false,
                    base_blob_hash: None,
                    ours_blob_hash: None,
                    theirs_blob_hash: None,
                    mod_time: 0,
                    size: content.len() as i64,
                },
            );
        }
        for path in &deletes {
            staging.entries.remove(path);
        }

        let tree_hash = crate::tree_builder::build_tree(store, staging)?;
        let commit = Commit {
            tree_hash,
            parents: vec![ours, theirs],
            author,
            timestamp: now_unix(),
            message: format!("Merge branch '{branch_name}'"),
            signature: None,
        };
        let commit_hash = store.write_commit(&commit)?;
        let ref_name = match refs.read_head()? {
            Head::Symbolic(path) => path.0,
            Head::Detached(_) => HEAD.to_owned(),
        };
        refs.update_cas(&ref_name, commit_hash, Some(ours), "merge")?;

        Ok(MergeReport { has_conflicts: false, total_conflicts: 0, conflicts: Vec::new(), merge_commit: Some(commit_hash) })
    } else {
        for (path, content, mode, state) in &conflicts {
            let blob_hash = store.write_blob(content)?;
            staging.entries.insert(
                path.clone(),
                StagingEntry {
                    path: path.clone(),
                    blob_hash,
                    entity_list_hash: None,
                    mode: *mode,
                    conflict: true,
                    base_blob_hash: state.base_blob_hash,
                    ours_blob_hash: state.ours_blob_hash,
                    theirs_blob_hash: state.theirs_blob_hash,
                    mod_time: 0,
                    size: content.len() as i64,
                },
            );
        }
        for path in &deletes {
            staging.entries.remove(path);
        }
        let total = conflicts.len();
        Ok(MergeReport {
            has_conflicts: true,
            total_conflicts: total,
            conflicts: conflicts.into_iter().map(|(_, _, _, s)| s).collect(),
            merge_commit: None,
        })
    }
}

fn write_worktree_file(repo_root: &Path, path: &str, content: &[u8], mode: FileMode) -> Result<()> {
    let abs = repo_root.join(path);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("create_dir_all", parent, e))?;
    }
    std::fs::write(&abs, content).map_err(|e| Error::io("write_file", &abs, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perm = std::fs::Permissions::from_mode(mode.perm());
        std::fs::set_permissions(&abs, perm).map_err(|e| Error::io("set_permissions", &abs, e))?;
    }
    Ok(())
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_conflict_adds_trailing_newlines() {
        let out = render_conflict(b"mine", b"theirs");
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, "<<<<<<< ours\nmine\n=======\ntheirs\n>>>>>>> theirs\n");
    }

    #[test]
    fn render_conflict_handles_empty_side() {
        let out = render_conflict(b"", b"theirs\n");
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, "<<<<<<< ours\n=======\ntheirs\n>>>>>>> theirs\n");
    }

    #[test]
    fn clean_diff3_merge_has_no_conflicts() {
        let base = b"line1\nline2\nline3\n";
        let ours = b"line1\nline2-ours\nline3\n";
        let theirs = b"line1\nline2\nline3-theirs\n";
        let (_merged, has_conflicts, _) = merge_files(base, ours, theirs);
        assert!(!has_conflicts);
    }

    #[test]
    fn overlapping_edits_conflict() {
        let base = b"line1\n";
        let ours = b"ours-edit\n";
        let theirs = b"theirs-edit\n";
        let (_merged, has_conflicts, count) = merge_files(base, ours, theirs);
        assert!(has_conflicts);
        assert!(count >= 1);
    }
}
