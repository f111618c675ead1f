//! The repository façade: init/open, commit, checkout, status, reset, GC,
//! tags (§4.6, §4.12).
//!
//! Grounded on `libbit::core::BitRepo`'s role as the thing that ties the ref
//! store, object store, and index together; without the teacher's arena
//! lifetime (`BitRepo<'rcx>`), since this crate has no interned-path layer
//! to tie a lifetime to.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::ignore::IgnoreMatcher;
use crate::index::{self, Staging};
use crate::object::{Commit, Entity, Language, ObjectKind, Signature, TagObj};
use crate::refs::{Head, RefStore, SymbolicPath, HEAD, REFS_HEADS, REFS_TAGS};
use crate::status::{self, DefaultPlatformStat, StatusEntry, StatusHashCache};
use crate::store::{ensure_object_dirs, FsObjectStore, ObjectStore};
use crate::tree_builder::{build_tree, flatten_tree};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub struct Repository {
    pub root: PathBuf,
    pub got_dir: PathBuf,
    pub store: FsObjectStore,
    pub refs: RefStore,
    status_cache: StatusHashCache,
}

const DEFAULT_BRANCH: &str = "main";

impl Repository {
    /// Creates a fresh repository under `root/.got`, with HEAD attached to
    /// `refs/heads/main` (not yet created — the first commit creates it).
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let got_dir = root.join(".got");
        std::fs::create_dir_all(&root).map_err(|e| Error::io("create_dir_all", &root, e))?;
        ensure_object_dirs(&got_dir)?;
        crate::lockfile::atomic_write(got_dir.join(HEAD), format!("ref: {}{}\n", REFS_HEADS, DEFAULT_BRANCH).as_bytes())?;
        let store = FsObjectStore::new(&got_dir);
        let refs = RefStore::new(&got_dir);
        Ok(Self { root, got_dir, store, refs, status_cache: StatusHashCache::new() })
    }

    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let got_dir = root.join(".got");
        if !got_dir.exists() {
            return Err(Error::NotFound(format!("`.got` under `{}`", root.display())));
        }
        let store = FsObjectStore::new(&got_dir);
        let refs = RefStore::new(&got_dir);
        Ok(Self { root, got_dir, store, refs, status_cache: StatusHashCache::new() })
    }

    fn index_path(&self) -> PathBuf {
        self.got_dir.join("index")
    }

    pub fn read_staging(&self) -> Result<Staging> {
        index::read_staging(&self.index_path())
    }

    pub fn write_staging(&self, staging: &Staging) -> Result<()> {
        index::write_staging(&self.index_path(), staging)
    }

    fn ignore_matcher(&self) -> Result<IgnoreMatcher> {
        let path = self.root.join(".gotignore");
        let source = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::io("read_gotignore", &path, e)),
        };
        Ok(IgnoreMatcher::compile(&source))
    }

    pub fn add(
        &self,
        inputs: &[String],
        extract: impl Fn(&str, &[u8]) -> Option<(Language, Vec<Entity>)>,
    ) -> Result<Vec<String>> {
        let ignore = self.ignore_matcher()?;
        let mut staging = self.read_staging()?;
        let resolved = index::add(&self.root, &self.store, &mut staging, &ignore, inputs, extract)?;
        self.write_staging(&staging)?;
        self.status_cache.invalidate();
        Ok(resolved)
    }

    pub fn remove(&self, inputs: &[String], cached: bool) -> Result<Vec<String>> {
        let mut staging = self.read_staging()?;
        let removed = index::remove(&self.root, &mut staging, inputs, cached)?;
        self.write_staging(&staging)?;
        self.status_cache.invalidate();
        Ok(removed)
    }

    fn head_tree_hash(&self) -> Result<Option<Hash>> {
        match self.refs.read(HEAD)? {
            Some(commit_hash) => Ok(Some(self.store.read_commit(commit_hash)?.tree_hash)),
            None => Ok(None),
        }
    }

    pub fn status(&self) -> Result<Vec<StatusEntry>> {
        let mut staging = self.read_staging()?;
        let ignore = self.ignore_matcher()?;
        let head_tree = self.head_tree_hash()?;
        let (entries, refreshed) =
            status::status::<_, DefaultPlatformStat>(&self.root, &self.store, &staging, head_tree, &ignore, &self.status_cache)?;
        if !refreshed.is_empty() {
            for entry in refreshed {
                staging.entries.insert(entry.path.clone(), entry);
            }
            self.write_staging(&staging)?;
        }
        Ok(entries)
    }

    /// Commits the current staging contents. `signer`, if given, is invoked
    /// on the canonical signing payload and the result attached before the
    /// final hashing write.
    pub fn commit(&self, message: &str, author: Signature, signer: Option<impl FnOnce(&[u8]) -> String>) -> Result<Hash> {
        let staging = self.read_staging()?;
        if staging.entries.is_empty() {
            return Err(Error::Other("nothing to commit: staging is empty".into()));
        }
        let tree_hash = build_tree(&self.store, &staging)?;
        let parent_hash = self.refs.read(HEAD)?;

        let mut commit = Commit {
            tree_hash,
            parents: parent_hash.into_iter().collect(),
            author,
            timestamp: now_unix(),
            message: message.to_owned(),
            signature: None,
        };
        if let Some(signer) = signer {
            let payload = commit.signing_payload();
            commit.signature = Some(signer(&payload));
        }
        let commit_hash = self.store.write_commit(&commit)?;

        let ref_name = match self.refs.read_head()? {
            Head::Symbolic(path) => path.0,
            Head::Detached(_) => HEAD.to_owned(),
        };
        self.refs.update_cas(&ref_name, commit_hash, parent_hash, "commit")?;
        self.status_cache.invalidate();
        Ok(commit_hash)
    }

    /// Resolves `target` first as a branch, then as a raw commit hash.
    fn resolve_checkout_target(&self, target: &str) -> Result<(Hash, Option<SymbolicPath>)> {
        let branch_ref = SymbolicPath::branch(target);
        if let Some(hash) = self.refs.read(&branch_ref.0)? {
            return Ok((hash, Some(branch_ref)));
        }
        let hash: Hash = target.parse()?;
        Ok((hash, None))
    }

    pub fn checkout(&self, target: &str) -> Result<()> {
        let entries = self.status()?;
        if let Some(dirty) = entries.iter().find(|e| {
            !matches!(e.index_status, crate::status::IndexStatus::Clean) || !matches!(e.work_status, crate::status::WorkStatus::Clean)
        }) {
            return Err(Error::DirtyWorktree { path: dirty.path.clone() });
        }

        let (target_hash, branch) = self.resolve_checkout_target(target)?;
        let target_commit = self.store.read_commit(target_hash)?;
        let flat = flatten_tree(&self.store, target_commit.tree_hash)?;

        let staging = self.read_staging()?;
        let head_tree = self.head_tree_hash()?;
        let tracked: HashSet<String> = staging
            .entries
            .keys()
            .cloned()
            .chain(match head_tree {
                Some(h) => flatten_tree(&self.store, h)?.into_iter().map(|e| e.path).collect::<Vec<_>>(),
                None => Vec::new(),
            })
            .collect();
        for path in &tracked {
            let abs = self.root.join(path);
            if abs.exists() {
                std::fs::remove_file(&abs).map_err(|e| Error::io("remove_file", &abs, e))?;
            }
        }
        for path in &tracked {
            sweep_empty_parents(&self.root, &self.root.join(path));
        }

        let mut new_staging = Staging::default();
        for entry in &flat {
            let abs = self.root.join(&entry.path);
            if let Some(parent) = abs.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io("create_dir_all", parent, e))?;
            }
            let bytes = self.store.read_blob(entry.blob_hash)?;
            std::fs::write(&abs, &bytes).map_err(|e| Error::io("write_file", &abs, e))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&abs, std::fs::Permissions::from_mode(entry.mode.perm()))
                    .map_err(|e| Error::io("set_permissions", &abs, e))?;
            }
            new_staging.entries.insert(
                entry.path.clone(),
                index::StagingEntry {
                    path: entry.path.clone(),
                    blob_hash: entry.blob_hash,
                    entity_list_hash: entry.entity_list_hash,
                    mode: entry.mode,
                    conflict: false,
                    base_blob_hash: None,
                    ours_blob_hash: None,
                    theirs_blob_hash: None,
                    mod_time: 0,
                    size: bytes.len() as i64,
                },
            );
        }
        // re-stat each written file for a real mtime now that content is on disk
        for entry in new_staging.entries.values_mut() {
            let abs = self.root.join(&entry.path);
            if let Ok(meta) = std::fs::metadata(&abs) {
                if let Ok(mtime) = meta.modified() {
                    entry.mod_time = mtime.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0);
                }
            }
        }
        self.write_staging(&new_staging)?;

        match branch {
            Some(path) => self.refs.set_head_symbolic(&path, "checkout")?,
            None => crate::lockfile::atomic_write(self.got_dir.join(HEAD), format!("{}\n", target_hash.to_hex()).as_bytes())?,
        }
        self.status_cache.invalidate();
        Ok(())
    }

    /// Restores index entries to HEAD's blob/mode for `paths` (all tracked
    /// paths if empty); does not touch the worktree.
    pub fn reset(&self, paths: &[String]) -> Result<()> {
        let mut staging = self.read_staging()?;
        let head_tree = self.head_tree_hash()?;
        let head_entries = match head_tree {
            Some(h) => flatten_tree(&self.store, h)?,
            None => Vec::new(),
        };
        let head_map: std::collections::BTreeMap<String, _> = head_entries.into_iter().map(|e| (e.path.clone(), e)).collect();

        let targets: Vec<String> = if paths.is_empty() {
            let mut all: HashSet<String> = staging.entries.keys().cloned().collect();
            all.extend(head_map.keys().cloned());
            all.into_iter().collect()
        } else {
            staging
                .entries
                .keys()
                .chain(head_map.keys())
                .filter(|k| paths.iter().any(|p| *k == p || k.starts_with(&format!("{p}/"))))
                .cloned()
                .collect()
        };

        for path in targets {
            match head_map.get(&path) {
                Some(entry) => {
                    staging.entries.insert(
                        path.clone(),
                        index::StagingEntry {
                            path: path.clone(),
                            blob_hash: entry.blob_hash,
                            entity_list_hash: entry.entity_list_hash,
                            mode: entry.mode,
                            conflict: false,
                            base_blob_hash: None,
                            ours_blob_hash: None,
                            theirs_blob_hash: None,
                            mod_time: 0,
                            size: -1,
                        },
                    );
                }
                None => {
                    staging.entries.remove(&path);
                }
            }
        }
        self.write_staging(&staging)
    }

    pub fn tag_lightweight(&self, name: &str, target: Hash) -> Result<()> {
        validate_tag_name(name)?;
        self.refs.create(&format!("{REFS_TAGS}{name}"), target, "tag: created")
    }

    pub fn tag_annotated(&self, name: &str, target: Hash, target_type: &str, tagger: &Signature, message: &str) -> Result<Hash> {
        validate_tag_name(name)?;
        let tag_obj = TagObj::render(target, target_type, name, tagger, message);
        let tag_hash = self.store.write_tag(&tag_obj)?;
        self.refs.create(&format!("{REFS_TAGS}{name}"), tag_hash, "tag: created")?;
        Ok(tag_hash)
    }

    /// Enumerates every ref-reachable hash and sweeps the object store of
    /// anything else. Reachability beyond "pointed at by a ref" (e.g. parent
    /// chains) is the store's concern, consistent with §4.12's "reachability
    /// and packing are internal to the store".
    pub fn gc(&self) -> Result<usize> {
        let roots = self.refs.all_ref_hashes()?;
        let mut keep = HashSet::new();
        for root in roots {
            collect_reachable(&self.store, root, &mut keep)?;
        }
        self.store.sweep_unreachable(&keep)
    }
}

fn collect_reachable<S: ObjectStore>(store: &S, commit_hash: Hash, keep: &mut HashSet<(ObjectKind, Hash)>) -> Result<()> {
    if !keep.insert((ObjectKind::Commit, commit_hash)) {
        return Ok(());
    }
    let commit = store.read_commit(commit_hash)?;
    collect_tree_reachable(store, commit.tree_hash, keep)?;
    for parent in commit.parents {
        collect_reachable(store, parent, keep)?;
    }
    Ok(())
}

fn collect_tree_reachable<S: ObjectStore>(store: &S, tree_hash: Hash, keep: &mut HashSet<(ObjectKind, Hash)>) -> Result<()> {
    if !keep.insert((ObjectKind::Tree, tree_hash)) {
        return Ok(());
    }
    let tree = store.read_tree(tree_hash)?;
    for entry in &tree.entries {
        if let Some(sub) = entry.subtree_hash {
            collect_tree_reachable(store, sub, keep)?;
        }
        if let Some(blob) = entry.blob_hash {
            keep.insert((ObjectKind::Blob, blob));
        }
        if let Some(list_hash) = entry.entity_list_hash {
            if keep.insert((ObjectKind::EntityList, list_hash)) {
                let list = store.read_entity_list(list_hash)?;
                for e in list.entity_refs {
                    keep.insert((ObjectKind::Entity, e));
                }
            }
        }
    }
    Ok(())
}

fn validate_tag_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(' ') || name.starts_with('/') || name.ends_with('/') || name.contains("..") {
        return Err(Error::Other(format!("invalid tag name `{name}`")));
    }
    Ok(())
}

fn sweep_empty_parents(repo_root: &Path, file_path: &Path) {
    let mut dir = file_path.parent().map(Path::to_path_buf);
    while let Some(d) = dir {
        if d == repo_root || !d.starts_with(repo_root) {
            break;
        }
        match std::fs::read_dir(&d) {
            Ok(mut it) => {
                if it.next().is_none() {
                    let _ = std::fs::remove_dir(&d);
                    dir = d.parent().map(Path::to_path_buf);
                } else {
                    break;
                }
            }
            _ => break,
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Signature {
        Signature::new("tester", "tester@example.com", 0, 0)
    }

    #[test]
    fn init_then_commit_updates_head() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("work")).unwrap();
        std::fs::write(repo.root.join("a.txt"), b"hello").unwrap();
        repo.add(&["a.txt".into()], |_, _| None).unwrap();
        let commit_hash = repo.commit("initial", author(), None::<fn(&[u8]) -> String>).unwrap();
        assert_eq!(repo.refs.resolve(HEAD).unwrap(), commit_hash);
    }

    #[test]
    fn commit_with_empty_staging_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("work")).unwrap();
        let err = repo.commit("nothing", author(), None::<fn(&[u8]) -> String>).unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn checkout_restores_worktree_and_detects_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("work")).unwrap();
        std::fs::write(repo.root.join("a.txt"), b"v1").unwrap();
        repo.add(&["a.txt".into()], |_, _| None).unwrap();
        repo.commit("c1", author(), None::<fn(&[u8]) -> String>).unwrap();

        repo.refs.create("feature", repo.refs.resolve(HEAD).unwrap(), "branch: created").unwrap();
        std::fs::write(repo.root.join("a.txt"), b"v2").unwrap();
        repo.add(&["a.txt".into()], |_, _| None).unwrap();
        repo.commit("c2", author(), None::<fn(&[u8]) -> String>).unwrap();

        repo.checkout("feature").unwrap();
        assert_eq!(std::fs::read(repo.root.join("a.txt")).unwrap(), b"v1");
    }

    #[test]
    fn lightweight_tag_points_at_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("work")).unwrap();
        std::fs::write(repo.root.join("a.txt"), b"v1").unwrap();
        repo.add(&["a.txt".into()], |_, _| None).unwrap();
        let c = repo.commit("c1", author(), None::<fn(&[u8]) -> String>).unwrap();
        repo.tag_lightweight("v1.0", c).unwrap();
        assert_eq!(repo.refs.resolve("refs/tags/v1.0").unwrap(), c);
    }
}
