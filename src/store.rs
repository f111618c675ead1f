//! The content-addressed object store.
//!
//! §1 marks the object codec out of scope ("consumed as `Store.Read/Write{...}`
//! returning/accepting already-serialized bytes"); this module is the one
//! concrete backing the rest of the crate is built against. It is grounded on
//! `libbit::obj`/`libbit::odb`'s split between a typed front door and an
//! untyped backend, and on the corpus's own `ObjectStore` (`other_examples`'s
//! `object_store.rs`), which pairs `sha2::Sha256` with `serde_json` bodies
//! under `objects/<kind>/`.

use crate::error::{Error, Result};
use crate::hash::{hash_object, Hash};
use crate::object::{Commit, Entity, EntityList, ObjectKind, TagObj, Tree};
use std::fs;
use std::path::{Path, PathBuf};

/// Low-level, untyped content-addressed persistence.
///
/// Implementors only need to guarantee that `write_object` is idempotent
/// (same bytes under the same kind always produce the same hash and never
/// fail because the object already exists) and that once written, an object
/// is immutable and visible to subsequent `read_object` calls.
pub trait ObjectStore {
    fn write_object(&self, kind: ObjectKind, body: &[u8]) -> Result<Hash>;
    fn read_object(&self, kind: ObjectKind, hash: Hash) -> Result<Vec<u8>>;
    fn has_object(&self, kind: ObjectKind, hash: Hash) -> bool;

    fn write_blob(&self, data: &[u8]) -> Result<Hash> {
        self.write_object(ObjectKind::Blob, data)
    }

    fn read_blob(&self, hash: Hash) -> Result<Vec<u8>> {
        self.read_object(ObjectKind::Blob, hash)
    }

    fn write_tree(&self, tree: &Tree) -> Result<Hash> {
        let body = serde_json::to_vec(tree)?;
        self.write_object(ObjectKind::Tree, &body)
    }

    fn read_tree(&self, hash: Hash) -> Result<Tree> {
        let body = self.read_object(ObjectKind::Tree, hash)?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn write_commit(&self, commit: &Commit) -> Result<Hash> {
        let body = serde_json::to_vec(commit)?;
        self.write_object(ObjectKind::Commit, &body)
    }

    fn read_commit(&self, hash: Hash) -> Result<Commit> {
        let body = self.read_object(ObjectKind::Commit, hash)?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn write_tag(&self, tag: &TagObj) -> Result<Hash> {
        let body = serde_json::to_vec(tag)?;
        self.write_object(ObjectKind::Tag, &body)
    }

    fn read_tag(&self, hash: Hash) -> Result<TagObj> {
        let body = self.read_object(ObjectKind::Tag, hash)?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn write_entity(&self, entity: &Entity) -> Result<Hash> {
        let body = serde_json::to_vec(entity)?;
        self.write_object(ObjectKind::Entity, &body)
    }

    fn read_entity(&self, hash: Hash) -> Result<Entity> {
        let body = self.read_object(ObjectKind::Entity, hash)?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn write_entity_list(&self, list: &EntityList) -> Result<Hash> {
        let body = serde_json::to_vec(list)?;
        self.write_object(ObjectKind::EntityList, &body)
    }

    fn read_entity_list(&self, hash: Hash) -> Result<EntityList> {
        let body = self.read_object(ObjectKind::EntityList, hash)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// A plain-filesystem content-addressed store: `objects/<kind>/<2-hex>/<62-hex>`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, kind: ObjectKind, hash: Hash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join("objects").join(kind.as_str()).join(&hex[..2]).join(&hex[2..])
    }

    /// Every reachable object hash across all five kinds, used by GC.
    pub fn all_hashes(&self) -> Result<Vec<(ObjectKind, Hash)>> {
        let mut out = Vec::new();
        for kind in [
            ObjectKind::Blob,
            ObjectKind::Tree,
            ObjectKind::Commit,
            ObjectKind::Tag,
            ObjectKind::Entity,
            ObjectKind::EntityList,
        ] {
            let dir = self.root.join("objects").join(kind.as_str());
            if !dir.exists() {
                continue;
            }
            for shard in fs::read_dir(&dir).map_err(|e| Error::io("read_dir", &dir, e))? {
                let shard = shard.map_err(|e| Error::io("read_dir", &dir, e))?;
                if !shard.path().is_dir() {
                    continue;
                }
                for entry in fs::read_dir(shard.path()).map_err(|e| Error::io("read_dir", shard.path(), e))? {
                    let entry = entry.map_err(|e| Error::io("read_dir", shard.path(), e))?;
                    let prefix = shard.file_name().to_string_lossy().into_owned();
                    let rest = entry.file_name().to_string_lossy().into_owned();
                    if let Ok(hash) = format!("{prefix}{rest}").parse::<Hash>() {
                        out.push((kind, hash));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Deletes every object of any kind not reachable from `keep`.
    pub fn sweep_unreachable(&self, keep: &std::collections::HashSet<(ObjectKind, Hash)>) -> Result<usize> {
        let mut removed = 0;
        for (kind, hash) in self.all_hashes()? {
            if !keep.contains(&(kind, hash)) {
                let path = self.object_path(kind, hash);
                fs::remove_file(&path).map_err(|e| Error::io("gc_remove", &path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl ObjectStore for FsObjectStore {
    fn write_object(&self, kind: ObjectKind, body: &[u8]) -> Result<Hash> {
        let hash = hash_object(kind.as_str(), body);
        let path = self.object_path(kind, hash);
        if path.exists() {
            return Ok(hash);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io("create_dir_all", parent, e))?;
        }
        // write to a sibling temp file then rename, so a concurrent reader never
        // observes a partially-written object
        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        fs::write(&tmp, body).map_err(|e| Error::io("write_object", &tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io("write_object", &path, e))?;
        Ok(hash)
    }

    fn read_object(&self, kind: ObjectKind, hash: Hash) -> Result<Vec<u8>> {
        let path = self.object_path(kind, hash);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("{kind} object `{hash}`"))
            } else {
                Error::io("read_object", &path, e)
            }
        })
    }

    fn has_object(&self, kind: ObjectKind, hash: Hash) -> bool {
        self.object_path(kind, hash).exists()
    }
}

pub fn ensure_object_dirs(root: &Path) -> Result<()> {
    for kind in [
        ObjectKind::Blob,
        ObjectKind::Tree,
        ObjectKind::Commit,
        ObjectKind::Tag,
        ObjectKind::Entity,
        ObjectKind::EntityList,
    ] {
        let dir = root.join("objects").join(kind.as_str());
        fs::create_dir_all(&dir).map_err(|e| Error::io("create_dir_all", &dir, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_idempotent_and_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        ensure_object_dirs(dir.path()).unwrap();
        let h1 = store.write_blob(b"hello").unwrap();
        let h2 = store.write_blob(b"hello").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.read_blob(h1).unwrap(), b"hello");
    }

    #[test]
    fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        ensure_object_dirs(dir.path()).unwrap();
        let err = store.read_blob(Hash::ZERO).unwrap_err();
        assert!(err.is_not_found());
    }
}
