//! Shared test scaffolding: a tempdir-backed [`Repository`] and small random
//! data generators.
//!
//! The teacher's own `test_utils.rs` builds an elaborate `tree!`/`bit_add!`
//! macro DSL around its TLS-bound `BitRepo`; this crate's `Repository` has no
//! thread-local context to hang macros off, so this is grounded instead on
//! the teacher's plain helper functions (`generate_random_string`,
//! `generate_sane_string_with_newlines`) and its `repos_dir!` tempdir-copy
//! idiom, expressed as functions rather than macros.

use crate::object::Signature;
use crate::repo::Repository;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tempfile::TempDir;

/// A repository rooted in a directory that is removed when dropped.
pub struct TmpRepo {
    pub dir: TempDir,
    pub repo: Repository,
}

impl TmpRepo {
    pub fn init() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let repo = Repository::init(dir.path().join("work")).expect("failed to init repo");
        Self { dir, repo }
    }

    pub fn write(&self, rel_path: &str, contents: impl AsRef<[u8]>) {
        let abs = self.repo.root.join(rel_path);
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(abs, contents).expect("failed to write file");
    }

    pub fn add_all(&self, paths: &[&str]) {
        let inputs: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        self.repo.add(&inputs, |_, _| None).expect("add failed");
    }

    pub fn commit(&self, message: &str) -> crate::hash::Hash {
        self.repo.commit(message, test_author(), None::<fn(&[u8]) -> String>).expect("commit failed")
    }
}

pub fn test_author() -> Signature {
    Signature::new("Test Author", "test@example.com", 1_700_000_000, 0)
}

/// A random alphanumeric string whose length falls in `range`.
pub fn generate_random_string(range: std::ops::Range<usize>) -> String {
    let size = rand::thread_rng().gen_range(range);
    rand::thread_rng().sample_iter(&Alphanumeric).take(size).map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_repo_add_and_commit_round_trips() {
        let tmp = TmpRepo::init();
        tmp.write("a.txt", "hello");
        tmp.add_all(&["a.txt"]);
        let hash = tmp.commit("initial");
        assert_eq!(tmp.repo.refs.resolve("HEAD").unwrap(), hash);
    }

    #[test]
    fn random_string_respects_length_range() {
        let s = generate_random_string(10..20);
        assert!(s.len() >= 10 && s.len() < 20);
    }
}
