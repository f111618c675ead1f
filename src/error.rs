//! Error kinds for the repository core.
//!
//! The teacher (`libbit::error`) leans on `anyhow` plus a downcastable `BitError`
//! enum for the handful of cases callers need to match on. This spec calls for
//! `errors.Is`-style programmatic checks as a first-class requirement, so we
//! use a single `thiserror`-derived enum directly instead of downcasting.

use crate::hash::Hash;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid entity selector `{value}`")]
    InvalidSelector { value: String },

    #[error("entity not found: {reason}")]
    EntityNotFound { reason: String },

    #[error("compare-and-swap failed on ref `{name}`: expected {expected:?}, found {actual:?}")]
    RefCasMismatch { name: String, expected: Option<Hash>, actual: Option<Hash> },

    #[error(
        "ref `{name}` was updated to {new} but appending the reflog entry failed"
    )]
    RefUpdatedButReflogAppendFailed {
        name: String,
        old: Option<Hash>,
        new: Hash,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out waiting {waited_ms}ms to acquire lock on `{path}`")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("commit graph cycle detected at `{0}`")]
    CommitGraphCycle(Hash),

    #[error("merge-base traversal exceeded {0} steps")]
    TraversalStepsExceeded(u64),

    #[error("merge-base traversal exceeded depth {0}")]
    TraversalDepthExceeded(u64),

    #[error("cannot checkout: worktree is dirty at `{path}`")]
    DirtyWorktree { path: String },

    #[error("path `{0}` is outside the repository")]
    PathOutsideRepo(PathBuf),

    #[error("pathspec `{0}` did not match any files")]
    PathspecDidNotMatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid hash `{value}`")]
    InvalidHash { value: String },

    #[error("object store error performing `{op}` on `{hash:?}`")]
    ObjectStore { op: &'static str, hash: Option<Hash>, #[source] source: Box<Error> },

    #[error("I/O error during `{op}` on `{path}`")]
    Io { op: &'static str, path: PathBuf, #[source] source: std::io::Error },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { op, path: path.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(..) | Error::PathspecDidNotMatch(..))
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::RefCasMismatch { .. } | Error::LockTimeout { .. })
    }
}
