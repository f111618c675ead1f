//! References: symbolic/direct ref parsing, name resolution rules (§4.1).
//!
//! Grounded on `libbit::refs` (`BitRef`/`SymbolicRef`, `Display`/`FromStr`
//! impls, the `refs/heads`/`refs/tags`/`refs/remotes` prefix table) but
//! trimmed to the three prefixes this spec names and without the teacher's
//! arena-interned `BitPath`.

mod refdb;
mod reflog;

pub use refdb::RefStore;
pub use reflog::ReflogEntry;

use crate::hash::Hash;
use std::fmt::{self, Display, Formatter};

pub const HEAD: &str = "HEAD";
pub const REFS_HEADS: &str = "refs/heads/";
pub const REFS_TAGS: &str = "refs/tags/";
pub const REFS_REMOTES: &str = "refs/remotes/";

/// The parsed contents of a ref file (or the `HEAD` file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    Direct(Hash),
    /// the path of another ref, e.g. `refs/heads/main`
    Symbolic(SymbolicPath),
}

impl Display for RefValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RefValue::Direct(hash) => write!(f, "{hash}"),
            RefValue::Symbolic(path) => write!(f, "ref: {}", path.0),
        }
    }
}

/// A ref path known to be well-formed, e.g. `refs/heads/main` or `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolicPath(pub String);

impl SymbolicPath {
    pub fn branch(name: &str) -> Self {
        Self(format!("{REFS_HEADS}{name}"))
    }

    /// abbreviated display, stripping the `refs/heads/` prefix
    pub fn short(&self) -> &str {
        self.0.strip_prefix(REFS_HEADS).unwrap_or(&self.0)
    }
}

impl Display for SymbolicPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state of `HEAD`: either attached to a branch or pointing directly at a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    Symbolic(SymbolicPath),
    Detached(Hash),
}

/// Rewrites a bare name to its full ref path, per §4.1's resolution rule:
/// `HEAD` is itself; anything starting with `refs/` is used as-is; anything
/// else is a branch shorthand.
pub fn normalize_name(name: &str) -> String {
    if name == HEAD || name.starts_with("refs/") {
        name.to_owned()
    } else {
        format!("{REFS_HEADS}{name}")
    }
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("/.")
        && !name.contains("..")
        && !name.contains(['*', ':', '?', '[', '\\', '^', '~', ' ', '\t'])
        && !name.ends_with('/')
        && !name.ends_with(".lock")
        && !name.contains("@{")
}
