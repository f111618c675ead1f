//! The object data model: blobs, entities, entity lists, trees, commits, tags.
//!
//! Grounded on `libbit::obj` (the `BitObj`/`Tree`/`Commit`/`Tag` split) and
//! `libbit::signature` (author/tagger representation), adapted from a custom
//! git-like binary codec to `serde_json` bodies — the low-level codec is an
//! out-of-scope external concern here, so the wire format is whatever
//! `serde` produces for these types.

mod commit;
mod entity;
mod tag;
mod tree;

pub use commit::Commit;
pub use entity::{identity_keys, Entity, EntityKind, EntityList, Language};
pub use tag::TagObj;
pub use tree::{Tree, TreeEntry};

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// The file mode recorded for a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    File,
    Exec,
    Dir,
}

impl FileMode {
    pub fn is_dir(self) -> bool {
        matches!(self, FileMode::Dir)
    }

    /// The Unix permission bits this mode should be materialized with.
    pub fn perm(self) -> u32 {
        match self {
            FileMode::Exec => 0o755,
            FileMode::File | FileMode::Dir => 0o644,
        }
    }

    pub fn from_unix_perm(mode: u32, is_dir: bool) -> Self {
        if is_dir {
            FileMode::Dir
        } else if mode & 0o111 != 0 {
            FileMode::Exec
        } else {
            FileMode::File
        }
    }
}

impl Display for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FileMode::File => write!(f, "file"),
            FileMode::Exec => write!(f, "exec"),
            FileMode::Dir => write!(f, "dir"),
        }
    }
}

/// Author / tagger identity, matching `libbit::signature::BitSignature` but
/// carrying the timezone offset in minutes, per §6's `±HHMM` rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// seconds since the Unix epoch
    pub time: i64,
    /// timezone offset in minutes, e.g. `-420` for `-0700`
    pub offset_minutes: i32,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, time: i64, offset_minutes: i32) -> Self {
        Self { name: name.into(), email: email.into(), time, offset_minutes }
    }

    /// `<name> <email> <unix> <tz±HHMM>`
    pub fn to_payload_line(&self) -> String {
        format!("{} <{}> {} {}", self.name, self.email, self.time, self.tz_string())
    }

    pub fn tz_string(&self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.abs();
        format!("{}{:02}{:02}", sign, abs / 60, abs % 60)
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

impl FromStr for Signature {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "<name> <email> <unix> <tz>"
        let open = s.find('<').ok_or_else(|| crate::error::Error::Other(format!("invalid signature `{s}`")))?;
        let close = s.find('>').ok_or_else(|| crate::error::Error::Other(format!("invalid signature `{s}`")))?;
        let name = s[..open].trim().to_owned();
        let email = s[open + 1..close].to_owned();
        let rest = s[close + 1..].trim();
        let mut parts = rest.split_whitespace();
        let time = parts
            .next()
            .and_then(|p| p.parse::<i64>().ok())
            .ok_or_else(|| crate::error::Error::Other(format!("invalid signature time in `{s}`")))?;
        let tz = parts.next().unwrap_or("+0000");
        let offset_minutes = parse_tz_offset(tz);
        Ok(Self { name, email, time, offset_minutes })
    }
}

fn parse_tz_offset(tz: &str) -> i32 {
    if tz.len() < 5 {
        return 0;
    }
    let sign = if tz.starts_with('-') { -1 } else { 1 };
    let hours: i32 = tz[1..3].parse().unwrap_or(0);
    let minutes: i32 = tz[3..5].parse().unwrap_or(0);
    sign * (hours * 60 + minutes)
}

/// The five persisted object kinds, used as the type tag in the store's
/// `"<kind> <len>\0"` header and as directory names under `objects/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
    Entity,
    EntityList,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
            ObjectKind::Tag => "tag",
            ObjectKind::Entity => "entity",
            ObjectKind::EntityList => "entity_list",
        }
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
