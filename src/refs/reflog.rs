//! Reflog line codec and append/read operations (§3, §4.1 step 6, §6).
//!
//! Grounded on `libbit::refs::reflog` (`BitReflogEntry`'s `FromStr`/`Serialize`
//! pair) but using this spec's line shape: `<old> <new> <unix> <reason>\n`
//! (no committer field — the spec does not carry one in the reflog line).

use crate::error::{Error, Result};
use crate::hash::Hash;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old: Option<Hash>,
    pub new: Hash,
    pub timestamp: i64,
    pub reason: String,
}

fn zero_hash_hex() -> String {
    "0".repeat(crate::hash::HASH_HEX_LEN)
}

impl ReflogEntry {
    pub fn to_line(&self) -> String {
        let old = self.old.map(|h| h.to_hex()).unwrap_or_else(zero_hash_hex);
        format!("{} {} {} {}\n", old, self.new.to_hex(), self.timestamp, self.reason)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        let mut parts = line.splitn(4, ' ');
        let old_s = parts.next().ok_or_else(|| Error::Other("empty reflog line".into()))?;
        let new_s = parts.next().ok_or_else(|| Error::Other(format!("malformed reflog line `{line}`")))?;
        let ts_s = parts.next().ok_or_else(|| Error::Other(format!("malformed reflog line `{line}`")))?;
        let reason = parts.next().unwrap_or("").trim_end().to_owned();
        let old = if old_s == zero_hash_hex() { None } else { Some(old_s.parse()?) };
        let new = new_s.parse()?;
        let timestamp: i64 = ts_s.parse().map_err(|_| Error::Other(format!("bad timestamp in `{line}`")))?;
        Ok(Self { old, new, timestamp, reason })
    }
}

/// Appends a single reflog entry to `logs/<ref_path>`, creating parent
/// directories as needed. This is a plain append, not CAS'd — the ref's own
/// update already serialized concurrent writers.
pub fn append(logs_dir: &Path, ref_path: &str, entry: &ReflogEntry) -> Result<()> {
    let path = logs_dir.join(ref_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io("create_dir_all", parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::io("reflog_append", &path, e))?;
    file.write_all(entry.to_line().as_bytes()).map_err(|e| Error::io("reflog_append", &path, e))?;
    Ok(())
}

/// Reads all entries for `ref_path`, newest-first, truncated to `limit`.
pub fn read(logs_dir: &Path, ref_path: &str, limit: usize) -> Result<Vec<ReflogEntry>> {
    let path = logs_dir.join(ref_path);
    let contents = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io("reflog_read", &path, e)),
    };
    let mut entries = contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(ReflogEntry::from_line)
        .collect::<Result<Vec<_>>>()?;
    entries.reverse();
    entries.truncate(limit);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> Hash {
        crate::hash::hash_object("blob", &[n])
    }

    #[test]
    fn roundtrips_through_line_format() {
        let entry = ReflogEntry { old: None, new: h(1), timestamp: 1000, reason: "commit: initial".into() };
        let line = entry.to_line();
        assert!(line.starts_with(&zero_hash_hex()));
        let parsed = ReflogEntry::from_line(line.trim_end()).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn append_then_read_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let e1 = ReflogEntry { old: None, new: h(1), timestamp: 1, reason: "branch: create".into() };
        let e2 = ReflogEntry { old: Some(h(1)), new: h(2), timestamp: 2, reason: "commit: second".into() };
        append(dir.path(), "refs/heads/main", &e1).unwrap();
        append(dir.path(), "refs/heads/main", &e2).unwrap();
        let entries = read(dir.path(), "refs/heads/main", 10).unwrap();
        assert_eq!(entries, vec![e2, e1]);
    }

    #[test]
    fn read_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(dir.path(), "refs/heads/nope", 10).unwrap().is_empty());
    }
}
