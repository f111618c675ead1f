//! `config.json`: a plain `{ "remotes": { name: url } }` document (§6), read
//! and written as a whole — no partial-update merging.
//!
//! Grounded on the index's own JSON-via-`atomic_write` persistence style.

use crate::error::{Error, Result};
use crate::lockfile::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remotes: BTreeMap<String, String>,
}

pub fn read_config(path: &Path) -> Result<Config> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(Error::io("read_config", path, e)),
    }
}

pub fn write_config(path: &Path, config: &Config) -> Result<()> {
    let body = serde_json::to_vec_pretty(config)?;
    atomic_write(path, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_config(&dir.path().join("config.json")).unwrap();
        assert!(config.remotes.is_empty());
    }

    #[test]
    fn roundtrips_remotes_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.remotes.insert("origin".into(), "https://example.com/repo.got".into());
        write_config(&path, &config).unwrap();
        let loaded = read_config(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
