//! Commits: grounded on `libbit::obj::commit`, flattened to this spec's fields
//! (`tree_hash`, `parents`, `author`, `timestamp`, `message`, optional `signature`).

use crate::hash::Hash;
use crate::object::Signature;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree_hash: Hash,
    pub parents: Vec<Hash>,
    pub author: Signature,
    pub timestamp: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

impl Commit {
    pub fn first_parent(&self) -> Option<Hash> {
        self.parents.first().copied()
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// The canonical bytes a signer signs over: every field except `signature`
    /// itself, so attaching a signature never changes what was signed.
    pub fn signing_payload(&self) -> Vec<u8> {
        let unsigned = Commit { signature: None, ..self.clone() };
        serde_json::to_vec(&unsigned).expect("commit always serializes")
    }
}
