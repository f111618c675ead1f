//! Entities: language-aware declarations extracted from a file by the (external) extractor.

use crate::hash::{hash_object, Hash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// a named top-level or method-level declaration
    Declaration,
    /// anything else the extractor chooses to surface (imports, comments, ...)
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
    pub decl_kind: String,
    pub receiver: Option<String>,
    pub body: Vec<u8>,
    pub body_hash: Hash,
    pub signature: String,
}

impl Entity {
    /// Builds an entity from its body, deriving `body_hash` from the body bytes.
    pub fn new(
        kind: EntityKind,
        name: impl Into<String>,
        decl_kind: impl Into<String>,
        receiver: Option<String>,
        body: Vec<u8>,
        signature: impl Into<String>,
    ) -> Self {
        let body_hash = hash_object(crate::object::ObjectKind::Blob.as_str(), &body);
        Self { kind, name: name.into(), decl_kind: decl_kind.into(), receiver, body, body_hash, signature: signature.into() }
    }

    pub fn recompute_body_hash(&mut self) {
        self.body_hash = hash_object(crate::object::ObjectKind::Blob.as_str(), &self.body);
    }

    /// Whitespace-collapsed signature, used as a continuity fallback key.
    pub fn normalized_signature(&self) -> String {
        self.signature.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// A stable string identifying this entity among duplicates in the same file,
    /// given its position (0-based) among entities sharing its
    /// `(kind, decl_kind, receiver, name)` triple.
    pub fn identity_key(&self, ordinal: usize) -> String {
        format!(
            "{:?}:{}:{}:{}#{}",
            self.kind,
            self.decl_kind,
            self.receiver.as_deref().unwrap_or(""),
            self.name,
            ordinal
        )
    }
}

/// Which per-language syntax the extractor parsed `path` as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Go,
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityList {
    pub language: Language,
    pub path: String,
    pub entity_refs: Vec<Hash>,
}

/// Computes the identity key for every entity in `entities`, handling
/// duplicate `(kind, decl_kind, receiver, name)` triples by order of appearance.
pub fn identity_keys(entities: &[Entity]) -> Vec<String> {
    let mut seen: std::collections::HashMap<(EntityKind, String, Option<String>, String), usize> =
        std::collections::HashMap::new();
    entities
        .iter()
        .map(|e| {
            let triple = (e.kind, e.decl_kind.clone(), e.receiver.clone(), e.name.clone());
            let ordinal = seen.entry(triple).or_insert(0);
            let key = e.identity_key(*ordinal);
            *ordinal += 1;
            key
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_get_distinct_ordinals() {
        let e = |n: &str| Entity::new(EntityKind::Declaration, n, "func", None, b"x".to_vec(), "sig");
        let entities = vec![e("Foo"), e("Foo"), e("Bar")];
        let keys = identity_keys(&entities);
        assert_eq!(keys[0], entities[0].identity_key(0));
        assert_eq!(keys[1], entities[1].identity_key(1));
        assert_ne!(keys[0], keys[1]);
        assert_eq!(keys[2], entities[2].identity_key(0));
    }
}
