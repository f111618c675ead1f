//! The entity extractor: an out-of-scope external collaborator (§1), defined
//! here only as the trait boundary plus one concrete extractor used by this
//! crate's own tests and scenario fixtures.
//!
//! Grounded on `libbit::obj`'s use of trait objects at the `BitObj` boundary
//! for swappable object behavior; the regex-based Go-like recognizer is
//! grounded on `other_examples`' extraction-by-regex style seen across the
//! pack's language-tooling files.

use crate::object::{Entity, EntityKind, Language};
use lazy_static::lazy_static;
use regex::Regex;

/// Maps file bytes to an ordered list of entities plus the recognized
/// language, and back again. Implementations are language-specific parsers;
/// this crate treats extraction failure (`extract` returning `None`) as "no
/// entity structure", never fatal (§9).
pub trait Extractor {
    fn language(&self) -> Language;

    fn extract(&self, path: &str, bytes: &[u8]) -> Option<Vec<Entity>>;

    /// Inverse of `extract`: renders a (possibly edited) entity list back to
    /// file bytes, used by cherry-pick's synthetic `theirs` construction.
    fn reconstruct(&self, entities: &[Entity]) -> Vec<u8>;
}

lazy_static! {
    static ref FUNC_RE: Regex = Regex::new(r"(?ms)^func\s+(?:\((\w+)\s+\*?\w+\)\s+)?(\w+)\s*\{(.*?)\n\}").unwrap();
}

/// Recognizes a deliberately simplified `func Name(){ ... }` / `func (r T)
/// Name(){ ... }` syntax — enough to exercise continuity, blame, and
/// cherry-pick tests without depending on a real Go parser.
pub struct GoLikeExtractor;

impl Extractor for GoLikeExtractor {
    fn language(&self) -> Language {
        Language::Go
    }

    fn extract(&self, _path: &str, bytes: &[u8]) -> Option<Vec<Entity>> {
        let text = std::str::from_utf8(bytes).ok()?;
        let mut entities = Vec::new();
        for cap in FUNC_RE.captures_iter(text) {
            let receiver = cap.get(1).map(|m| m.as_str().to_owned());
            let name = cap[2].to_owned();
            let body = format!("{{{}\n}}", &cap[3]);
            let signature = match &receiver {
                Some(r) => format!("func ({r}) {name}()"),
                None => format!("func {name}()"),
            };
            entities.push(Entity::new(EntityKind::Declaration, name, "func", receiver, body.into_bytes(), signature));
        }
        if entities.is_empty() { None } else { Some(entities) }
    }

    fn reconstruct(&self, entities: &[Entity]) -> Vec<u8> {
        let mut out = String::new();
        for entity in entities {
            let body = String::from_utf8_lossy(&entity.body);
            match &entity.receiver {
                Some(r) => out.push_str(&format!("func ({r} T) {}{}\n", entity.name, body)),
                None => out.push_str(&format!("func {}{}\n", entity.name, body)),
            }
            out.push('\n');
        }
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_function() {
        let ex = GoLikeExtractor;
        let src = b"func Target(){\nreturn 1\n}\n";
        let entities = ex.extract("main.go", src).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Target");
        assert!(entities[0].receiver.is_none());
    }

    #[test]
    fn extracts_method_with_receiver() {
        let ex = GoLikeExtractor;
        let src = b"func (s Server) Handle(){\nreturn\n}\n";
        let entities = ex.extract("main.go", src).unwrap();
        assert_eq!(entities[0].receiver.as_deref(), Some("s"));
    }

    #[test]
    fn no_functions_yields_none() {
        let ex = GoLikeExtractor;
        assert!(ex.extract("main.go", b"package main\n").is_none());
    }

    #[test]
    fn duplicate_bodies_get_distinct_body_hashes_when_edited() {
        let ex = GoLikeExtractor;
        let src = b"func Target(){\nreturn 99\n}\nfunc Target(){\nreturn 1\n}\n";
        let entities = ex.extract("main.go", src).unwrap();
        assert_eq!(entities.len(), 2);
        assert_ne!(entities[0].body_hash, entities[1].body_hash);
    }
}
