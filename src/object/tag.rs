//! Annotated tag objects. Lightweight tags are plain refs and have no `TagObj`.

use crate::hash::Hash;
use crate::object::Signature;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagObj {
    pub target_hash: Hash,
    pub data: Vec<u8>,
}

impl TagObj {
    /// Renders the canonical annotated-tag payload:
    /// `object`, `type`, `tag`, `tagger <who> <unix> <tz>`, blank line, message.
    pub fn render(target_hash: Hash, target_type: &str, name: &str, tagger: &Signature, message: &str) -> Self {
        let mut msg = message.to_owned();
        if !msg.ends_with('\n') {
            msg.push('\n');
        }
        let payload = format!(
            "object {target}\ntype {ty}\ntag {name}\ntagger {tagger}\n\n{msg}",
            target = target_hash,
            ty = target_type,
            name = name,
            tagger = tagger.to_payload_line(),
            msg = msg,
        );
        Self { target_hash, data: payload.into_bytes() }
    }
}
