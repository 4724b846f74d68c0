// Operation and edit types
//
// An operation is an immutable, ordered set of insert/delete edits authored
// against a known base revision. Edit positions are character offsets into
// the document as it looked at that revision; transformation never mutates
// an operation in place, it produces a new one.

use serde::{Deserialize, Serialize};

/// Reserved origin key for operations produced by the fix loop.
pub const FIXLOOP_ORIGIN: &str = "fixloop";

/// Who authored an operation: a human participant or the fix loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Origin {
    Participant(String),
    FixLoop,
}

impl Origin {
    /// Stable string key for this origin. Used on the wire and as the
    /// total order for insert/insert tie-breaks.
    pub fn key(&self) -> &str {
        match self {
            Origin::Participant(id) => id,
            Origin::FixLoop => FIXLOOP_ORIGIN,
        }
    }
}

impl From<String> for Origin {
    fn from(s: String) -> Self {
        if s == FIXLOOP_ORIGIN {
            Origin::FixLoop
        } else {
            Origin::Participant(s)
        }
    }
}

impl From<Origin> for String {
    fn from(o: Origin) -> Self {
        o.key().to_string()
    }
}

/// A primitive edit. Positions and lengths are in characters, addressed
/// against the operation's base revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Edit {
    Insert { pos: usize, text: String },
    Delete { pos: usize, len: usize },
}

impl Edit {
    /// Create an insert edit.
    pub fn insert(pos: usize, text: impl Into<String>) -> Self {
        Edit::Insert {
            pos,
            text: text.into(),
        }
    }

    /// Create a delete edit.
    pub fn delete(pos: usize, len: usize) -> Self {
        Edit::Delete { pos, len }
    }

    /// Base-coordinate position of this edit.
    pub fn pos(&self) -> usize {
        match self {
            Edit::Insert { pos, .. } => *pos,
            Edit::Delete { pos, .. } => *pos,
        }
    }
}

/// An immutable set of edits authored against `base_revision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub origin: Origin,
    pub base_revision: u64,
    pub edits: Vec<Edit>,
}

impl Operation {
    pub fn new(origin: Origin, base_revision: u64, edits: Vec<Edit>) -> Self {
        Self {
            origin,
            base_revision,
            edits,
        }
    }

    /// True when the operation carries no edits. Empty operations are legal
    /// (a fully-transformed-away delete degenerates to this) and append as
    /// revision markers without touching content.
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

/// Apply a set of edits to `content`.
///
/// All positions address `content` as-is (the operation's base state), so
/// edits are applied highest-position-first; earlier edits then never shift
/// the positions of later ones. Two inserts at the same position land in
/// list order. Out-of-range positions clamp to the end of the document
/// rather than panicking.
pub fn apply_edits(content: &str, edits: &[Edit]) -> String {
    let mut indices: Vec<usize> = (0..edits.len()).collect();
    indices.sort_by(|&a, &b| {
        edits[b]
            .pos()
            .cmp(&edits[a].pos())
            .then_with(|| b.cmp(&a))
    });

    let mut out = content.to_string();
    for idx in indices {
        match &edits[idx] {
            Edit::Insert { pos, text } => {
                let at = char_to_byte(&out, *pos);
                out.insert_str(at, text);
            }
            Edit::Delete { pos, len } => {
                let start = char_to_byte(&out, *pos);
                let end = char_to_byte(&out, pos + len);
                out.replace_range(start..end, "");
            }
        }
    }
    out
}

/// Byte offset of the `char_pos`-th character, clamped to the end.
fn char_to_byte(s: &str, char_pos: usize) -> usize {
    s.char_indices()
        .nth(char_pos)
        .map(|(byte, _)| byte)
        .unwrap_or(s.len())
}
