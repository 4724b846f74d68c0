// Operation log
//
// Owns the materialized document content and the ordered log of applied
// operations. `submit` is the only entry point: a stale operation is
// transformed against everything appended since its base revision, then
// appended at the head. The content always equals the base text with every
// logged operation applied once, in log order, and the revision equals the
// log length.

use thiserror::Error;

use super::operation::{apply_edits, Edit, Operation};
use super::transform::transform_operation;

/// Submission failure. `UnknownRevision` means the author referenced a
/// revision this log never issued, a protocol violation that is fatal for
/// the offending connection, never for the session. `Unresolvable` means
/// transformation produced edits that fall outside the document; the
/// deterministic rules make this unreachable in theory, and a session that
/// observes it is flagged for a full resync instead of applying garbage.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("operation references unknown revision {requested} (head is {head})")]
    UnknownRevision { requested: u64, head: u64 },
    #[error("edit at {pos} does not fit document of {doc_len} chars")]
    Unresolvable { pos: usize, doc_len: usize },
}

/// A successfully applied operation: the revision it produced and the
/// operation as appended (after transformation), ready for broadcast.
#[derive(Debug, Clone)]
pub struct Applied {
    pub revision: u64,
    pub operation: Operation,
}

/// Ordered log of operations plus the materialized content they produce.
#[derive(Debug, Default)]
pub struct OperationLog {
    content: String,
    ops: Vec<Operation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a log from existing document text.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ops: Vec::new(),
        }
    }

    /// Current revision: the number of operations applied so far.
    pub fn revision(&self) -> u64 {
        self.ops.len() as u64
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Current content and revision, for late joiners.
    pub fn snapshot(&self) -> (String, u64) {
        (self.content.clone(), self.revision())
    }

    /// Submit an operation. Applies directly when authored at the head;
    /// otherwise transforms it against every operation appended since its
    /// base revision, in log order, before appending.
    pub fn submit(&mut self, op: Operation) -> Result<Applied, SubmitError> {
        let head = self.revision();
        if op.base_revision > head {
            return Err(SubmitError::UnknownRevision {
                requested: op.base_revision,
                head,
            });
        }

        let mut current = op;
        for idx in current.base_revision..head {
            current = transform_operation(&current, &self.ops[idx as usize]);
        }

        // Every edit must address the current document. All positions are
        // relative to the operation's (now fully transformed) base, so
        // inserts do not widen the range available to sibling edits.
        let doc_len = self.content.chars().count();
        for edit in &current.edits {
            let end = match edit {
                Edit::Insert { pos, .. } => *pos,
                Edit::Delete { pos, len } => pos + len,
            };
            if end > doc_len {
                return Err(SubmitError::Unresolvable { pos: end, doc_len });
            }
        }

        self.content = apply_edits(&self.content, &current.edits);
        self.ops.push(current.clone());

        Ok(Applied {
            revision: self.revision(),
            operation: current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::operation::{Edit, Origin};

    fn op(origin: &str, rev: u64, edits: Vec<Edit>) -> Operation {
        Operation::new(Origin::Participant(origin.to_string()), rev, edits)
    }

    #[test]
    fn test_submit_at_head_applies_directly() {
        let mut log = OperationLog::with_content("hello");
        let applied = log.submit(op("a", 0, vec![Edit::insert(5, " world")])).unwrap();
        assert_eq!(applied.revision, 1);
        assert_eq!(log.content(), "hello world");
        assert_eq!(log.revision(), 1);
    }

    #[test]
    fn test_stale_submit_is_transformed() {
        let mut log = OperationLog::with_content("abc");
        log.submit(op("a", 0, vec![Edit::insert(0, "XX")])).unwrap();

        // Authored against revision 0, unaware of the two-char prefix.
        let applied = log.submit(op("b", 0, vec![Edit::insert(3, "!")])).unwrap();
        assert_eq!(applied.revision, 2);
        assert_eq!(applied.operation.edits, vec![Edit::insert(5, "!")]);
        assert_eq!(log.content(), "XXabc!");
    }

    #[test]
    fn test_future_revision_is_rejected() {
        let mut log = OperationLog::new();
        let err = log.submit(op("a", 3, vec![Edit::insert(0, "x")])).unwrap_err();
        assert_eq!(
            err,
            SubmitError::UnknownRevision {
                requested: 3,
                head: 0
            }
        );
        // The log is untouched.
        assert_eq!(log.revision(), 0);
    }

    #[test]
    fn test_concurrent_inserts_converge_across_delivery_orders() {
        let seed = |content: &str| {
            let mut log = OperationLog::with_content(content.to_string());
            (0..10).for_each(|i| {
                log.submit(op("seed", i, vec![])).unwrap();
            });
            log
        };

        let a = op("alice", 10, vec![Edit::insert(5, "x")]);
        let b = op("bob", 10, vec![Edit::insert(5, "y")]);

        let mut log1 = seed("0123456789");
        log1.submit(a.clone()).unwrap();
        log1.submit(b.clone()).unwrap();

        let mut log2 = seed("0123456789");
        log2.submit(b).unwrap();
        log2.submit(a).unwrap();

        assert_eq!(log1.content(), log2.content());
        assert_eq!(log1.content(), "01234xy56789");
        assert_eq!(log1.revision(), 12);
        assert_eq!(log2.revision(), 12);
    }

    #[test]
    fn test_out_of_bounds_edit_is_unresolvable() {
        let mut log = OperationLog::with_content("abc");
        let err = log
            .submit(op("a", 0, vec![Edit::delete(1, 10)]))
            .unwrap_err();
        assert_eq!(err, SubmitError::Unresolvable { pos: 11, doc_len: 3 });
        assert_eq!(log.content(), "abc");
        assert_eq!(log.revision(), 0);
    }

    #[test]
    fn test_empty_operation_is_a_revision_marker() {
        let mut log = OperationLog::with_content("abc");
        let applied = log.submit(op("a", 0, vec![])).unwrap();
        assert_eq!(applied.revision, 1);
        assert_eq!(log.content(), "abc");
    }
}
