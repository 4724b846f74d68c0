// Operational transform rules
//
// Rewrites an operation authored against revision R so that it applies
// cleanly after another operation that was appended at R. Both operations
// address the same base document; the result addresses the document after
// the applied operation. Determinism notes:
//
//   - Insert vs Insert at the same position: tie-broken by lexicographic
//     order of the origins' string keys; the lower key's text lands first.
//     Every replica resolves the tie identically. This is a stated
//     contract, not an implementation detail.
//   - Insert vs Delete: an insert inside a deleted range survives, clamped
//     to the start of the deletion.
//   - Delete vs Delete: overlapping ranges intersect; the portion already
//     removed is dropped, so nothing is ever deleted twice.

use super::operation::{Edit, Operation};

/// Transform `op` against `applied`, where `applied` is the operation that
/// was appended at `op.base_revision`. Returns a new operation addressing
/// the post-`applied` document, with `base_revision` advanced by one.
pub fn transform_operation(op: &Operation, applied: &Operation) -> Operation {
    let my_key = op.origin.key();
    let their_key = applied.origin.key();

    let mut edits = Vec::with_capacity(op.edits.len());
    for edit in &op.edits {
        match edit {
            Edit::Insert { pos, text } => {
                // A concurrent insert at exactly our position displaces us
                // only when its origin key sorts lower.
                let count_ties = their_key < my_key;
                edits.push(Edit::Insert {
                    pos: map_position(*pos, &applied.edits, count_ties),
                    text: text.clone(),
                });
            }
            Edit::Delete { pos, len } => {
                transform_delete(*pos, *len, &applied.edits, &mut edits);
            }
        }
    }

    Operation::new(op.origin.clone(), op.base_revision + 1, edits)
}

/// Map a base-coordinate position through every edit of the applied
/// operation. The applied edits are disjoint in base coordinates, so each
/// contributes an independent shift. A position inside an applied deletion
/// clamps to the deletion's start. `count_ties` decides whether an applied
/// insert at exactly this position displaces it.
fn map_position(p: usize, applied: &[Edit], count_ties: bool) -> usize {
    let mut shift: isize = 0;
    for edit in applied {
        match edit {
            Edit::Insert { pos: q, text } => {
                if *q < p || (*q == p && count_ties) {
                    shift += text.chars().count() as isize;
                }
            }
            Edit::Delete { pos: q, len } => {
                if q + len <= p {
                    shift -= *len as isize;
                } else if *q < p {
                    // Inside the deleted range: clamp to its start.
                    shift -= (p - q) as isize;
                }
            }
        }
    }
    (p as isize + shift) as usize
}

/// Transform one delete range against the applied operation's edits.
///
/// Portions already removed by an applied delete are dropped. An applied
/// insert strictly inside the range splits it, so the inserted text
/// survives. Surviving pieces are emitted in ascending position order; a
/// fully-covered delete emits nothing.
fn transform_delete(pos: usize, len: usize, applied: &[Edit], out: &mut Vec<Edit>) {
    if len == 0 {
        return;
    }

    // Subtract every applied deletion from [pos, pos + len).
    let mut survivors: Vec<(usize, usize)> = vec![(pos, pos + len)];
    for edit in applied {
        if let Edit::Delete { pos: q, len: l } = edit {
            let (ds, de) = (*q, q + l);
            let mut next = Vec::with_capacity(survivors.len() + 1);
            for (s, e) in survivors {
                if de <= s || ds >= e {
                    next.push((s, e));
                    continue;
                }
                if ds > s {
                    next.push((s, ds));
                }
                if de < e {
                    next.push((de, e));
                }
            }
            survivors = next;
        }
    }

    // Split the survivors at applied insert positions that fall strictly
    // inside, so the inserted text is not swallowed.
    for edit in applied {
        if let Edit::Insert { pos: q, .. } = edit {
            let mut next = Vec::with_capacity(survivors.len() + 1);
            for (s, e) in survivors {
                if *q > s && *q < e {
                    next.push((s, *q));
                    next.push((*q, e));
                } else {
                    next.push((s, e));
                }
            }
            survivors = next;
        }
    }

    for (s, e) in survivors {
        // An applied insert at the piece's start stays in front of it, so
        // ties count toward the shift.
        out.push(Edit::Delete {
            pos: map_position(s, applied, true),
            len: e - s,
        });
    }
}
