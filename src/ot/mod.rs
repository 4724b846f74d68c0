// Operation log and transform engine
//
// A document is an ordered log of text operations. Stale operations
// (authored against an older revision) are rewritten against everything
// appended since, with deterministic tie-breaks, so every replica that
// receives the same set of operations converges on identical content.

mod log;
mod operation;
mod transform;

pub use log::{Applied, OperationLog, SubmitError};
pub use operation::{apply_edits, Edit, Operation, Origin};
pub use transform::transform_operation;
