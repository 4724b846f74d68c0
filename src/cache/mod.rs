// Pattern cache
//
// Content-addressed store mapping a normalized (diagnostic, code context)
// signature to a previously accepted fix, so the fix loop can skip the
// backend for problems it has already solved. Single-threaded owner behind
// a request channel; LRU eviction; poison removal after repeated failures.

mod owner;
mod signature;
mod store;

pub use owner::CacheHandle;
pub use signature::{context_window, normalize_message, signature, CONTEXT_RADIUS};
pub use store::{CacheStats, CachedFix, PatternCache};
