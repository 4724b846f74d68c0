// Metrics module
// Public interface for logging fix and session events

mod logger;
mod types;

pub use logger::MetricsLogger;
pub use types::{FixOutcomeMetric, SessionEventMetric};
