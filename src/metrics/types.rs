// Metrics data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal-state record for one fix attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcomeMetric {
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the file id, for privacy.
    pub file_hash: String,
    /// "done" or "abandoned".
    pub outcome: String,
    pub attempts: u32,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

impl FixOutcomeMetric {
    pub fn new(
        file_hash: String,
        outcome: String,
        attempts: u32,
        from_cache: bool,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            file_hash,
            outcome,
            attempts,
            from_cache,
            elapsed_ms,
        }
    }
}

/// Session lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEventMetric {
    pub timestamp: DateTime<Utc>,
    pub session_hash: String,
    /// "join" or "leave".
    pub event: String,
}

impl SessionEventMetric {
    pub fn new(session_hash: String, event: String) -> Self {
        Self {
            timestamp: Utc::now(),
            session_hash,
            event,
        }
    }
}
