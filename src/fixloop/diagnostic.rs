// Normalized diagnostic record
//
// Everything the IDE-side collaborator pushes is flattened into this fixed
// shape at the gateway before the core sees it; nothing downstream deals
// with editor-specific diagnostic objects.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Session/file id the diagnostic belongs to.
    pub file_id: String,
    pub message: String,
    /// Character range the diagnostic covers, `(start, end)`.
    pub range: (u64, u64),
    /// Language or loader id (e.g., "java", "rust").
    pub language: String,
}

impl Diagnostic {
    pub fn new(
        file_id: impl Into<String>,
        message: impl Into<String>,
        range: (u64, u64),
        language: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            message: message.into(),
            range,
            language: language.into(),
        }
    }
}
