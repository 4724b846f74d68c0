// Generative backend collaborator
//
// The fix loop talks to its backend through the `FixBackend` trait, so
// tests can script responses and the production path can swap providers.
// Errors are typed: the fix loop maps every variant to a retry, it never
// inspects HTTP details.

mod claude;

pub use claude::ClaudeBackend;

use async_trait::async_trait;
use thiserror::Error;

/// Backend failure taxonomy. All variants are recoverable from the fix
/// loop's point of view; they feed its retry/backoff policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend rate limited")]
    RateLimited,
    #[error("backend request timed out")]
    Timeout,
    #[error("backend returned invalid output: {0}")]
    Invalid(String),
    #[error("backend request failed: {0}")]
    Http(String),
}

/// Everything the backend needs to propose a fix.
#[derive(Debug, Clone)]
pub struct FixRequest {
    pub diagnostic_message: String,
    pub context: String,
    pub language: String,
}

impl FixRequest {
    /// Render the request as a backend prompt. The instructions pin the
    /// response format so the reply can be applied verbatim.
    pub fn prompt(&self) -> String {
        format!(
            "The following {} code produces this diagnostic:\n\n\
             {}\n\n\
             Code context:\n```{}\n{}\n```\n\n\
             Reply with only the corrected replacement for the flagged code. \
             No explanation, no markdown fences.",
            self.language, self.diagnostic_message, self.language, self.context
        )
    }
}

/// A generative backend that proposes replacement text for a diagnostic.
#[async_trait]
pub trait FixBackend: Send + Sync {
    /// Produce replacement text for the flagged code. One call per attempt;
    /// retry policy lives in the fix loop's state machine, not here.
    async fn generate_fix(&self, request: &FixRequest) -> Result<String, BackendError>;

    /// Provider name for logs (e.g., "claude").
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_carries_diagnostic_and_context() {
        let req = FixRequest {
            diagnostic_message: "unused import 'java.util.List'".to_string(),
            context: "import java.util.List;".to_string(),
            language: "java".to_string(),
        };
        let prompt = req.prompt();
        assert!(prompt.contains("unused import"));
        assert!(prompt.contains("```java"));
        assert!(prompt.contains("import java.util.List;"));
    }
}
