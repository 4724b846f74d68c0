// Claude implementation of the fix backend

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{BackendError, FixBackend, FixRequest};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

impl MessageResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Claude API client for fix generation. One bounded HTTP request per
/// `generate_fix` call; no retries here.
pub struct ClaudeBackend {
    client: Client,
    api_key: String,
    model: String,
}

impl ClaudeBackend {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl FixBackend for ClaudeBackend {
    async fn generate_fix(&self, request: &FixRequest) -> Result<String, BackendError> {
        let body = MessageRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt(),
            }],
        };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http(format!("{status}: {body}")));
        }

        let parsed: MessageResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Invalid(e.to_string()))?;

        let text = parsed.text().trim().to_string();
        if text.is_empty() {
            return Err(BackendError::Invalid("empty completion".to_string()));
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "claude"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_builds() {
        let backend = ClaudeBackend::new(
            "test-key".to_string(),
            "claude-sonnet-4-20250514".to_string(),
            Duration::from_secs(30),
        );
        assert!(backend.is_ok());
    }

    #[test]
    fn test_response_text_skips_non_text_blocks() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "use foo;"},
                {"type": "tool_use", "id": "x", "name": "n", "input": {}}
            ]
        }"#;
        let resp: MessageResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.text(), "use foo;");
    }
}
