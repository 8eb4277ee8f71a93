//! Anthropic completion provider implementation

use super::client::AnthropicClient;
use super::types::{ContentBlock, Message, MessageRequest, MessageResponse};
use crate::{CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use tabletalk_core::TabletalkResult;
use tracing::debug;

/// Completion provider backed by the Anthropic Messages API.
pub struct AnthropicCompletionProvider {
    client: AnthropicClient,
    model: String,
}

impl AnthropicCompletionProvider {
    /// Create a new Anthropic completion provider.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g., "claude-sonnet-4-20250514")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: AnthropicClient::new(api_key, 50),
            model: model.into(),
        }
    }

    /// Create with a preconfigured client (custom base URL, rate limit).
    pub fn with_client(client: AnthropicClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Extract text from content blocks.
    fn extract_text(content: Vec<ContentBlock>) -> String {
        content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl CompletionProvider for AnthropicCompletionProvider {
    async fn complete(&self, request: CompletionRequest) -> TabletalkResult<String> {
        let api_request = MessageRequest {
            model: self.model.clone(),
            system: request.system,
            messages: request
                .messages
                .into_iter()
                .map(|m| Message {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response: MessageResponse = self.client.request("messages", api_request).await?;
        debug!(
            model = %self.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = response.stop_reason.as_deref().unwrap_or("none"),
            "completion received"
        );

        Ok(Self::extract_text(response.content))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for AnthropicCompletionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicCompletionProvider")
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_joins_blocks() {
        let content = vec![
            ContentBlock::Text {
                text: "line one".to_string(),
            },
            ContentBlock::Text {
                text: "line two".to_string(),
            },
        ];
        assert_eq!(
            AnthropicCompletionProvider::extract_text(content),
            "line one\nline two"
        );
    }

    #[test]
    fn test_model_id_reported() {
        let provider = AnthropicCompletionProvider::new("key", "claude-sonnet-4-20250514");
        assert_eq!(provider.model_id(), "claude-sonnet-4-20250514");
    }
}
