//! TABLETALK LLM - Completion Abstraction Layer
//!
//! Provider-agnostic trait for single request/response text completion.
//! The pipeline treats the model as "given a prompt, return text, or
//! fail"; provider implementations live under `providers`. A scripted
//! mock provider is included so the pipeline can be tested with
//! deterministic fixtures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tabletalk_core::{LlmError, TabletalkResult};

pub mod providers;

pub use providers::anthropic::AnthropicCompletionProvider;

// ============================================================================
// COMPLETION TYPES
// ============================================================================

/// A chat message within a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A provider-agnostic completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System instruction, kept separate from the message turns.
    pub system: Option<String>,
    /// Conversation turns, oldest first; the last entry is the prompt.
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// A single-turn request with a system instruction.
    pub fn single(system: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: Some(system.into()),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens,
            temperature: None,
        }
    }
}

// ============================================================================
// COMPLETION PROVIDER TRAIT
// ============================================================================

/// Trait for text-completion providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete the request, returning the model's text output.
    ///
    /// # Returns
    /// * `Ok(String)` - The completion text
    /// * `Err(TabletalkError::Llm)` - If the provider call fails
    async fn complete(&self, request: CompletionRequest) -> TabletalkResult<String>;

    /// Identifier of the backing model (for logs and diagnostics).
    fn model_id(&self) -> &str;
}

// ============================================================================
// MOCK PROVIDER FOR TESTING
// ============================================================================

/// Scripted completion provider for deterministic tests.
///
/// Responses are played back in order; every request is recorded so
/// tests can assert on prompt contents (e.g. that a correction prompt
/// carries the prior descriptor and error).
#[derive(Debug, Default)]
pub struct MockCompletionProvider {
    responses: Mutex<VecDeque<TabletalkResult<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful completion.
    pub fn push_response(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(text.into()));
    }

    /// Queue a transport failure.
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(LlmError::Transport {
                provider: "mock".to_string(),
                reason: reason.into(),
            }
            .into()));
    }

    /// All requests seen so far, in call order.
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of completions served.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(&self, request: CompletionRequest) -> TabletalkResult<String> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request);
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(LlmError::InvalidResponse {
                    provider: "mock".to_string(),
                    reason: "no scripted response left".to_string(),
                }
                .into())
            })
    }

    fn model_id(&self) -> &str {
        "mock-completion"
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
