//! Answer synthesis: query results back into natural language.
//!
//! The grounding rule is structural, not prompt-deep: the model is only
//! ever called when there are items to ground an answer in. Zero-item
//! results and failed pipelines get fixed, deterministic answers, so
//! there is no path on which the model can invent data.

use std::sync::Arc;
use tabletalk_core::{
    ConversationTurn, ExecutionOutcome, ExecutionResult, PipelineConfig, TabletalkResult,
};
use tabletalk_llm::{ChatMessage, CompletionProvider, CompletionRequest};
use tracing::debug;

/// Turns execution outcomes into user-facing answers.
pub struct AnswerSynthesizer {
    provider: Arc<dyn CompletionProvider>,
    result_item_cap: usize,
    history_window: usize,
    max_tokens: u32,
}

impl AnswerSynthesizer {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            result_item_cap: config.result_item_cap,
            history_window: config.history_window,
            max_tokens: config.answer_max_tokens,
        }
    }

    /// Synthesize an answer for the outcome of a completed pipeline.
    ///
    /// Only the non-empty success path consults the model; the other
    /// branches return canned text and cannot fail.
    pub async fn synthesize(
        &self,
        question: &str,
        history: &[ConversationTurn],
        outcome: &ExecutionOutcome,
    ) -> TabletalkResult<String> {
        match outcome {
            ExecutionOutcome::Failure(error) => {
                debug!("failed pipeline, returning deterministic answer: {}", error.message);
                Ok(failure_answer())
            }
            ExecutionOutcome::Success(result) if result.is_empty() => {
                debug!("zero-item result, returning deterministic answer");
                Ok(no_data_answer())
            }
            ExecutionOutcome::Success(result) => {
                self.synthesize_from_items(question, history, result).await
            }
        }
    }

    async fn synthesize_from_items(
        &self,
        question: &str,
        history: &[ConversationTurn],
        result: &ExecutionResult,
    ) -> TabletalkResult<String> {
        let request = CompletionRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: vec![ChatMessage::user(self.user_prompt(
                question, history, result,
            ))],
            max_tokens: self.max_tokens,
            temperature: None,
        };
        self.provider.complete(request).await
    }

    fn user_prompt(
        &self,
        question: &str,
        history: &[ConversationTurn],
        result: &ExecutionResult,
    ) -> String {
        let mut prompt = String::new();

        let start = history.len().saturating_sub(self.history_window);
        let recent = &history[start..];
        if !recent.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for turn in recent {
                prompt.push_str(&format!("{}: {}\n", turn.role.as_str(), turn.content));
            }
            prompt.push('\n');
        }

        let shown = result.items.len().min(self.result_item_cap);
        if shown < result.items.len() {
            prompt.push_str(&format!(
                "Query results (first {} of {} matching items; the answer may note \
                 that more exist):\n",
                shown,
                result.items.len()
            ));
        } else {
            prompt.push_str(&format!("Query results ({} matching items):\n", shown));
        }
        for item in result.items.iter().take(self.result_item_cap) {
            let line = serde_json::to_string(item).unwrap_or_else(|_| format!("{item:?}"));
            prompt.push_str(&line);
            prompt.push('\n');
        }
        if result.scanned_count > result.count {
            prompt.push_str(&format!(
                "({} items were examined to produce these results)\n",
                result.scanned_count
            ));
        }

        prompt.push_str(&format!("\nQuestion: {question}"));
        prompt
    }
}

impl std::fmt::Debug for AnswerSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerSynthesizer")
            .field("model", &self.provider.model_id())
            .field("result_item_cap", &self.result_item_cap)
            .finish()
    }
}

const SYSTEM_PROMPT: &str = "You answer questions about data that was just fetched \
    from a database. Use ONLY the query results provided in the message; never invent \
    attributes, values, or records that are not present. If the results do not contain \
    enough information to answer, say so plainly. Answer concisely in prose, using the \
    user's terms rather than raw attribute names where the mapping is obvious.";

/// Deterministic answer for an empty result set.
pub fn no_data_answer() -> String {
    "I ran the query, but it returned no matching records. The data may not exist, \
     or the question may need different criteria (for example another ID, date range, \
     or spelling)."
        .to_string()
}

/// Deterministic answer once the attempt budget is exhausted. Carries
/// no diagnostics; those belong in the response's error detail, not in
/// user-facing prose.
pub fn failure_answer() -> String {
    "I wasn't able to retrieve that data. The underlying query kept failing. \
     Rephrasing the question or narrowing it down may help."
        .to_string()
}

// ============================================================================
// TESTS
// ============================================================================
