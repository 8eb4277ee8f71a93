//! Query generation: natural-language question to structured descriptor.
//!
//! `QueryGenerator` is a trait so the generative step can be swapped or
//! mocked with deterministic fixtures; the orchestrator never hard-wires
//! a model implementation. `LlmQueryGenerator` is the production
//! implementation over a `CompletionProvider`.

use async_trait::async_trait;
use std::sync::Arc;
use tabletalk_core::{
    ConversationTurn, GenerationError, PipelineConfig, QueryDescriptor, SchemaDescription,
    TabletalkError,
};
use tabletalk_llm::{CompletionProvider, CompletionRequest};

/// A failed prior attempt, fed back to the model for self-correction.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorAttempt {
    /// The descriptor that failed. Absent when generation itself failed
    /// before a descriptor existed (malformed model output).
    pub descriptor: Option<QueryDescriptor>,
    /// The exact error the attempt produced.
    pub error: String,
}

/// Inputs to one generation attempt.
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    pub question: &'a str,
    pub schema: &'a SchemaDescription,
    pub history: &'a [ConversationTurn],
    pub prior_attempt: Option<&'a PriorAttempt>,
}

/// Trait for query generators.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    /// Generate a structured query descriptor for the question.
    async fn generate(&self, ctx: GenerationContext<'_>)
        -> Result<QueryDescriptor, GenerationError>;
}

/// Production generator: prompts the completion provider and parses its
/// output as a JSON query descriptor.
pub struct LlmQueryGenerator {
    provider: Arc<dyn CompletionProvider>,
    history_window: usize,
    max_tokens: u32,
}

impl LlmQueryGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            history_window: config.history_window,
            max_tokens: config.query_max_tokens,
        }
    }

    fn system_prompt(schema: &SchemaDescription) -> String {
        format!(
            "You translate natural-language questions into structured queries \
             against a key-value store.\n\n\
             The store schema:\n{}\n\
             Respond with ONLY a JSON object, no prose, of this shape:\n\
             {{\"operation\": \"GetItem\"|\"Query\"|\"Scan\"|\"BatchGetItem\", \
             \"table_name\": \"...\", \"index_name\": \"...\" (optional), \
             \"key_condition_expression\": \"...\" (required for Query), \
             \"filter_expression\": \"...\" (optional), \
             \"projection_expression\": \"...\" (optional), \
             \"expression_attribute_values\": {{\":placeholder\": {{\"S\": \"...\"}}}}, \
             \"expression_attribute_names\": {{\"#placeholder\": \"attribute\"}} (optional), \
             \"limit\": positive integer (optional)}}\n\
             Rules: prefer Query over Scan whenever a key condition is possible; \
             a Query key condition must test the partition key with equality and \
             may additionally constrain the sort key; attribute values use the \
             store's typed form ({{\"S\": string}}, {{\"N\": number-as-string}}, \
             {{\"BOOL\": bool}}); for GetItem and BatchGetItem bind every primary \
             key attribute in expression_attribute_values.",
            render_schema(schema)
        )
    }

    fn user_prompt(ctx: &GenerationContext<'_>, history_window: usize) -> String {
        let mut prompt = String::new();

        let start = ctx.history.len().saturating_sub(history_window);
        let recent = &ctx.history[start..];
        if !recent.is_empty() {
            prompt.push_str("Conversation so far (for resolving references):\n");
            for turn in recent {
                prompt.push_str(&format!("{}: {}\n", turn.role.as_str(), turn.content));
            }
            prompt.push('\n');
        }

        if let Some(prior) = ctx.prior_attempt {
            prompt.push_str("Your previous query attempt failed.\n");
            if let Some(descriptor) = &prior.descriptor {
                prompt.push_str(&format!("Previous query:\n{}\n", descriptor.to_json()));
            }
            prompt.push_str(&format!(
                "Error:\n{}\n\
                 Produce a corrected query that fixes this error.\n\n",
                prior.error
            ));
        }

        prompt.push_str(&format!("Question: {}", ctx.question));
        prompt
    }
}

#[async_trait]
impl QueryGenerator for LlmQueryGenerator {
    async fn generate(
        &self,
        ctx: GenerationContext<'_>,
    ) -> Result<QueryDescriptor, GenerationError> {
        if ctx.question.trim().is_empty() {
            return Err(GenerationError::EmptyQuestion);
        }
        if ctx.schema.tables.is_empty() {
            return Err(GenerationError::EmptySchema);
        }

        let request = CompletionRequest {
            system: Some(Self::system_prompt(ctx.schema)),
            messages: vec![tabletalk_llm::ChatMessage::user(Self::user_prompt(
                &ctx,
                self.history_window,
            ))],
            max_tokens: self.max_tokens,
            // Low temperature: we want a deterministic translation, not prose.
            temperature: Some(0.0),
        };

        let text = self.provider.complete(request).await.map_err(|e| match e {
            TabletalkError::Llm(llm) => GenerationError::UpstreamUnavailable {
                reason: llm.to_string(),
            },
            other => GenerationError::UpstreamUnavailable {
                reason: other.to_string(),
            },
        })?;

        parse_descriptor(&text)
    }
}

impl std::fmt::Debug for LlmQueryGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmQueryGenerator")
            .field("model", &self.provider.model_id())
            .field("history_window", &self.history_window)
            .finish()
    }
}

/// Render the schema for the system prompt: tables, keys, attributes,
/// and indexes with their descriptions.
pub fn render_schema(schema: &SchemaDescription) -> String {
    let mut out = String::new();
    for table in &schema.tables {
        out.push_str(&format!("Table {}: {}\n", table.table_name, table.description));
        out.push_str(&format!(
            "  partition key: {} ({})\n",
            table.partition_key.name,
            table.partition_key.key_type.as_str()
        ));
        if let Some(sk) = &table.sort_key {
            out.push_str(&format!(
                "  sort key: {} ({})\n",
                sk.name,
                sk.key_type.as_str()
            ));
        }
        for attr in &table.attributes {
            out.push_str(&format!(
                "  attribute {} ({}): {}\n",
                attr.name,
                attr.attr_type.as_str(),
                attr.description
            ));
        }
        for index in &table.indexes {
            let sort = index
                .sort_key
                .as_ref()
                .map(|sk| format!(", sort key {}", sk.name))
                .unwrap_or_default();
            out.push_str(&format!(
                "  index {} (partition key {}{}): {}\n",
                index.index_name, index.partition_key.name, sort, index.description
            ));
        }
    }
    out
}

/// Parse model output into a descriptor, tolerating markdown code
/// fences and surrounding prose around the JSON object.
pub fn parse_descriptor(text: &str) -> Result<QueryDescriptor, GenerationError> {
    let candidate = extract_json_object(text).ok_or_else(|| GenerationError::MalformedOutput {
        raw_text: text.to_string(),
    })?;

    serde_json::from_str(candidate).map_err(|_| GenerationError::MalformedOutput {
        raw_text: text.to_string(),
    })
}

/// The substring from the first `{` to the last `}`, if any.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

// ============================================================================
// TESTS
// ============================================================================
