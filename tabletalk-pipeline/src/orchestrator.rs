//! Conversation orchestration: the full question-to-answer pipeline.
//!
//! One `chat` call runs generate, validate, execute, synthesize, with a
//! bounded self-correction loop around the first three stages: every
//! failure is fed back to the generator verbatim so the next attempt
//! can fix it. Conversation state is only touched after the pipeline
//! settles; a message either appends exactly one user turn and one
//! assistant turn, or (on a hard upstream failure) appends nothing.

use crate::executor::QueryExecutor;
use crate::generator::{GenerationContext, PriorAttempt, QueryGenerator};
use crate::registry::SchemaRegistry;
use crate::synthesizer::{self, AnswerSynthesizer};
use crate::validator::QueryValidator;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tabletalk_core::{
    new_conversation_id, Conversation, ConversationId, ConversationTurn, ExecutionError,
    ExecutionOutcome, ExecutionResult, GenerationError, PipelineConfig, QueryDescriptor,
    TabletalkError, TabletalkResult, TurnPayload, ValidationError,
};
use tokio::time::sleep;
use tracing::{info, warn};

/// One incoming user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Absent on the first message of a conversation; the response
    /// carries the id to thread follow-ups with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    pub message: String,
}

/// The answer plus full diagnostic detail for the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub conversation_id: ConversationId,
    pub answer: String,
    /// The conversation after this exchange, user turn and answer included.
    pub history: Vec<ConversationTurn>,
    /// The last descriptor the pipeline produced, successful or not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_query: Option<QueryDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<ExecutionResult>,
    /// Present when the attempt budget ran out without a successful query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

/// Which stage exhausted the budget, and with what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub stage: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<QueryDescriptor>,
    /// The store's verbatim error text, when the failure was execution-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_detail: Option<String>,
}

/// The ways a single attempt can fail without aborting the pipeline.
#[derive(Debug, Clone)]
enum AttemptFailure {
    Generation(GenerationError),
    Validation {
        descriptor: QueryDescriptor,
        error: ValidationError,
    },
    Execution(ExecutionError),
}

impl AttemptFailure {
    fn stage(&self) -> &'static str {
        match self {
            Self::Generation(_) => "generation",
            Self::Validation { .. } => "validation",
            Self::Execution(_) => "execution",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Generation(e) => e.to_string(),
            Self::Validation { error, .. } => error.to_string(),
            Self::Execution(e) => e.to_string(),
        }
    }

    fn descriptor(&self) -> Option<&QueryDescriptor> {
        match self {
            Self::Generation(_) => None,
            Self::Validation { descriptor, .. } => Some(descriptor),
            Self::Execution(e) => Some(&e.descriptor),
        }
    }

    fn prior_attempt(&self) -> PriorAttempt {
        PriorAttempt {
            descriptor: self.descriptor().cloned(),
            error: self.message(),
        }
    }

    fn into_error_detail(self) -> ErrorDetail {
        let stage = self.stage().to_string();
        let message = self.message();
        let raw_detail = match &self {
            Self::Execution(e) => Some(e.raw_detail.clone()),
            _ => None,
        };
        ErrorDetail {
            stage,
            message,
            descriptor: match self {
                Self::Generation(_) => None,
                Self::Validation { descriptor, .. } => Some(descriptor),
                Self::Execution(e) => Some(e.descriptor),
            },
            raw_detail,
        }
    }
}

/// The conversation orchestrator: owns per-conversation turn logs and
/// drives the pipeline stages for each message.
pub struct Orchestrator {
    generator: Arc<dyn QueryGenerator>,
    validator: QueryValidator,
    executor: QueryExecutor,
    synthesizer: AnswerSynthesizer,
    registry: Arc<SchemaRegistry>,
    conversations: DashMap<ConversationId, Conversation>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn QueryGenerator>,
        executor: QueryExecutor,
        synthesizer: AnswerSynthesizer,
        registry: Arc<SchemaRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            validator: QueryValidator::new(),
            executor,
            synthesizer,
            registry,
            conversations: DashMap::new(),
            config,
        }
    }

    /// Process one user message end to end.
    ///
    /// `Err` means the upstream model was unreachable even after
    /// transport retries; in that case no turns are recorded. Every
    /// other failure mode produces an `Ok` response whose `error_detail`
    /// explains what went wrong.
    pub async fn chat(&self, request: ChatRequest) -> TabletalkResult<ChatResponse> {
        if request.message.trim().is_empty() {
            return Err(GenerationError::EmptyQuestion.into());
        }

        let conversation_id = request.conversation_id.unwrap_or_else(new_conversation_id);

        // Snapshot history before any await; map refs must not be held
        // across suspension points.
        let history: Vec<ConversationTurn> = self
            .conversations
            .get(&conversation_id)
            .map(|c| c.turns.clone())
            .unwrap_or_default();

        let schema = self.registry.current();

        let mut prior_attempt: Option<PriorAttempt> = None;
        let mut last_failure: Option<AttemptFailure> = None;
        let mut success: Option<(QueryDescriptor, ExecutionResult)> = None;

        for attempt in 1..=self.config.max_attempts {
            info!(
                %conversation_id,
                attempt,
                max_attempts = self.config.max_attempts,
                "running query attempt"
            );

            let ctx = GenerationContext {
                question: &request.message,
                schema: &schema,
                history: &history,
                prior_attempt: prior_attempt.as_ref(),
            };

            let descriptor = match self.generate_with_retry(ctx).await {
                Ok(descriptor) => descriptor,
                Err(e @ GenerationError::MalformedOutput { .. }) => {
                    warn!(%conversation_id, attempt, "model output was not a descriptor");
                    let failure = AttemptFailure::Generation(e);
                    prior_attempt = Some(failure.prior_attempt());
                    last_failure = Some(failure);
                    continue;
                }
                // Empty schema or an exhausted upstream cannot be fixed
                // by another attempt.
                Err(e) => return Err(e.into()),
            };

            if let Err(error) = self.validator.validate(&descriptor, &schema) {
                warn!(
                    %conversation_id,
                    attempt,
                    rule = error.rule.as_str(),
                    "descriptor failed validation: {}",
                    error.message
                );
                let failure = AttemptFailure::Validation { descriptor, error };
                prior_attempt = Some(failure.prior_attempt());
                last_failure = Some(failure);
                continue;
            }

            match self.executor.execute(&descriptor).await {
                Ok(result) => {
                    success = Some((descriptor, result));
                    break;
                }
                Err(error) => {
                    warn!(
                        %conversation_id,
                        attempt,
                        kind = error.kind.as_str(),
                        "execution failed: {}",
                        error.message
                    );
                    let failure = AttemptFailure::Execution(error);
                    prior_attempt = Some(failure.prior_attempt());
                    last_failure = Some(failure);
                }
            }
        }

        let (answer, generated_query, raw_result, error_detail, payload) = match success {
            Some((descriptor, result)) => {
                let outcome = ExecutionOutcome::Success(result.clone());
                let answer = self
                    .synthesize_with_retry(&request.message, &history, &outcome)
                    .await;
                let payload = TurnPayload {
                    descriptor: descriptor.clone(),
                    outcome,
                };
                (answer, Some(descriptor), Some(result), None, Some(payload))
            }
            None => {
                // max_attempts >= 1, so a missing success implies a
                // recorded failure.
                let failure = last_failure.ok_or_else(|| {
                    TabletalkError::Config(tabletalk_core::ConfigError::InvalidValue {
                        field: "max_attempts".to_string(),
                        value: self.config.max_attempts.to_string(),
                        reason: "at least one attempt is required".to_string(),
                    })
                })?;
                let answer = synthesizer::failure_answer();
                let payload = match &failure {
                    AttemptFailure::Execution(error) => Some(TurnPayload {
                        descriptor: error.descriptor.clone(),
                        outcome: ExecutionOutcome::Failure(error.clone()),
                    }),
                    _ => None,
                };
                let detail = failure.into_error_detail();
                let generated_query = detail.descriptor.clone();
                (answer, generated_query, None, Some(detail), payload)
            }
        };

        // Record the exchange only now that it has an answer, so a hard
        // failure above leaves the conversation untouched.
        let history = {
            let mut conversation = self
                .conversations
                .entry(conversation_id)
                .or_insert_with(|| Conversation::new(conversation_id));
            conversation.push(ConversationTurn::user(request.message));
            conversation.push(ConversationTurn::assistant(answer.clone(), payload));
            conversation.turns.clone()
        };

        Ok(ChatResponse {
            conversation_id,
            answer,
            history,
            generated_query,
            raw_result,
            error_detail,
        })
    }

    /// Fetch a conversation by id.
    pub fn conversation(&self, id: ConversationId) -> TabletalkResult<Conversation> {
        self.conversations
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(TabletalkError::ConversationNotFound(id))
    }

    /// Delete a conversation.
    pub fn delete_conversation(&self, id: ConversationId) -> TabletalkResult<()> {
        self.conversations
            .remove(&id)
            .map(|_| ())
            .ok_or(TabletalkError::ConversationNotFound(id))
    }

    /// Re-send the same generation request across transient upstream
    /// outages, with exponential backoff.
    async fn generate_with_retry(
        &self,
        ctx: GenerationContext<'_>,
    ) -> Result<QueryDescriptor, GenerationError> {
        let retry = &self.config.upstream_retry;
        let mut transport_attempt = 0;
        loop {
            match self.generator.generate(ctx).await {
                Err(GenerationError::UpstreamUnavailable { reason })
                    if transport_attempt < retry.max_retries =>
                {
                    let backoff = retry.backoff_for(transport_attempt);
                    warn!(
                        transport_attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "model transport failed, backing off: {reason}"
                    );
                    sleep(backoff).await;
                    transport_attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Synthesize with transport retries. The data is already in hand,
    /// so if the model stays unreachable the caller gets a minimal
    /// deterministic summary instead of an error.
    async fn synthesize_with_retry(
        &self,
        question: &str,
        history: &[ConversationTurn],
        outcome: &ExecutionOutcome,
    ) -> String {
        let retry = &self.config.upstream_retry;
        for transport_attempt in 0..=retry.max_retries {
            match self.synthesizer.synthesize(question, history, outcome).await {
                Ok(answer) => return answer,
                Err(e) => {
                    warn!(transport_attempt, "answer synthesis failed: {e}");
                    if transport_attempt < retry.max_retries {
                        sleep(retry.backoff_for(transport_attempt)).await;
                    }
                }
            }
        }
        let count = outcome.result().map(|r| r.count).unwrap_or(0);
        format!(
            "The query succeeded and returned {count} matching item(s), but I \
             could not produce a summary right now. Please try again."
        )
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("conversations", &self.conversations.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
