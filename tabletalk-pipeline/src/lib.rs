//! TABLETALK Pipeline - Query Orchestration
//!
//! The stages that turn a natural-language question into a grounded
//! answer: schema registry, query generation, structural validation,
//! execution, answer synthesis, and the conversation orchestrator that
//! runs them with a bounded self-correction loop.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod executor;
pub mod generator;
pub mod orchestrator;
pub mod registry;
pub mod synthesizer;
pub mod validator;

pub use executor::QueryExecutor;
pub use generator::{GenerationContext, LlmQueryGenerator, PriorAttempt, QueryGenerator};
pub use orchestrator::{ChatRequest, ChatResponse, ErrorDetail, Orchestrator};
pub use registry::SchemaRegistry;
pub use synthesizer::AnswerSynthesizer;
pub use validator::QueryValidator;

/// Initialize structured logging for a process entry point, honoring
/// `RUST_LOG` with a sensible default. Call once; later calls are a
/// no-op so tests can race to it safely.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tabletalk_pipeline=debug,info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
