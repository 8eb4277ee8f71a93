//! TABLETALK Core - Data Model
//!
//! Pure data structures with no I/O. All other crates depend on this.
//! The pipeline crates add behavior; this crate contains only the types
//! that flow between them and the error taxonomy they share.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod query;
pub mod result;
pub mod schema;
pub mod turn;
pub mod value;

pub use config::{PipelineConfig, UpstreamRetryConfig};
pub use error::{
    ConfigError, ExecutionErrorKind, GenerationError, LlmError, SchemaError, TabletalkError,
    TabletalkResult, ValidationError, ValidationRule,
};
pub use query::{QueryDescriptor, QueryOperation};
pub use result::{ExecutionError, ExecutionOutcome, ExecutionResult, Item};
pub use schema::{
    AttributeSchema, AttributeType, IndexDescription, KeySchema, KeyType, SchemaDescription,
    TableSchema,
};
pub use turn::{Conversation, ConversationTurn, TurnPayload, TurnRole};
pub use value::TypedValue;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Conversation identifier using UUIDv7 for timestamp-sortable IDs.
pub type ConversationId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 ConversationId (timestamp-sortable).
pub fn new_conversation_id() -> ConversationId {
    Uuid::now_v7()
}
