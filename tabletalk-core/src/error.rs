//! Error types for TABLETALK operations

use thiserror::Error;

/// Category of store-side execution failure.
///
/// Store faults are classified into a small closed set so the retry loop
/// and diagnostic surfaces do not depend on provider-specific error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ExecutionErrorKind {
    /// Request was rejected due to throughput limits
    Throttled,
    /// Table or index does not exist on the store side
    ResourceNotFound,
    /// The store rejected a key/filter/projection expression
    ExpressionError,
    /// Caller lacks permission for the operation
    AccessDenied,
    /// Anything the store reported that fits no other bucket
    Unknown,
}

impl ExecutionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Throttled => "throttled",
            Self::ResourceNotFound => "resource_not_found",
            Self::ExpressionError => "expression_error",
            Self::AccessDenied => "access_denied",
            Self::Unknown => "unknown",
        }
    }
}

/// LLM provider transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("Invalid API key for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Transport error talking to {provider}: {reason}")]
    Transport { provider: String, reason: String },
}

/// Query generation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Model output could not be parsed as a query descriptor: {raw_text}")]
    MalformedOutput { raw_text: String },

    #[error("Model service unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("Question must not be empty")]
    EmptyQuestion,

    #[error("Schema must describe at least one table")]
    EmptySchema,
}

/// The validator rule that rejected a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ValidationRule {
    TableExists,
    IndexExists,
    OperationSupported,
    ExpressionSyntax,
    KeyConditionRequired,
    KeyConditionAttributes,
    KeyValueType,
    KeyAttributesBound,
    NamePlaceholdersResolved,
    ValuePlaceholdersResolved,
    PositiveLimit,
}

impl ValidationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TableExists => "table_exists",
            Self::IndexExists => "index_exists",
            Self::OperationSupported => "operation_supported",
            Self::ExpressionSyntax => "expression_syntax",
            Self::KeyConditionRequired => "key_condition_required",
            Self::KeyConditionAttributes => "key_condition_attributes",
            Self::KeyValueType => "key_value_type",
            Self::KeyAttributesBound => "key_attributes_bound",
            Self::NamePlaceholdersResolved => "name_placeholders_resolved",
            Self::ValuePlaceholdersResolved => "value_placeholders_resolved",
            Self::PositiveLimit => "positive_limit",
        }
    }
}

/// Structural/schema validation errors.
///
/// Fail-fast: carries exactly the first violated rule so the correction
/// prompt stays focused on one fix at a time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Validation failed ({}): {message}", rule.as_str())]
pub struct ValidationError {
    pub rule: ValidationRule,
    pub message: String,
}

impl ValidationError {
    pub fn new(rule: ValidationRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Schema document errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema document is not valid JSON: {reason}")]
    Malformed { reason: String },

    #[error("Schema document describes no tables")]
    Empty,

    #[error("Duplicate table name in schema: {table}")]
    DuplicateTable { table: String },

    #[error("Duplicate index name {index} on table {table}")]
    DuplicateIndex { table: String, index: String },
}

/// Master error type for all TABLETALK errors.
#[derive(Debug, Clone, Error)]
pub enum TabletalkError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::result::ExecutionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(crate::ConversationId),
}

/// Result type alias for TABLETALK operations.
pub type TabletalkResult<T> = Result<T, TabletalkError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_display_malformed() {
        let err = GenerationError::MalformedOutput {
            raw_text: "not json".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("could not be parsed"));
        assert!(msg.contains("not json"));
    }

    #[test]
    fn test_validation_error_display_includes_rule() {
        let err = ValidationError::new(ValidationRule::TableExists, "no such table: Foo");
        let msg = format!("{}", err);
        assert!(msg.contains("table_exists"));
        assert!(msg.contains("no such table: Foo"));
    }

    #[test]
    fn test_execution_error_kind_strings_are_distinct() {
        let kinds = [
            ExecutionErrorKind::Throttled,
            ExecutionErrorKind::ResourceNotFound,
            ExecutionErrorKind::ExpressionError,
            ExecutionErrorKind::AccessDenied,
            ExecutionErrorKind::Unknown,
        ];
        let mut seen = std::collections::HashSet::new();
        for kind in kinds {
            assert!(seen.insert(kind.as_str()));
        }
    }

    #[test]
    fn test_master_error_from_variants() {
        let generation = TabletalkError::from(GenerationError::EmptyQuestion);
        assert!(matches!(generation, TabletalkError::Generation(_)));

        let validation = TabletalkError::from(ValidationError::new(
            ValidationRule::PositiveLimit,
            "limit must be positive",
        ));
        assert!(matches!(validation, TabletalkError::Validation(_)));

        let config = TabletalkError::from(ConfigError::MissingRequired {
            field: "model".to_string(),
        });
        assert!(matches!(config, TabletalkError::Config(_)));

        let schema = TabletalkError::from(SchemaError::Empty);
        assert!(matches!(schema, TabletalkError::Schema(_)));
    }
}
