//! Pipeline configuration.
//!
//! All pipeline tunables (retry budget, result truncation, history
//! window) are explicit fields here, never ambient constants.
//! Configuration is constructed once and injected; `from_env` exists for
//! process entry points.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy for model-transport retries. These are distinct from
/// query-correction retries: they re-send the same request after an
/// upstream outage rather than asking the model to fix a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRetryConfig {
    pub max_retries: u32,
    /// Initial backoff before the first re-send.
    pub initial_backoff: Duration,
    /// Ceiling for the exponential backoff.
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for UpstreamRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl UpstreamRetryConfig {
    /// Backoff duration before retry number `attempt` (0-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let backoff = self.initial_backoff.mul_f32(multiplier);
        backoff.min(self.max_backoff)
    }
}

/// Master pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Total query attempts per user message (first attempt + corrections).
    pub max_attempts: u32,
    /// Items included verbatim in the synthesizer prompt; beyond this the
    /// result set is truncated with an explicit marker.
    pub result_item_cap: usize,
    /// Recent turns embedded in generator/synthesizer prompts.
    pub history_window: usize,
    /// Token ceiling for synthesized answers.
    pub answer_max_tokens: u32,
    /// Token ceiling for generated query descriptors.
    pub query_max_tokens: u32,
    /// Model-transport retry policy.
    pub upstream_retry: UpstreamRetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            result_item_cap: 25,
            history_window: 10,
            answer_max_tokens: 1000,
            query_max_tokens: 1000,
            upstream_retry: UpstreamRetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `TABLETALK_*` environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// Variables:
    /// - `TABLETALK_MAX_ATTEMPTS`: total query attempts (default: 3)
    /// - `TABLETALK_RESULT_ITEM_CAP`: prompt truncation cap (default: 25)
    /// - `TABLETALK_HISTORY_WINDOW`: prompt history turns (default: 10)
    /// - `TABLETALK_ANSWER_MAX_TOKENS`: answer token ceiling (default: 1000)
    /// - `TABLETALK_QUERY_MAX_TOKENS`: query token ceiling (default: 1000)
    /// - `TABLETALK_UPSTREAM_MAX_RETRIES`: transport retries (default: 2)
    pub fn from_env() -> Self {
        fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            max_attempts: parse_var("TABLETALK_MAX_ATTEMPTS", defaults.max_attempts),
            result_item_cap: parse_var("TABLETALK_RESULT_ITEM_CAP", defaults.result_item_cap),
            history_window: parse_var("TABLETALK_HISTORY_WINDOW", defaults.history_window),
            answer_max_tokens: parse_var("TABLETALK_ANSWER_MAX_TOKENS", defaults.answer_max_tokens),
            query_max_tokens: parse_var("TABLETALK_QUERY_MAX_TOKENS", defaults.query_max_tokens),
            upstream_retry: UpstreamRetryConfig {
                max_retries: parse_var(
                    "TABLETALK_UPSTREAM_MAX_RETRIES",
                    defaults.upstream_retry.max_retries,
                ),
                ..defaults.upstream_retry
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts".to_string(),
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.result_item_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "result_item_cap".to_string(),
                value: "0".to_string(),
                reason: "the synthesizer needs at least one item".to_string(),
            });
        }
        if self.answer_max_tokens == 0 || self.query_max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_tokens".to_string(),
                value: "0".to_string(),
                reason: "token ceilings must be positive".to_string(),
            });
        }
        if self.upstream_retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "upstream_retry.backoff_multiplier".to_string(),
                value: self.upstream_retry.backoff_multiplier.to_string(),
                reason: "backoff must not shrink".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
