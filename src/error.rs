//! Error types for the retrieval-and-orchestration core.
//!
//! Provides a comprehensive error hierarchy using `thiserror` covering the
//! store, model, web-fallback, configuration, and orchestration subsystems.

use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the retrieval-and-orchestration core.
#[derive(Error, Debug)]
pub enum Error {
    /// Document-store errors (dense/lexical search, metadata access).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Model-provider errors (free-form or structured generation).
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Web-fallback errors.
    #[error("web fallback error: {0}")]
    Web(#[from] WebError),

    /// Orchestration-level errors (step budget, invalid transitions).
    #[error("orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    /// Configuration errors (out-of-range options).
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Checkpoint persistence errors (feature `persistence`).
    #[cfg(feature = "persistence")]
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Store-specific errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store's backend query failed (transient or permanent).
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A document id referenced by the caller does not exist.
    #[error("document not found: {id}")]
    DocumentNotFound {
        /// The id that was not found.
        id: String,
    },

    /// The store's metadata snapshot could not be retrieved.
    #[error("metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// Transient error that has exhausted its retry budget.
    #[error("exhausted {attempts} retries: {reason}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final underlying reason.
        reason: String,
    },
}

/// Model-provider-specific errors.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The provider returned a transport/5xx-class failure.
    #[error("provider request failed: {0}")]
    RequestFailed(String),

    /// Structured output could not be parsed against the requested schema.
    #[error("structured output did not match schema: {0}")]
    SchemaMismatch(String),

    /// The provider call exceeded its deadline.
    #[error("model call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Web-fallback-specific errors.
#[derive(Error, Debug)]
pub enum WebError {
    /// The daily quota has been exhausted.
    #[error("daily web-search quota exhausted")]
    QuotaExhausted,

    /// The upstream web-search tool failed.
    #[error("web search failed: {0}")]
    SearchFailed(String),
}

/// Orchestration-level errors.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// The step budget was exceeded before reaching a terminal status.
    #[error("step budget exceeded")]
    StepBudgetExceeded,

    /// A node was asked to run from an invalid or terminal state.
    #[error("invalid transition: {message}")]
    InvalidTransition {
        /// Description of the invalid transition.
        message: String,
    },

    /// The query was empty or otherwise invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the invalid input.
        message: String,
    },

    /// The subtask executor produced zero distinct query variations.
    #[error("subtask {subtask_id} produced zero query variations")]
    NoVariations {
        /// Id of the subtask that failed variation generation.
        subtask_id: String,
    },
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is outside its documented valid range.
    #[error("{field} out of range: {reason}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Description of why the value is invalid.
        reason: String,
    },
}

/// Checkpoint persistence errors (feature `persistence`).
#[cfg(feature = "persistence")]
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The underlying database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// The stored checkpoint could not be deserialized.
    #[error("deserialization error: {0}")]
    Serialization(String),

    /// No checkpoint exists for the requested turn id.
    #[error("no checkpoint for turn: {turn_id}")]
    NotFound {
        /// The turn id that was not found.
        turn_id: String,
    },
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for CheckpointError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(feature = "persistence")]
impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DocumentNotFound {
            id: "doc-1".to_string(),
        };
        assert_eq!(err.to_string(), "document not found: doc-1");
    }

    #[test]
    fn test_store_retries_exhausted_display() {
        let err = StoreError::RetriesExhausted {
            attempts: 3,
            reason: "connection reset".to_string(),
        };
        assert!(err.to_string().contains("3 retries"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_model_schema_mismatch_display() {
        let err = ModelError::SchemaMismatch("missing field `score`".to_string());
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn test_web_quota_exhausted_display() {
        let err = WebError::QuotaExhausted;
        assert_eq!(err.to_string(), "daily web-search quota exhausted");
    }

    #[test]
    fn test_orchestration_step_budget_display() {
        let err = OrchestrationError::StepBudgetExceeded;
        assert_eq!(err.to_string(), "step budget exceeded");
    }

    #[test]
    fn test_config_out_of_range_display() {
        let err = ConfigError::OutOfRange {
            field: "max_subtasks",
            reason: "must be >= 1".to_string(),
        };
        assert!(err.to_string().contains("max_subtasks"));
        assert!(err.to_string().contains("must be >= 1"));
    }

    #[test]
    fn test_orchestration_no_variations_display() {
        let err = OrchestrationError::NoVariations {
            subtask_id: "s0".to_string(),
        };
        assert!(err.to_string().contains("s0"));
    }

    #[test]
    fn test_error_from_store() {
        let store_err = StoreError::MetadataUnavailable("down".to_string());
        let err: Error = store_err.into();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_error_from_model() {
        let model_err = ModelError::RequestFailed("503".to_string());
        let err: Error = model_err.into();
        assert!(matches!(err, Error::Model(_)));
    }

    #[test]
    fn test_error_from_web() {
        let web_err = WebError::QuotaExhausted;
        let err: Error = web_err.into();
        assert!(matches!(err, Error::Web(_)));
    }

    #[test]
    fn test_error_from_orchestration() {
        let orch_err = OrchestrationError::InvalidInput {
            message: "empty query".to_string(),
        };
        let err: Error = orch_err.into();
        assert!(matches!(err, Error::Orchestration(_)));
    }

    #[test]
    fn test_error_from_config() {
        let cfg_err = ConfigError::OutOfRange {
            field: "top_k",
            reason: "must be > 0".to_string(),
        };
        let err: Error = cfg_err.into();
        assert!(matches!(err, Error::Config(_)));
    }
}
