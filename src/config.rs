//! Orchestrator configuration.
//!
//! Collects every tunable enumerated by the design's external-interfaces
//! section into a single struct, constructible via [`Default`] and checked
//! by [`OrchestratorConfig::validate`].

use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Configuration for a single [`crate::orchestrator::Orchestrator`] instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Planner cap on the number of subtasks produced for one turn.
    pub max_subtasks: usize,
    /// Synthesis-retry cap (hallucination + grader combined).
    pub max_retries: u32,
    /// Final per-subtask result count returned by the hybrid retriever.
    pub top_k: usize,
    /// Reciprocal Rank Fusion constant.
    pub rrf_k: u32,
    /// Informational weight for semantic results (pure RRF is used; kept
    /// for parity with the design's documented (unused) knob).
    pub semantic_weight: f64,
    /// Informational weight for keyword results (see `semantic_weight`).
    pub keyword_weight: f64,
    /// Document-count floor below which the web fallback may trigger.
    pub web_fallback_threshold: usize,
    /// Hallucination score threshold; `is_valid := score <= threshold`.
    pub threshold_hallucination: f64,
    /// Grade score threshold; `is_valid := overall_score >= threshold`.
    pub threshold_grade: f64,
    /// Whether the router node is entered at turn start.
    pub routing_enabled: bool,
    /// Whether the web fallback collaborator may be invoked at all.
    pub web_enabled: bool,
    /// Per-turn deadline propagated to every suspension point.
    pub turn_deadline: Duration,
    /// Bounded worker-pool size for the hybrid retriever's fan-out.
    pub retrieval_concurrency: usize,
    /// Daily web-search quota (requests).
    pub web_daily_quota: u32,
    /// Web-search result cache TTL.
    pub web_cache_ttl: Duration,
    /// Store-metadata cache TTL.
    pub metadata_cache_ttl: Duration,
    /// When `true`, the dynamic filter generator also emits an entity
    /// filter on a plausible (not just clear) reference. See `DESIGN.md`
    /// for the rationale; default is the conservative spec behavior.
    pub filter_entity_aggressive: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_subtasks: 5,
            max_retries: 3,
            top_k: 10,
            rrf_k: 60,
            semantic_weight: 0.5,
            keyword_weight: 0.5,
            web_fallback_threshold: 3,
            threshold_hallucination: 0.7,
            threshold_grade: 0.6,
            routing_enabled: true,
            web_enabled: false,
            turn_deadline: Duration::from_secs(60),
            retrieval_concurrency: 3,
            web_daily_quota: 100,
            web_cache_ttl: Duration::from_secs(3600),
            metadata_cache_ttl: Duration::from_secs(300),
            filter_entity_aggressive: false,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a config with documented defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The orchestrator's step budget, derived from `max_subtasks` and
    /// `max_retries` as `(max_subtasks * 3) + (max_retries * 4) + 30`.
    #[must_use]
    pub const fn step_budget(&self) -> usize {
        (self.max_subtasks * 3) + (self.max_retries as usize * 4) + 30
    }

    /// Validates every field against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first invalid field
    /// encountered.
    pub fn validate(&self) -> Result<()> {
        if self.max_subtasks == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_subtasks",
                reason: "must be >= 1".to_string(),
            }
            .into());
        }
        if self.top_k == 0 {
            return Err(ConfigError::OutOfRange {
                field: "top_k",
                reason: "must be >= 1".to_string(),
            }
            .into());
        }
        if self.rrf_k == 0 {
            return Err(ConfigError::OutOfRange {
                field: "rrf_k",
                reason: "must be >= 1".to_string(),
            }
            .into());
        }
        if self.retrieval_concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                field: "retrieval_concurrency",
                reason: "must be >= 1".to_string(),
            }
            .into());
        }
        Self::check_unit_interval("threshold_hallucination", self.threshold_hallucination)?;
        Self::check_unit_interval("threshold_grade", self.threshold_grade)?;
        Self::check_unit_interval("semantic_weight", self.semantic_weight)?;
        Self::check_unit_interval("keyword_weight", self.keyword_weight)?;
        Ok(())
    }

    fn check_unit_interval(field: &'static str, value: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::OutOfRange {
                field,
                reason: format!("must be within [0.0, 1.0], got {value}"),
            }
            .into());
        }
        Ok(())
    }

    /// Sets `max_subtasks`.
    #[must_use]
    pub const fn with_max_subtasks(mut self, max_subtasks: usize) -> Self {
        self.max_subtasks = max_subtasks;
        self
    }

    /// Sets `max_retries`.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets `top_k`.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Enables or disables the router node.
    #[must_use]
    pub const fn with_routing_enabled(mut self, enabled: bool) -> Self {
        self.routing_enabled = enabled;
        self
    }

    /// Enables or disables the web fallback collaborator.
    #[must_use]
    pub const fn with_web_enabled(mut self, enabled: bool) -> Self {
        self.web_enabled = enabled;
        self
    }
}
