//! Configuration for the question-answering engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Tunable parameters for the engine pipeline.
///
/// Every knob the pipeline branches on lives here so that tests can pin
/// behavior and deployments can tune it without touching agent code.
/// Construct via [`EngineConfig::builder()`] to get validation, or use
/// [`Default`] for the stock settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Weight of the dense (vector) sub-search in score fusion.
    pub vector_weight: f32,
    /// Weight of the lexical (keyword) sub-search in score fusion.
    pub keyword_weight: f32,
    /// Weight of the section sub-search in score fusion.
    pub section_weight: f32,
    /// Confidence at or above which an answer counts as verified.
    pub confidence_threshold: f32,
    /// Fused score below which the answer carries a limited-relevance note.
    pub relevance_floor: f32,
    /// Maximum number of reasoning passes (initial + refinements).
    pub max_refinement_iterations: usize,
    /// The model's context window, in estimated tokens.
    pub context_window: usize,
    /// Tokens reserved for the system directive, query, and response.
    pub token_reserve: usize,
    /// Estimated-token cap for a single evidence chunk before truncation.
    pub chunk_token_cap: usize,
    /// Maximum completion tokens requested from the model.
    pub max_answer_tokens: u32,
    /// Retry budget for a single model call.
    pub llm_max_retries: usize,
    /// Per-model-call timeout.
    pub llm_call_timeout: Duration,
    /// Maximum concurrent in-flight model calls.
    pub llm_concurrency: usize,
    /// Per-retrieval-sub-search timeout.
    pub subsearch_timeout: Duration,
    /// End-to-end soft deadline for one query.
    pub query_deadline: Duration,
    /// Per-image size cap for multimodal payloads, in bytes.
    pub max_image_bytes: u64,
    /// Time-to-live for cached responses.
    pub cache_ttl: Duration,
    /// Whether the understanding agent may ask the model to disambiguate
    /// the query type. Rule-based classification is always the fallback.
    pub llm_classification: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            keyword_weight: 0.3,
            section_weight: 0.1,
            confidence_threshold: 0.7,
            relevance_floor: 0.15,
            max_refinement_iterations: 2,
            context_window: 2048,
            token_reserve: 800,
            chunk_token_cap: 512,
            max_answer_tokens: 600,
            llm_max_retries: 3,
            llm_call_timeout: Duration::from_secs(30),
            llm_concurrency: 2,
            subsearch_timeout: Duration::from_secs(10),
            query_deadline: Duration::from_secs(90),
            max_image_bytes: 5 * 1024 * 1024,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            llm_classification: false,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for constructing an [`EngineConfig`].
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the fusion weights for the three retrieval sub-searches.
    pub fn fusion_weights(mut self, vector: f32, keyword: f32, section: f32) -> Self {
        self.config.vector_weight = vector;
        self.config.keyword_weight = keyword;
        self.config.section_weight = section;
        self
    }

    /// Set the confidence threshold for the verified flag.
    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.config.confidence_threshold = threshold;
        self
    }

    /// Set the maximum number of reasoning passes.
    pub fn max_refinement_iterations(mut self, iterations: usize) -> Self {
        self.config.max_refinement_iterations = iterations;
        self
    }

    /// Set the model context window in estimated tokens.
    pub fn context_window(mut self, tokens: usize) -> Self {
        self.config.context_window = tokens;
        self
    }

    /// Set the token reserve for system directive, query, and response.
    pub fn token_reserve(mut self, tokens: usize) -> Self {
        self.config.token_reserve = tokens;
        self
    }

    /// Set the per-model-call timeout.
    pub fn llm_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.llm_call_timeout = timeout;
        self
    }

    /// Set the maximum concurrent in-flight model calls.
    pub fn llm_concurrency(mut self, limit: usize) -> Self {
        self.config.llm_concurrency = limit;
        self
    }

    /// Set the end-to-end soft deadline for one query.
    pub fn query_deadline(mut self, deadline: Duration) -> Self {
        self.config.query_deadline = deadline;
        self
    }

    /// Set the time-to-live for cached responses.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Enable or disable model-assisted query-type disambiguation.
    pub fn llm_classification(mut self, enabled: bool) -> Self {
        self.config.llm_classification = enabled;
        self
    }

    /// Build the [`EngineConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if:
    /// - any fusion weight is negative, or all three are zero
    /// - `confidence_threshold` is outside `[0, 1]`
    /// - `token_reserve >= context_window`
    /// - `llm_concurrency == 0` or `max_refinement_iterations == 0`
    pub fn build(self) -> Result<EngineConfig> {
        let c = &self.config;
        if c.vector_weight < 0.0 || c.keyword_weight < 0.0 || c.section_weight < 0.0 {
            return Err(EngineError::Config("fusion weights must be non-negative".to_string()));
        }
        if c.vector_weight + c.keyword_weight + c.section_weight <= 0.0 {
            return Err(EngineError::Config("at least one fusion weight must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&c.confidence_threshold) {
            return Err(EngineError::Config(format!(
                "confidence_threshold ({}) must be within [0, 1]",
                c.confidence_threshold
            )));
        }
        if c.token_reserve >= c.context_window {
            return Err(EngineError::Config(format!(
                "token_reserve ({}) must be less than context_window ({})",
                c.token_reserve, c.context_window
            )));
        }
        if c.llm_concurrency == 0 {
            return Err(EngineError::Config("llm_concurrency must be greater than zero".to_string()));
        }
        if c.max_refinement_iterations == 0 {
            return Err(EngineError::Config(
                "max_refinement_iterations must be greater than zero".to_string(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = EngineConfig::builder().build().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn rejects_reserve_exceeding_window() {
        let result = EngineConfig::builder().context_window(512).token_reserve(512).build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_zero_weights() {
        let result = EngineConfig::builder().fusion_weights(0.0, 0.0, 0.0).build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_negative_weight() {
        let result = EngineConfig::builder().fusion_weights(0.8, -0.1, 0.3).build();
        assert!(result.is_err());
    }
}
