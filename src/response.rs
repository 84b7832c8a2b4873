//! Query, response, and per-query execution context types.

use serde::{Deserialize, Serialize};

use crate::document::SearchResult;
use crate::error::ErrorKind;

/// The inbound request: the user's utterance plus optional overrides.
///
/// Immutable within one run of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// The user's natural-language question.
    pub text: String,
    /// Session scope for the request, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Caller override for the number of evidence chunks to retrieve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    /// Caller hint for the query's source language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
}

impl Query {
    /// Create a query with just the utterance.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), session_id: None, top_k: None, language_hint: None }
    }

    /// Set the top-k override.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// The classification assigned by the understanding agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Greeting or small talk; answered with a fixed redirection and no
    /// retrieval or model call.
    Casual,
    /// A domain question with no sharper tag.
    Specialized,
    /// Open-ended research question.
    Research,
    /// "Why" / "how" explanation question.
    Analytical,
    /// "What" / "when" / "who" lookup question.
    Factual,
    /// Enumeration request ("list all", "every", "each").
    Extraction,
    /// Question about quantities, units, or figures.
    Numerical,
    /// Side-by-side comparison request.
    Comparison,
}

/// A citation entry: source file and 1-based page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    /// Name of the cited file.
    pub filename: String,
    /// 1-based page number as shown to the user.
    pub page: u32,
}

/// A reference to an image surfaced alongside the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Path to the extracted image.
    pub path: String,
    /// 1-based page the image appears on.
    pub page: u32,
    /// Name of the file the image came from.
    pub filename: String,
}

/// The kind of derived artifact attached to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A styled HTML report.
    Report,
    /// Extracted structured data rendered as HTML.
    Data,
}

/// A derived, presentable document attached when the query warrants a
/// richer view than a chat reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Display title for the artifact panel.
    pub title: String,
    /// The artifact kind.
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    /// Self-contained HTML content.
    pub content: String,
}

/// Which fallback level produced the answer.
///
/// Absent when the primary reasoning path succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLevel {
    /// Level 1: minimal prompt over the top-2 chunks.
    SimplifiedReasoning,
    /// Level 2: sentence extraction with no model call.
    DirectExtraction,
    /// Level 3: fixed apology listing the evidence sources.
    GracefulFallback,
}

impl FallbackLevel {
    /// The stable name recorded on responses and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackLevel::SimplifiedReasoning => "simplified_reasoning",
            FallbackLevel::DirectExtraction => "direct_extraction",
            FallbackLevel::GracefulFallback => "graceful_fallback",
        }
    }
}

/// Structured failure information on a non-success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// The failure classification.
    pub kind: ErrorKind,
    /// Human-readable description of what happened and what to try next.
    pub message: String,
}

/// The terminal record returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Whether the pipeline produced a usable answer.
    pub success: bool,
    /// The answer text, possibly from a fallback level.
    pub answer: String,
    /// Confidence in `[0, 1]` that the answer is grounded in the evidence.
    pub confidence: f32,
    /// True exactly when `confidence >= confidence_threshold`.
    pub verified: bool,
    /// Citations for the evidence actually used.
    pub sources: Vec<Source>,
    /// Images from the top evidence entries, deduplicated by path.
    pub images: Vec<ImageRef>,
    /// Optional derived artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// Detected language of the original query.
    pub language: String,
    /// Which fallback level produced the answer, if any.
    pub fallback_used: Option<FallbackLevel>,
    /// Whether the response was served from the cache.
    pub from_cache: bool,
    /// Failure detail when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    /// Build a non-success response carrying the given failure.
    pub fn failure(kind: ErrorKind, message: impl Into<String>, language: &str) -> Self {
        let message = message.into();
        Self {
            success: false,
            answer: String::new(),
            confidence: 0.0,
            verified: false,
            sources: Vec::new(),
            images: Vec::new(),
            artifact: None,
            language: language.to_string(),
            fallback_used: None,
            from_cache: false,
            error: Some(ResponseError { kind, message }),
        }
    }
}

/// The per-query execution context.
///
/// Created per query, populated by the agents in phase order, consumed by
/// the orchestrator when assembling the [`Response`], then discarded. It
/// only ever grows: no agent removes or rewrites an earlier agent's output.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// The (possibly translated) query the agents operate on.
    pub user_query: String,
    /// The query exactly as the caller sent it.
    pub original_query: String,
    /// Detected language of the original query.
    pub language: String,
    /// Intent string assigned by understanding.
    pub intent: String,
    /// Query classification assigned by understanding.
    pub query_type: QueryType,
    /// Keywords extracted from the query, order-preserving, at most 8.
    pub keywords: Vec<String>,
    /// Number of evidence chunks requested from retrieval.
    pub top_k: usize,
    /// The deduplicated, score-ordered evidence set.
    pub evidence: Vec<SearchResult>,
    /// The current answer draft.
    pub answer: Option<String>,
    /// Which fallback level produced the draft, if any.
    pub fallback_used: Option<FallbackLevel>,
    /// Whether any evidence chunk was truncated to fit the prompt budget.
    pub truncated: bool,
    /// How many evidence entries the last reasoning pass actually used.
    pub evidence_used: usize,
    /// Confidence assigned by verification.
    pub confidence: f32,
    /// Verified flag assigned by verification.
    pub verified: bool,
    /// Citations for the evidence used by reasoning.
    pub sources: Vec<Source>,
    /// Image references collected from the top evidence entries.
    pub images: Vec<ImageRef>,
}

impl QueryContext {
    /// Create a fresh context for one query run.
    pub fn new(user_query: impl Into<String>, original_query: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            original_query: original_query.into(),
            language: language.into(),
            intent: String::new(),
            query_type: QueryType::Specialized,
            keywords: Vec::new(),
            top_k: 10,
            evidence: Vec::new(),
            answer: None,
            fallback_used: None,
            truncated: false,
            evidence_used: 0,
            confidence: 0.0,
            verified: false,
            sources: Vec::new(),
            images: Vec::new(),
        }
    }
}
