//! Error types for the `docqa` crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur inside the engine.
///
/// These are internal: agents catch them at their boundary and the
/// orchestrator maps them onto the user-facing [`ErrorKind`] taxonomy.
/// A caller of [`Engine::answer`](crate::orchestrator::Engine::answer)
/// never observes this type directly.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector index backend.
    #[error("Index error ({backend}): {message}")]
    Index {
        /// The index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the hybrid retrieval agent.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// An error occurred in the translation layer.
    #[error("Translation error ({provider}): {message}")]
    Translation {
        /// The translation provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the response cache backend.
    #[error("Cache error: {0}")]
    Cache(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An error in the pipeline orchestration.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// A convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The user-facing error taxonomy carried on non-success responses.
///
/// This is a classification, not an exception type: every kind maps to a
/// human-readable message telling the user what happened and what to try
/// next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input query was blank.
    EmptyQuery,
    /// The vector index holds no documents at all.
    NoDocuments,
    /// Retrieval returned nothing for this query.
    NoEvidence,
    /// The model server exhausted its retry budget on timeouts.
    ModelTimeout,
    /// The model server could not be reached.
    ModelUnreachable,
    /// All reasoning fallback levels failed to produce an answer.
    ReasoningExhausted,
    /// Verification errored; the answer is still returned with downgraded
    /// confidence.
    VerificationFailed,
    /// A cache read or write failed. Non-fatal, logged and ignored.
    CacheIo,
    /// Catch-all for unexpected internal failures.
    Internal,
}

impl ErrorKind {
    /// A stable lowercase tag for logs and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyQuery => "empty_query",
            ErrorKind::NoDocuments => "no_documents",
            ErrorKind::NoEvidence => "no_evidence",
            ErrorKind::ModelTimeout => "model_timeout",
            ErrorKind::ModelUnreachable => "model_unreachable",
            ErrorKind::ReasoningExhausted => "reasoning_exhausted",
            ErrorKind::VerificationFailed => "verification_failed",
            ErrorKind::CacheIo => "cache_io",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
