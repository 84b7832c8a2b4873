//! Document-grounded question answering.
//!
//! This crate provides:
//! - A four-stage agent pipeline (understanding, hybrid retrieval,
//!   reasoning, verification) behind a straight-line orchestrator
//! - Hybrid retrieval with dense, lexical, and section search fused into
//!   one scored, deduplicated evidence set
//! - A context-budgeted reasoning prompt with a four-level fallback ladder
//! - Confidence scoring and a bounded refinement loop
//! - A single model choke-point with retries, timeouts, a concurrency cap,
//!   and multimodal payload assembly
//! - Collaborator seams for the vector index, embedding provider, response
//!   cache, and translation providers, with in-memory implementations for
//!   development and tests

pub mod artifact;
pub mod cache;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod faillog;
pub mod index;
pub mod inmemory;
pub mod llm;
pub mod orchestrator;
pub mod reasoning;
pub mod response;
pub mod retrieval;
pub mod translate;
pub mod understanding;
pub mod verification;

pub use cache::{cache_key, kb_fingerprint, normalize_query, MemoryResponseCache, ResponseCache};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use document::{ChunkKind, ChunkMetadata, IndexedChunk, SearchResult, SearchSource};
pub use embedding::EmbeddingProvider;
pub use error::{EngineError, ErrorKind, Result};
pub use faillog::{FailureLog, FailureRecord};
pub use index::{IndexStats, ScoredChunk, VectorIndex};
pub use inmemory::InMemoryIndex;
pub use llm::{CompletionRequest, HttpTransport, LlmClient, LlmError, LlmErrorKind, LlmTransport};
pub use orchestrator::{Engine, EngineBuilder};
pub use reasoning::ReasoningAgent;
pub use response::{
    Artifact, ArtifactKind, FallbackLevel, ImageRef, Query, QueryContext, QueryType, Response,
    ResponseError, Source,
};
pub use retrieval::RetrievalAgent;
pub use translate::{needs_translation, Translator, TranslatorChain};
pub use understanding::UnderstandingAgent;
pub use verification::VerificationAgent;
