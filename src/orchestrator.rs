//! The pipeline orchestrator.
//!
//! [`Engine`] owns the query state machine: translation pre-step, cache
//! consult, the four agents in order, the bounded refinement loop, the
//! artifact decision, and response assembly. Control flow is strictly
//! sequential; the only concurrency lives inside the retrieval agent.
//!
//! ```text
//! START -> UNDERSTOOD -> (CASUAL) | RETRIEVED -> (NO_EVIDENCE)
//!       | REASONED -> VERIFIED -> (REFINE -> REASONED) | DONE | ERROR
//! ```
//!
//! Failures inside an agent are caught at the agent boundary; the
//! orchestrator decides whether to continue (verification, cache), fall
//! back (reasoning), or terminate (no documents, no evidence, empty query,
//! deadline). The caller never observes a raw error.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::artifact;
use crate::cache::{cache_key, kb_fingerprint, ResponseCache};
use crate::config::EngineConfig;
use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, ErrorKind, Result};
use crate::faillog::FailureLog;
use crate::index::VectorIndex;
use crate::llm::{LlmClient, LlmTransport};
use crate::reasoning::ReasoningAgent;
use crate::response::{Query, QueryContext, QueryType, Response};
use crate::retrieval::RetrievalAgent;
use crate::translate::{needs_translation, TranslatorChain};
use crate::understanding::UnderstandingAgent;
use crate::verification::VerificationAgent;

/// Fixed redirection for casual queries. No retrieval or model call is made.
const CASUAL_REDIRECT: &str = "I am a specialized research assistant focused on analyzing uploaded documents. \
Your question appears to be outside the scope of the knowledge base. \
Please upload documents (PDF, images, or audio) and ask questions related to their content. \
I can help you with:\n\
- Extracting information from documents\n\
- Answering questions about uploaded content\n\
- Creating reports and summaries\n\
- Analyzing data from your files";

/// The question-answering engine.
///
/// Construct via [`Engine::builder()`], then call
/// [`answer`](Engine::answer) once per query. The engine is `Send + Sync`;
/// multiple queries may be answered concurrently, one task each.
pub struct Engine {
    config: EngineConfig,
    index: Arc<dyn VectorIndex>,
    cache: Option<Arc<dyn ResponseCache>>,
    translators: TranslatorChain,
    understanding: UnderstandingAgent,
    retrieval: RetrievalAgent,
    reasoning: ReasoningAgent,
    verification: VerificationAgent,
    faillog: Arc<FailureLog>,
}

impl Engine {
    /// Create a new [`EngineBuilder`].
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Return a reference to the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Return the structured failure log.
    pub fn failure_log(&self) -> &Arc<FailureLog> {
        &self.faillog
    }

    /// Answer one query.
    ///
    /// This is the whole state machine; it never panics and never returns
    /// an error type. Any failure is folded into a [`Response`] with
    /// `success = false` and a structured reason.
    pub async fn answer(&self, query: Query) -> Response {
        if query.text.trim().is_empty() {
            return Response::failure(
                ErrorKind::EmptyQuery,
                "The query is empty. Please ask a question about your documents.",
                "en",
            );
        }

        match timeout(self.config.query_deadline, self.run(query)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(deadline = ?self.config.query_deadline, "query exceeded the soft deadline");
                Response::failure(
                    ErrorKind::Internal,
                    "The query took too long to process. Please try a simpler or more specific question.",
                    "en",
                )
            }
        }
    }

    async fn run(&self, query: Query) -> Response {
        let original_query = query.text.clone();

        // Translation pre-step. Inbound only; the detected language is
        // reported on the response for callers that translate outbound.
        let (user_query, language) = if needs_translation(&original_query) {
            let (translated, detected) = self
                .translators
                .translate_to_english(&original_query, query.language_hint.as_deref())
                .await;
            info!(language = %detected, "query translated for processing");
            (translated, detected)
        } else {
            (original_query.clone(), query.language_hint.clone().unwrap_or_else(|| "en".to_string()))
        };

        let mut ctx = QueryContext::new(user_query, original_query, language);

        // Cache consult, keyed to the current knowledge-base fingerprint.
        let lookup = match self.consult_cache(&ctx).await {
            CacheLookup::Hit(response) => return *response,
            other => other,
        };

        // Phase 1: understanding.
        if let Err(e) = self.understanding.execute(&mut ctx).await {
            return self.internal_failure(&ctx, "query understanding", e);
        }
        if ctx.query_type == QueryType::Casual {
            info!("casual query, returning fixed redirection");
            return self.casual_response(&ctx);
        }

        // Longer questions get a wider evidence net.
        let token_count = ctx.user_query.split_whitespace().count();
        ctx.top_k = query.top_k.unwrap_or(if token_count > 10 { 15 } else { 10 });

        match self.index.count().await {
            Ok(0) => {
                return Response::failure(
                    ErrorKind::NoDocuments,
                    "The knowledge base is empty. Please upload documents before asking questions.",
                    &ctx.language,
                );
            }
            Ok(_) => {}
            Err(e) => return self.internal_failure(&ctx, "index count", e),
        }

        // Phase 2: retrieval.
        if let Err(e) = self.retrieval.execute(&mut ctx).await {
            return self.internal_failure(&ctx, "retrieval", e);
        }
        if ctx.evidence.is_empty() {
            return Response::failure(
                ErrorKind::NoEvidence,
                "I could not find relevant information in the knowledge base for this question. \
                 Please upload related documents or rephrase the question.",
                &ctx.language,
            );
        }

        // Phases 3 and 4 under the bounded refinement loop.
        if let Some(response) = self.reason_and_verify(&mut ctx).await {
            return response;
        }

        let response = self.assemble(&ctx);

        // Only confident successes are cached, and only after the response
        // is fully assembled, so a cancelled query writes nothing.
        if response.confidence >= self.config.confidence_threshold {
            if let CacheLookup::Miss(key) = lookup {
                self.write_cache(&key, &response).await;
            }
        }

        response
    }

    /// Run reasoning and verification, refining at most
    /// `max_refinement_iterations` times.
    ///
    /// Returns a terminal failure response, or `None` when `ctx` holds a
    /// final draft.
    async fn reason_and_verify(&self, ctx: &mut QueryContext) -> Option<Response> {
        let mut slice: Vec<SearchResult> = ctx.evidence.clone();
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, slice_len = slice.len(), "reasoning pass");

            if let Err(e) = self.reasoning.execute(ctx, &slice).await {
                return Some(Response::failure(
                    ErrorKind::ReasoningExhausted,
                    format!(
                        "I could not generate an answer for this question ({e}). \
                         Please try rephrasing it."
                    ),
                    &ctx.language,
                ));
            }

            if let Err(e) = self.verification.execute(ctx).await {
                // Verification trouble never suppresses the answer.
                warn!(error = %e, "verification failed, downgrading confidence");
                ctx.confidence = 0.0;
                ctx.verified = false;
            }

            if ctx.confidence >= self.config.confidence_threshold {
                break;
            }
            if attempts >= self.config.max_refinement_iterations {
                break;
            }
            if ctx.evidence.len() <= ctx.evidence_used {
                break;
            }

            // Re-slice for the next pass: unseen evidence first, the
            // already-used prefix after it.
            let used = ctx.evidence_used;
            slice = ctx.evidence[used..]
                .iter()
                .chain(ctx.evidence[..used].iter())
                .cloned()
                .collect();
            info!(confidence = ctx.confidence, attempt = attempts, "refining with re-sliced evidence");
        }

        None
    }

    fn assemble(&self, ctx: &QueryContext) -> Response {
        let mut answer = ctx.answer.clone().unwrap_or_default();

        let best_score = ctx.evidence.first().map(|r| r.score).unwrap_or(0.0);
        if best_score < self.config.relevance_floor {
            answer.push_str(
                "\n\nNote: the retrieved documents had limited relevance to this question. \
                 For higher accuracy, consider uploading more specific or related material.",
            );
        }

        let artifact = artifact::detect(&ctx.user_query, &answer, &ctx.intent);

        info!(
            confidence = ctx.confidence,
            verified = ctx.verified,
            sources = ctx.sources.len(),
            artifact = artifact.is_some(),
            fallback = ctx.fallback_used.map(|f| f.as_str()).unwrap_or("none"),
            "query complete"
        );

        Response {
            success: true,
            answer,
            confidence: ctx.confidence,
            verified: ctx.verified,
            sources: ctx.sources.clone(),
            images: ctx.images.clone(),
            artifact,
            language: ctx.language.clone(),
            fallback_used: ctx.fallback_used,
            from_cache: false,
            error: None,
        }
    }

    fn casual_response(&self, ctx: &QueryContext) -> Response {
        Response {
            success: true,
            answer: CASUAL_REDIRECT.to_string(),
            confidence: 1.0,
            verified: true,
            sources: Vec::new(),
            images: Vec::new(),
            artifact: None,
            language: ctx.language.clone(),
            fallback_used: None,
            from_cache: false,
            error: None,
        }
    }

    fn internal_failure(&self, ctx: &QueryContext, phase: &str, error: EngineError) -> Response {
        warn!(phase, error = %error, "pipeline phase failed");
        Response::failure(
            ErrorKind::Internal,
            "Something went wrong while processing the question. Please try again.",
            &ctx.language,
        )
    }

    async fn consult_cache(&self, ctx: &QueryContext) -> CacheLookup {
        let Some(cache) = &self.cache else {
            return CacheLookup::Disabled;
        };
        let fingerprint = match kb_fingerprint(self.index.as_ref()).await {
            Ok(fp) => fp,
            Err(e) => {
                warn!(error = %e, "fingerprint unavailable, skipping cache");
                return CacheLookup::Disabled;
            }
        };
        let key = cache_key(&ctx.user_query, &fingerprint);
        match cache.get(&key).await {
            Ok(Some(mut cached)) => {
                info!("cache hit");
                cached.from_cache = true;
                CacheLookup::Hit(Box::new(cached))
            }
            Ok(None) => CacheLookup::Miss(key),
            Err(e) => {
                // cache_io is non-fatal.
                warn!(error = %e, "cache read failed, processing normally");
                CacheLookup::Miss(key)
            }
        }
    }

    async fn write_cache(&self, key: &str, response: &Response) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(key, response, self.config.cache_ttl).await {
                warn!(error = %e, "cache write failed");
            }
        }
    }
}

enum CacheLookup {
    Disabled,
    Miss(String),
    Hit(Box<Response>),
}

/// Builder for constructing an [`Engine`].
///
/// The transport, index, and embedding provider are required; the cache,
/// translators, and failure-log file are optional.
///
/// # Example
///
/// ```rust,ignore
/// use docqa::{Engine, EngineConfig, HttpTransport, InMemoryIndex};
///
/// let engine = Engine::builder()
///     .config(EngineConfig::default())
///     .transport(Arc::new(HttpTransport::new("http://127.0.0.1:8080", timeout)))
///     .index(Arc::new(InMemoryIndex::new()))
///     .embedder(Arc::new(my_embedder))
///     .cache(Arc::new(MemoryResponseCache::new()))
///     .build()?;
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    transport: Option<Arc<dyn LlmTransport>>,
    index: Option<Arc<dyn VectorIndex>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    cache: Option<Arc<dyn ResponseCache>>,
    translators: Option<TranslatorChain>,
    faillog: Option<Arc<FailureLog>>,
}

impl EngineBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the model transport.
    pub fn transport(mut self, transport: Arc<dyn LlmTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the vector index collaborator.
    pub fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the embedding provider used for dense retrieval.
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set an optional response cache.
    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the translation provider chain.
    pub fn translators(mut self, translators: TranslatorChain) -> Self {
        self.translators = Some(translators);
        self
    }

    /// Set the failure log (e.g. one with a file sink).
    pub fn failure_log(mut self, faillog: Arc<FailureLog>) -> Self {
        self.faillog = Some(faillog);
        self
    }

    /// Build the [`Engine`], validating that all required seams are set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the transport, index, or
    /// embedding provider is missing.
    pub fn build(self) -> Result<Engine> {
        let config = self.config.unwrap_or_default();
        let transport = self
            .transport
            .ok_or_else(|| EngineError::Config("transport is required".to_string()))?;
        let index =
            self.index.ok_or_else(|| EngineError::Config("index is required".to_string()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| EngineError::Config("embedder is required".to_string()))?;

        let faillog = self.faillog.unwrap_or_else(|| Arc::new(FailureLog::new()));

        let llm = Arc::new(LlmClient::new(
            transport,
            config.llm_concurrency,
            config.llm_max_retries,
            config.llm_call_timeout,
            config.max_image_bytes,
        ));

        let understanding = UnderstandingAgent::new(Arc::clone(&llm), config.llm_classification);
        let retrieval = RetrievalAgent::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            (config.vector_weight, config.keyword_weight, config.section_weight),
            config.subsearch_timeout,
        );
        let reasoning = ReasoningAgent::new(
            Arc::clone(&llm),
            Arc::clone(&faillog),
            config.context_window,
            config.token_reserve,
            config.chunk_token_cap,
            config.max_answer_tokens,
        );
        let verification = VerificationAgent::new(Arc::clone(&llm), config.confidence_threshold);

        Ok(Engine {
            config,
            index,
            cache: self.cache,
            translators: self.translators.unwrap_or_default(),
            understanding,
            retrieval,
            reasoning,
            verification,
            faillog,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_all_seams() {
        let result = Engine::builder().build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
