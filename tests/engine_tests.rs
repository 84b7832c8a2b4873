//! End-to-end pipeline scenarios against the in-memory index and a
//! scriptable model transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docqa::{
    ChunkMetadata, Engine, EngineConfig, ErrorKind, FallbackLevel, IndexedChunk, InMemoryIndex,
    MemoryResponseCache, Query, VectorIndex,
};

const DJF_TEXT: &str = "The Design Justification File gathers the records which justify the \
design of the attitude control system and demonstrates compliance with the applicable \
requirements baseline.";

/// A model transport scripted for tests: answers reasoning prompts with a
/// chunk echo, verification prompts with a confident judgement, and counts
/// every call.
struct ScriptedTransport {
    reachable: bool,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn healthy() -> Arc<Self> {
        Arc::new(Self { reachable: true, calls: AtomicUsize::new(0) })
    }

    fn down() -> Arc<Self> {
        Arc::new(Self { reachable: false, calls: AtomicUsize::new(0) })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl docqa::LlmTransport for ScriptedTransport {
    async fn complete(
        &self,
        request: &docqa::CompletionRequest,
    ) -> Result<String, docqa::LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable {
            return Err(docqa::LlmError {
                kind: docqa::LlmErrorKind::Unreachable,
                message: "connection refused".to_string(),
            });
        }
        if request.prompt.starts_with("Verify whether the answer") {
            Ok("Confidence: 0.98\nIssues: None".to_string())
        } else {
            Ok(DJF_TEXT.to_string())
        }
    }

    async fn health(&self) -> bool {
        self.reachable
    }
}

/// Index wrapper that counts searches, to prove casual queries skip
/// retrieval entirely.
struct CountingIndex {
    inner: InMemoryIndex,
    searches: AtomicUsize,
}

#[async_trait]
impl VectorIndex for CountingIndex {
    async fn search(&self, embedding: &[f32], k: usize) -> docqa::Result<Vec<docqa::ScoredChunk>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(embedding, k).await
    }

    async fn documents(&self) -> docqa::Result<Vec<IndexedChunk>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.documents().await
    }

    async fn count(&self) -> docqa::Result<usize> {
        self.inner.count().await
    }

    async fn delete_by_file_hash(&self, hash: &str) -> docqa::Result<bool> {
        self.inner.delete_by_file_hash(hash).await
    }

    async fn stats(&self) -> docqa::Result<docqa::IndexStats> {
        self.inner.stats().await
    }
}

struct UniformEmbedder;

#[async_trait]
impl docqa::EmbeddingProvider for UniformEmbedder {
    async fn embed(&self, _text: &str) -> docqa::Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    fn dimensions(&self) -> usize {
        2
    }
}

fn djf_chunk() -> IndexedChunk {
    IndexedChunk {
        id: "djf_0".to_string(),
        text: DJF_TEXT.to_string(),
        embedding: vec![1.0, 0.0],
        metadata: ChunkMetadata::text("aocs_design.pdf", 42, 0),
    }
}

async fn engine_with(
    transport: Arc<ScriptedTransport>,
    chunks: Vec<IndexedChunk>,
) -> (Engine, Arc<InMemoryIndex>) {
    let index = Arc::new(InMemoryIndex::new());
    index.upsert(chunks).await;
    let engine = Engine::builder()
        .config(EngineConfig::default())
        .transport(transport)
        .index(Arc::clone(&index) as Arc<dyn VectorIndex>)
        .embedder(Arc::new(UniformEmbedder))
        .build()
        .unwrap();
    (engine, index)
}

fn assert_core_invariants(response: &docqa::Response) {
    if response.success {
        assert!(response.answer.len() >= 20, "success answers must be substantive");
        assert_eq!(response.verified, response.confidence >= 0.7);
    }
    assert!((0.0..=1.0).contains(&response.confidence));
    assert!(response.images.len() <= 3);
    let mut paths: Vec<&str> = response.images.iter().map(|i| i.path.as_str()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), response.images.len(), "image paths must be distinct");
}

#[tokio::test]
async fn casual_greeting_short_circuits() {
    let transport = ScriptedTransport::healthy();
    let index = Arc::new(CountingIndex { inner: InMemoryIndex::new(), searches: AtomicUsize::new(0) });
    index.inner.upsert(vec![djf_chunk()]).await;

    let engine = Engine::builder()
        .transport(Arc::clone(&transport) as Arc<dyn docqa::LlmTransport>)
        .index(Arc::clone(&index) as Arc<dyn VectorIndex>)
        .embedder(Arc::new(UniformEmbedder))
        .build()
        .unwrap();

    let response = engine.answer(Query::new("Hi there")).await;

    assert!(response.success);
    assert!(response.answer.contains("specialized research assistant"));
    assert!(response.sources.is_empty());
    assert!(response.images.is_empty());
    assert_eq!(transport.call_count(), 0, "casual queries must not call the model");
    assert_eq!(index.searches.load(Ordering::SeqCst), 0, "casual queries must not search");
    assert_core_invariants(&response);
}

#[tokio::test]
async fn factual_query_is_answered_and_cited() {
    let transport = ScriptedTransport::healthy();
    let (engine, _index) = engine_with(Arc::clone(&transport), vec![djf_chunk()]).await;

    let response =
        engine.answer(Query::new("What is the purpose of the Design Justification File?")).await;

    assert!(response.success);
    assert!(response.verified, "confidence was {}", response.confidence);
    assert!(response.confidence >= 0.7);
    assert_eq!(response.fallback_used, None);
    // Page 42 is 0-based internally, cited as page 43.
    assert!(response
        .sources
        .iter()
        .any(|s| s.filename == "aocs_design.pdf" && s.page == 43));
    assert!(response.answer.contains("**Sources:**"));
    assert_core_invariants(&response);
}

#[tokio::test]
async fn oversized_prompt_falls_back_to_simplified_reasoning() {
    let transport = ScriptedTransport::healthy();
    let (engine, _index) = engine_with(Arc::clone(&transport), vec![djf_chunk()]).await;

    // Roughly 1500 words, about 1950 estimated tokens: the full prompt can
    // never fit a 2048-token window alongside the reserve.
    let long_query = format!("Summarize the requirements {}", "verification compliance ".repeat(750));
    let response = engine.answer(Query::new(long_query)).await;

    assert!(response.success);
    assert_eq!(response.fallback_used, Some(FallbackLevel::SimplifiedReasoning));
    assert_core_invariants(&response);
}

#[tokio::test(start_paused = true)]
async fn model_down_degrades_to_direct_extraction() {
    let transport = ScriptedTransport::down();
    let (engine, _index) = engine_with(Arc::clone(&transport), vec![djf_chunk()]).await;

    let response =
        engine.answer(Query::new("What is the purpose of the Design Justification File?")).await;

    assert!(response.success);
    assert_eq!(response.fallback_used, Some(FallbackLevel::DirectExtraction));
    assert!(response.confidence <= 0.7);
    assert!(!response.verified);
    assert!(response.answer.contains("Design Justification File"));
    assert!(response.answer.contains("(Source: aocs_design.pdf, Page: 43)"));
    assert_core_invariants(&response);
}

#[tokio::test]
async fn empty_knowledge_base_fails_cleanly() {
    let transport = ScriptedTransport::healthy();
    let (engine, _index) = engine_with(Arc::clone(&transport), Vec::new()).await;

    let response = engine.answer(Query::new("What is the pointing error budget?")).await;

    assert!(!response.success);
    assert_eq!(response.error.as_ref().unwrap().kind, ErrorKind::NoDocuments);
    assert!(response.sources.is_empty());
    assert_core_invariants(&response);
}

#[tokio::test]
async fn empty_query_is_rejected_at_the_boundary() {
    let transport = ScriptedTransport::healthy();
    let (engine, _index) = engine_with(Arc::clone(&transport), vec![djf_chunk()]).await;

    let response = engine.answer(Query::new("   ")).await;

    assert!(!response.success);
    assert_eq!(response.error.as_ref().unwrap().kind, ErrorKind::EmptyQuery);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn report_intent_attaches_an_html_artifact() {
    let transport = ScriptedTransport::healthy();
    let (engine, _index) = engine_with(Arc::clone(&transport), vec![djf_chunk()]).await;

    let query = "Create a comprehensive report about AOCS documentation requirements";
    let response = engine.answer(Query::new(query)).await;

    assert!(response.success);
    let artifact = response.artifact.as_ref().expect("report intent must attach an artifact");
    assert_eq!(artifact.kind, docqa::ArtifactKind::Report);
    assert!(artifact.content.contains("<h1>"));
    assert!(artifact.content.contains(query), "the query is printed as the subtitle");
    assert!(artifact.content.contains("Sources"));
    assert_core_invariants(&response);
}

#[tokio::test]
async fn images_come_from_top_evidence_deduplicated() {
    let transport = ScriptedTransport::healthy();

    let mut figure = djf_chunk();
    figure.id = "fig_0".to_string();
    figure.metadata.chunk_index = 1;
    figure.metadata.has_image = true;
    figure.metadata.image_path = Some("/static/images/djf_fig.png".to_string());
    let mut duplicate = figure.clone();
    duplicate.id = "fig_1".to_string();
    duplicate.metadata.chunk_index = 2;

    let (engine, _index) =
        engine_with(Arc::clone(&transport), vec![djf_chunk(), figure, duplicate]).await;

    let response =
        engine.answer(Query::new("What is the purpose of the Design Justification File?")).await;

    assert!(response.success);
    assert_eq!(response.images.len(), 1);
    assert_eq!(response.images[0].path, "/static/images/djf_fig.png");
    assert_eq!(response.images[0].page, 43);
    assert_core_invariants(&response);
}

#[tokio::test]
async fn identical_queries_hit_the_cache() {
    let transport = ScriptedTransport::healthy();
    let index = Arc::new(InMemoryIndex::new());
    index.upsert(vec![djf_chunk()]).await;

    let engine = Engine::builder()
        .transport(Arc::clone(&transport) as Arc<dyn docqa::LlmTransport>)
        .index(Arc::clone(&index) as Arc<dyn VectorIndex>)
        .embedder(Arc::new(UniformEmbedder))
        .cache(Arc::new(MemoryResponseCache::new()))
        .build()
        .unwrap();

    let query = "What is the purpose of the Design Justification File?";
    let first = engine.answer(Query::new(query)).await;
    let calls_after_first = transport.call_count();
    let second = engine.answer(Query::new(query)).await;

    assert!(first.success && second.success);
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(transport.call_count(), calls_after_first, "cache hits must not call the model");

    // Identical except for the cache marker.
    let mut first_value = serde_json::to_value(&first).unwrap();
    let mut second_value = serde_json::to_value(&second).unwrap();
    first_value["from_cache"] = serde_json::Value::Bool(false);
    second_value["from_cache"] = serde_json::Value::Bool(false);
    assert_eq!(first_value, second_value);
}

#[tokio::test]
async fn ingestion_invalidates_cached_responses() {
    let transport = ScriptedTransport::healthy();
    let index = Arc::new(InMemoryIndex::new());
    index.upsert(vec![djf_chunk()]).await;

    let engine = Engine::builder()
        .transport(Arc::clone(&transport) as Arc<dyn docqa::LlmTransport>)
        .index(Arc::clone(&index) as Arc<dyn VectorIndex>)
        .embedder(Arc::new(UniformEmbedder))
        .cache(Arc::new(MemoryResponseCache::new()))
        .build()
        .unwrap();

    let query = "What is the purpose of the Design Justification File?";
    let _first = engine.answer(Query::new(query)).await;

    let mut extra = djf_chunk();
    extra.id = "extra".to_string();
    extra.metadata.chunk_index = 7;
    index.upsert(vec![extra]).await;

    let second = engine.answer(Query::new(query)).await;
    assert!(!second.from_cache, "a changed knowledge base must invalidate the cache");
}

#[tokio::test(start_paused = true)]
async fn reasoning_failures_are_logged_with_context() {
    let transport = ScriptedTransport::down();
    let (engine, _index) = engine_with(Arc::clone(&transport), vec![djf_chunk()]).await;

    let _ = engine.answer(Query::new("What is the purpose of the Design Justification File?")).await;

    let records = engine.failure_log().records().await;
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| !r.query.is_empty()));
    assert!(records.iter().any(|r| r.detail == "level 0"));
    assert!(records.iter().any(|r| r.detail == "level 1"));
}
