//! Hybrid retrieval: dense, lexical, and section search with score fusion.
//!
//! The three sub-searches run concurrently over the same indexed chunk set,
//! each under its own timeout. Fusion is deterministic and order-independent,
//! so concurrency never changes the evidence set. Failure of one or two
//! sub-searches degrades to the union of the survivors; only if all three
//! fail does the agent report failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::document::{ChunkKind, ChunkMetadata, SearchResult, SearchSource};
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::index::VectorIndex;
use crate::response::{QueryContext, QueryType};
use crate::understanding::{has_unit_token, tokenize};

/// Fused-score multiplier for table chunks on quantitative queries.
const TABLE_BOOST: f32 = 1.5;

/// One hit from a single sub-search, before fusion.
#[derive(Debug, Clone)]
struct SubHit {
    text: String,
    metadata: ChunkMetadata,
    score: f32,
    source: SearchSource,
}

/// Per-chunk fusion state: the best score seen from each sub-search.
#[derive(Debug)]
struct FusionEntry {
    text: String,
    metadata: ChunkMetadata,
    vector: Option<f32>,
    keyword: Option<f32>,
    section: Option<f32>,
}

impl FusionEntry {
    fn absorb(&mut self, hit: &SubHit) {
        let slot = match hit.source {
            SearchSource::Vector => &mut self.vector,
            SearchSource::Keyword => &mut self.keyword,
            SearchSource::Section => &mut self.section,
        };
        *slot = Some(slot.map_or(hit.score, |s: f32| s.max(hit.score)));
    }
}

/// The second cognitive stage: assemble the evidence set.
pub struct RetrievalAgent {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_weight: f32,
    keyword_weight: f32,
    section_weight: f32,
    subsearch_timeout: Duration,
}

impl RetrievalAgent {
    /// Create the agent with fusion weights and the per-sub-search timeout.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        weights: (f32, f32, f32),
        subsearch_timeout: Duration,
    ) -> Self {
        Self {
            index,
            embedder,
            vector_weight: weights.0,
            keyword_weight: weights.1,
            section_weight: weights.2,
            subsearch_timeout,
        }
    }

    /// Run the three sub-searches, fuse, deduplicate, and write the top
    /// `ctx.top_k` evidence entries onto the context.
    ///
    /// An empty index yields an empty evidence set, never an error.
    pub async fn execute(&self, ctx: &mut QueryContext) -> Result<()> {
        let query = ctx.user_query.clone();
        let k = ctx.top_k;
        // Oversample the sub-searches so fusion has something to merge.
        let pool = k * 2;

        let (dense, lexical, section) = tokio::join!(
            self.bounded(self.dense_search(&query, pool), "vector"),
            self.bounded(self.lexical_search(&ctx.keywords, pool), "keyword"),
            self.bounded(self.section_search(&query, pool), "section"),
        );

        let mut hits: Vec<SubHit> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        for outcome in [dense, lexical, section] {
            match outcome {
                Ok(sub) => hits.extend(sub),
                Err(e) => {
                    warn!(error = %e, "retrieval sub-search failed, degrading");
                    failures.push(e.to_string());
                }
            }
        }
        if failures.len() == 3 {
            return Err(EngineError::Retrieval(format!(
                "all retrieval sub-searches failed: {}",
                failures.join("; ")
            )));
        }

        let boost_tables = matches!(ctx.query_type, QueryType::Numerical | QueryType::Extraction)
            || has_unit_token(&tokenize(&query));

        let mut evidence = self.fuse(hits, boost_tables);
        evidence.truncate(k);

        info!(
            result_count = evidence.len(),
            top_k = k,
            degraded = !failures.is_empty(),
            "hybrid retrieval complete"
        );
        ctx.evidence = evidence;
        Ok(())
    }

    /// Apply the sub-search timeout, flattening elapsed into an error.
    async fn bounded(
        &self,
        search: impl std::future::Future<Output = Result<Vec<SubHit>>>,
        name: &str,
    ) -> Result<Vec<SubHit>> {
        match timeout(self.subsearch_timeout, search).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Retrieval(format!("{name} search timed out"))),
        }
    }

    async fn dense_search(&self, query: &str, k: usize) -> Result<Vec<SubHit>> {
        let embedding = self.embedder.embed(query).await?;
        let scored = self.index.search(&embedding, k).await?;
        debug!(count = scored.len(), "dense search");
        Ok(scored
            .into_iter()
            .map(|s| SubHit {
                text: s.chunk.text,
                metadata: s.chunk.metadata,
                score: s.similarity.clamp(0.0, 1.0),
                source: SearchSource::Vector,
            })
            .collect())
    }

    /// Token-overlap scoring over all stored chunk texts.
    ///
    /// `score = matched / total × 0.5 + 0.5` when at least one keyword
    /// matches, zero otherwise.
    async fn lexical_search(&self, keywords: &[String], k: usize) -> Result<Vec<SubHit>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let chunks = self.index.documents().await?;
        let total = keywords.len() as f32;

        let mut hits: Vec<SubHit> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let lower = chunk.text.to_lowercase();
                let matched = keywords.iter().filter(|kw| lower.contains(kw.as_str())).count();
                if matched == 0 {
                    return None;
                }
                Some(SubHit {
                    text: chunk.text,
                    metadata: chunk.metadata,
                    score: (matched as f32 / total) * 0.5 + 0.5,
                    source: SearchSource::Keyword,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        debug!(count = hits.len(), "lexical search");
        Ok(hits)
    }

    /// Section-label overlap plus explicit section-number matching.
    async fn section_search(&self, query: &str, k: usize) -> Result<Vec<SubHit>> {
        let query_tokens = tokenize(query);
        let sections = section_numbers(&query_tokens);
        let content_tokens: Vec<&String> =
            query_tokens.iter().filter(|t| t.chars().count() >= 4).collect();

        if sections.is_empty() && content_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.index.documents().await?;
        let mut hits: Vec<SubHit> = Vec::new();

        for chunk in chunks {
            let mut score: f32 = 0.0;

            if let Some(label) = &chunk.metadata.section {
                let label_tokens = tokenize(label);
                if !label_tokens.is_empty() {
                    let shared = label_tokens
                        .iter()
                        .filter(|t| content_tokens.iter().any(|q| *q == *t))
                        .count();
                    if shared > 0 {
                        score = shared as f32 / label_tokens.len() as f32;
                    }
                }
            }

            for section in &sections {
                let spaced = format!(" {section} ");
                let padded = format!(" {} ", chunk.text);
                if padded.contains(&spaced) {
                    score = score.max(0.9);
                } else if chunk.text.contains(section.as_str()) {
                    score = score.max(0.7);
                }
            }

            if score > 0.0 {
                hits.push(SubHit {
                    text: chunk.text,
                    metadata: chunk.metadata,
                    score: score.clamp(0.0, 1.0),
                    source: SearchSource::Section,
                });
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        debug!(count = hits.len(), "section search");
        Ok(hits)
    }

    /// Merge sub-search hits into the deduplicated, score-ordered evidence
    /// set.
    ///
    /// The fused score is a weighted sum renormalized over the sub-searches
    /// that actually scored the chunk. Ties break by vector score, then by
    /// chunk position.
    fn fuse(&self, hits: Vec<SubHit>, boost_tables: bool) -> Vec<SearchResult> {
        let mut entries: HashMap<(String, u32, u32), FusionEntry> = HashMap::new();

        for hit in hits {
            let key = (
                hit.metadata.filename.clone(),
                hit.metadata.page,
                hit.metadata.chunk_index,
            );
            entries
                .entry(key)
                .or_insert_with(|| FusionEntry {
                    text: hit.text.clone(),
                    metadata: hit.metadata.clone(),
                    vector: None,
                    keyword: None,
                    section: None,
                })
                .absorb(&hit);
        }

        let mut results: Vec<(SearchResult, f32)> = entries
            .into_values()
            .map(|entry| {
                let mut weighted = 0.0;
                let mut weight_sum = 0.0;
                let mut sources = Vec::new();
                if let Some(s) = entry.vector {
                    weighted += s * self.vector_weight;
                    weight_sum += self.vector_weight;
                    sources.push(SearchSource::Vector);
                }
                if let Some(s) = entry.keyword {
                    weighted += s * self.keyword_weight;
                    weight_sum += self.keyword_weight;
                    sources.push(SearchSource::Keyword);
                }
                if let Some(s) = entry.section {
                    weighted += s * self.section_weight;
                    weight_sum += self.section_weight;
                    sources.push(SearchSource::Section);
                }
                let mut fused = if weight_sum > 0.0 { weighted / weight_sum } else { 0.0 };
                if boost_tables && entry.metadata.kind == ChunkKind::Table {
                    fused *= TABLE_BOOST;
                }
                sources.sort();
                let vector_score = entry.vector.unwrap_or(0.0);
                (
                    SearchResult {
                        text: entry.text,
                        metadata: entry.metadata,
                        score: fused.clamp(0.0, 1.0),
                        sources,
                    },
                    vector_score,
                )
            })
            .collect();

        results.sort_by(|(a, a_vec), (b, b_vec)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_vec.partial_cmp(a_vec).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.dedup_key().cmp(&b.dedup_key()))
        });

        results.into_iter().map(|(r, _)| r).collect()
    }
}

/// Extract explicit section numbers like `3.2` or `3.2.9` from the query
/// tokens.
fn section_numbers(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| {
            let segments: Vec<&str> = t.split('.').collect();
            (2..=3).contains(&segments.len())
                && segments.iter().all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        })
        .cloned()
        .collect()
}
