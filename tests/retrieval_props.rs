//! Property tests for evidence-set invariants of hybrid retrieval.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docqa::{
    ChunkMetadata, EmbeddingProvider, IndexedChunk, InMemoryIndex, QueryContext, RetrievalAgent,
    VectorIndex,
};
use proptest::prelude::*;

const DIM: usize = 8;

/// Deterministic bag-of-words embedding: tokens hash into buckets, the
/// histogram is L2-normalized. Shared vocabulary means nonzero similarity.
fn hash_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for token in text.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        v[(hasher.finish() % DIM as u64) as usize] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

struct HashEmbedder;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> docqa::Result<Vec<f32>> {
        Ok(hash_embedding(text))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Generate chunks at constrained positions so collisions on
/// `(filename, page, chunk_index)` actually happen and exercise dedup.
fn arb_chunks() -> impl Strategy<Value = Vec<IndexedChunk>> {
    proptest::collection::vec(
        (0usize..3, 0u32..3, 0u32..3, "[a-z]{3,8}( [a-z]{3,8}){2,8}"),
        1..24,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(id, (file, page, chunk_index, text))| {
                let mut metadata = ChunkMetadata::text(format!("doc_{file}.pdf"), page, chunk_index);
                if page == 0 && chunk_index == 0 {
                    metadata.section = Some("3.2 control design".to_string());
                }
                IndexedChunk {
                    id: format!("c{id}"),
                    text: text.clone(),
                    embedding: hash_embedding(&text),
                    metadata,
                }
            })
            .collect()
    })
}

/// **Evidence-set invariants.**
/// *For any* indexed chunk set, query, and `top_k`, the evidence produced
/// by hybrid retrieval SHALL contain no two entries sharing
/// `(filename, page, chunk_index)`, SHALL be ordered by descending fused
/// score, SHALL contain at most `top_k` entries, and every fused score
/// SHALL lie in `[0, 1]`.
mod prop_evidence_invariants {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn dedup_ordering_and_bounds(
            chunks in arb_chunks(),
            query in "[a-z]{3,8}( [a-z]{3,8}){1,6}",
            top_k in 1usize..12,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let evidence = rt.block_on(async {
                let index = Arc::new(InMemoryIndex::new());
                index.upsert(chunks.clone()).await;

                let agent = RetrievalAgent::new(
                    Arc::clone(&index) as Arc<dyn VectorIndex>,
                    Arc::new(HashEmbedder),
                    (0.6, 0.3, 0.1),
                    Duration::from_secs(10),
                );

                let mut ctx = QueryContext::new(query.clone(), query.clone(), "en");
                ctx.top_k = top_k;
                ctx.keywords = query
                    .split_whitespace()
                    .filter(|w| w.len() >= 4)
                    .map(str::to_string)
                    .collect();

                agent.execute(&mut ctx).await.unwrap();
                ctx.evidence
            });

            // At most top_k entries.
            prop_assert!(evidence.len() <= top_k);

            // No duplicate (filename, page, chunk_index).
            let mut seen = HashSet::new();
            for result in &evidence {
                let key = (
                    result.metadata.filename.clone(),
                    result.metadata.page,
                    result.metadata.chunk_index,
                );
                prop_assert!(seen.insert(key), "duplicate evidence entry");
            }

            // Fused scores are in [0, 1] and descending.
            for result in &evidence {
                prop_assert!((0.0..=1.0).contains(&result.score));
            }
            for window in evidence.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "evidence not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
            if let (Some(first), Some(last)) = (evidence.first(), evidence.last()) {
                prop_assert!(first.score >= last.score);
            }
        }
    }
}

/// **Sub-search provenance.**
/// *For any* evidence entry, the recorded sub-source tags SHALL be
/// non-empty, sorted, and unique.
mod prop_source_tags {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn tags_are_sorted_and_unique(
            chunks in arb_chunks(),
            query in "[a-z]{3,8}( [a-z]{3,8}){1,4}",
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let evidence = rt.block_on(async {
                let index = Arc::new(InMemoryIndex::new());
                index.upsert(chunks.clone()).await;

                let agent = RetrievalAgent::new(
                    Arc::clone(&index) as Arc<dyn VectorIndex>,
                    Arc::new(HashEmbedder),
                    (0.6, 0.3, 0.1),
                    Duration::from_secs(10),
                );

                let mut ctx = QueryContext::new(query.clone(), query.clone(), "en");
                ctx.top_k = 10;
                ctx.keywords =
                    query.split_whitespace().map(str::to_string).collect();

                agent.execute(&mut ctx).await.unwrap();
                ctx.evidence
            });

            for result in &evidence {
                prop_assert!(!result.sources.is_empty());
                let mut sorted = result.sources.clone();
                sorted.sort();
                sorted.dedup();
                prop_assert_eq!(&sorted, &result.sources);
            }
        }
    }
}
