//! In-memory vector index using cosine similarity.
//!
//! This module provides [`InMemoryIndex`], a zero-dependency index backed by
//! a `Vec` protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing, and small corpora; production deployments plug a
//! persistent backend into the [`VectorIndex`] trait instead.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

use crate::document::IndexedChunk;
use crate::error::Result;
use crate::index::{IndexStats, ScoredChunk, VectorIndex};

/// An in-memory vector index using cosine similarity for search.
///
/// Ingestion happens through [`upsert`](InMemoryIndex::upsert), which
/// replaces chunks by id and bumps the modification timestamp so the
/// knowledge-base fingerprint changes.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    chunks: Vec<IndexedChunk>,
    last_modified: i64,
}

impl InMemoryIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace chunks by id.
    pub async fn upsert(&self, chunks: Vec<IndexedChunk>) {
        let mut inner = self.inner.write().await;
        for chunk in chunks {
            match inner.chunks.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => inner.chunks.push(chunk),
            }
        }
        inner.last_modified = chrono::Utc::now().timestamp();
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the dimensions differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let inner = self.inner.read().await;

        let mut scored: Vec<ScoredChunk> = inner
            .chunks
            .iter()
            .map(|chunk| {
                // Clamp into [0, 1]: anti-correlated vectors score zero.
                let similarity = cosine_similarity(&chunk.embedding, embedding).clamp(0.0, 1.0);
                ScoredChunk { chunk: chunk.clone(), similarity }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn documents(&self) -> Result<Vec<IndexedChunk>> {
        Ok(self.inner.read().await.chunks.clone())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.chunks.len())
    }

    async fn delete_by_file_hash(&self, hash: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.chunks.len();
        inner.chunks.retain(|c| c.metadata.file_hash.as_deref() != Some(hash));
        let deleted = inner.chunks.len() != before;
        if deleted {
            inner.last_modified = chrono::Utc::now().timestamp();
        }
        Ok(deleted)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let inner = self.inner.read().await;
        let document_count = inner
            .chunks
            .iter()
            .map(|c| c.metadata.filename.as_str())
            .collect::<HashSet<_>>()
            .len();
        Ok(IndexStats {
            document_count,
            chunk_count: inner.chunks.len(),
            last_modified: inner.last_modified,
        })
    }
}
