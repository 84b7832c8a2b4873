//! Vector index collaborator trait.

use async_trait::async_trait;

use crate::document::IndexedChunk;
use crate::error::Result;

/// A chunk returned from dense search with its raw similarity.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matched chunk.
    pub chunk: IndexedChunk,
    /// Raw similarity in `[0, 1]`, higher is more relevant.
    pub similarity: f32,
}

/// Observable state of the index, used for the knowledge-base fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of distinct source files.
    pub document_count: usize,
    /// Total number of stored chunks.
    pub chunk_count: usize,
    /// Unix timestamp of the most recent modification.
    pub last_modified: i64,
}

/// The persistent vector index, written by the ingestion collaborator and
/// read-only from the query path.
///
/// Implementations must be safe for concurrent readers. The engine ships
/// [`InMemoryIndex`](crate::inmemory::InMemoryIndex) for development and
/// tests; production deployments plug in their own backend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest-neighbour search for the `k` chunks most similar to the
    /// given embedding, ordered by descending similarity.
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// All stored chunks, for lexical and section scans.
    async fn documents(&self) -> Result<Vec<IndexedChunk>>;

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize>;

    /// Delete every chunk ingested from the file with the given content
    /// hash. Returns whether anything was deleted.
    async fn delete_by_file_hash(&self, hash: &str) -> Result<bool>;

    /// Observable index state for cache invalidation.
    async fn stats(&self) -> Result<IndexStats>;
}
