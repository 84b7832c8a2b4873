//! Data types for indexed chunks and retrieval results.

use serde::{Deserialize, Serialize};

/// What kind of content a chunk was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Plain paragraph text.
    Text,
    /// An image with its caption text.
    Image,
    /// A table rendered as markdown.
    Table,
}

/// Positional and provenance metadata for one indexed chunk.
///
/// Produced by the ingestion collaborator; the engine only reads it.
/// Pages are 0-based here and converted to 1-based in citations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Name of the source file the chunk came from.
    pub filename: String,
    /// 0-based page number within the source file.
    pub page: u32,
    /// Position of this chunk within its page.
    pub chunk_index: u32,
    /// The content kind of the chunk.
    pub kind: ChunkKind,
    /// Section or header label from the document structure, if ingestion
    /// detected one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Path to an extracted image associated with this chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    /// Whether this chunk carries an image.
    pub has_image: bool,
    /// Content hash of the source file, used for bulk deletion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
}

impl ChunkMetadata {
    /// Create text-chunk metadata with the required positional fields.
    pub fn text(filename: impl Into<String>, page: u32, chunk_index: u32) -> Self {
        Self {
            filename: filename.into(),
            page,
            chunk_index,
            kind: ChunkKind::Text,
            section: None,
            image_path: None,
            has_image: false,
            file_hash: None,
        }
    }

    /// The identity key used for evidence deduplication.
    pub fn dedup_key(&self) -> (&str, u32, u32) {
        (self.filename.as_str(), self.page, self.chunk_index)
    }
}

/// A chunk as stored in the vector index: text, embedding, metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// Unique identifier for the chunk.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// The vector embedding for this chunk's text.
    pub embedding: Vec<f32>,
    /// Positional and provenance metadata.
    pub metadata: ChunkMetadata,
}

/// Which sub-search surfaced a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    /// Dense similarity search against the vector index.
    Vector,
    /// Token-overlap scoring against stored chunk texts.
    Keyword,
    /// Section-label and section-number matching.
    Section,
}

/// One retrieved chunk with its fused relevance score.
///
/// The evidence set handed to reasoning is a sequence of these, deduplicated
/// by `(filename, page, chunk_index)` and ordered by descending score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The chunk text.
    pub text: String,
    /// Metadata of the retrieved chunk.
    pub metadata: ChunkMetadata,
    /// Fused relevance score in `[0, 1]`, higher is more relevant.
    pub score: f32,
    /// The sub-searches that surfaced this chunk, sorted and unique.
    pub sources: Vec<SearchSource>,
}

impl SearchResult {
    /// The identity key used for evidence deduplication.
    pub fn dedup_key(&self) -> (&str, u32, u32) {
        self.metadata.dedup_key()
    }
}
