//! Response cache seam and knowledge-base fingerprinting.
//!
//! The cache is a collaborator behind the [`ResponseCache`] trait; the
//! engine only computes keys and decides when to read and write. Keys bind
//! a normalized query to a fingerprint of the index's observable state, so
//! any ingestion change invalidates every cached response at once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::index::VectorIndex;
use crate::response::Response;

/// Length of the knowledge-base fingerprint, in hex characters.
const FINGERPRINT_HEX_CHARS: usize = 16;

/// The response cache collaborator.
///
/// Writes must be atomic by key; reads may see a slightly stale value.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Look up a cached response.
    async fn get(&self, key: &str) -> Result<Option<Response>>;

    /// Store a response under the key with the given time-to-live.
    async fn put(&self, key: &str, response: &Response, ttl: Duration) -> Result<()>;
}

/// Normalize a query for cache-key purposes: trim, lowercase, collapse
/// internal whitespace.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// The cache key: SHA-256 of `normalize(query) || "\x00" || fingerprint`.
pub fn cache_key(query: &str, fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hasher.update([0u8]);
    hasher.update(fingerprint.as_bytes());
    hex_encode(&hasher.finalize())
}

/// A short digest of the index's observable state.
///
/// Derived from `(document_count, chunk_count, last_modified)`, so any
/// ingestion or deletion changes it and invalidates cached responses.
pub async fn kb_fingerprint(index: &dyn VectorIndex) -> Result<String> {
    let stats = index.stats().await?;
    let mut hasher = Sha256::new();
    hasher.update(
        format!("{}_{}_{}", stats.document_count, stats.chunk_count, stats.last_modified)
            .as_bytes(),
    );
    let digest = hex_encode(&hasher.finalize());
    Ok(digest[..FINGERPRINT_HEX_CHARS].to_string())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// An in-memory TTL cache for development and tests.
///
/// Expired entries are dropped lazily on read. Production deployments plug
/// a persistent backend (the source system used SQLite) into the trait.
#[derive(Default)]
pub struct MemoryResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    response: Response,
    expires_at: Instant,
}

impl MemoryResponseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    async fn get(&self, key: &str) -> Result<Option<Response>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.response.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop it under the write lock.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, response: &Response, ttl: Duration) -> Result<()> {
        let entry = CacheEntry { response: response.clone(), expires_at: Instant::now() + ttl };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }
}
