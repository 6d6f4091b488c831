//! Retrieval index construction and the process-wide index cache.
//!
//! A [`RetrievalIndex`] is an embedding-backed similarity index over the
//! chunks of one (document, scope) pair, immutable once built. Building one
//! is the most expensive operation in the system (one embedding call per
//! chunk batch), so [`IndexCache`] memoizes indexes process-wide:
//!
//! - **Keyed** by (document fingerprint, scope serialization).
//! - **Single-flight**: each key holds a `tokio::sync::OnceCell`; concurrent
//!   requesters for the same key await one in-flight build instead of
//!   duplicating it. Builds for different keys proceed in parallel.
//! - **Bounded**: LRU eviction by key count (`cache.max_indexes`).
//! - A failed build evicts only its own key; the next request retries.
//!
//! The cache is an explicitly constructed object injected into sessions,
//! not ambient global state.

use anyhow::{bail, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::chunk::{chunk_pages, Chunk};
use crate::config::{CacheConfig, ChunkingConfig};
use crate::document::SectionScope;
use crate::embedding::{cosine_similarity, EmbeddingProvider};

/// A chunk returned from a similarity search, with its score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub source_page: usize,
    pub score: f32,
}

/// Embedding-backed similarity index over one (document, scope) pair.
pub struct RetrievalIndex {
    pub fingerprint: String,
    pub scope: SectionScope,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl RetrievalIndex {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top-k most similar chunks for a query vector, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| ScoredChunk {
                text: self.chunks[i].text.clone(),
                source_page: self.chunks[i].source_page,
                score,
            })
            .collect()
    }
}

type CacheKey = (String, String);
type IndexCell = Arc<OnceCell<Arc<RetrievalIndex>>>;

/// Process-wide memoization of retrieval indexes.
pub struct IndexCache {
    cells: Mutex<LruCache<CacheKey, IndexCell>>,
    chunking: ChunkingConfig,
}

impl IndexCache {
    pub fn new(chunking: ChunkingConfig, cache: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(cache.max_indexes.max(1)).unwrap();
        Self {
            cells: Mutex::new(LruCache::new(capacity)),
            chunking,
        }
    }

    /// Return the index for (fingerprint, scope), building it at most once.
    ///
    /// `pages` is the scope-restricted page text; `first_page` its 1-based
    /// document-absolute number. On a hit neither the chunker nor the
    /// embedding capability runs.
    pub async fn get_or_build(
        &self,
        fingerprint: &str,
        scope: SectionScope,
        first_page: usize,
        pages: &[String],
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Arc<RetrievalIndex>> {
        let key: CacheKey = (fingerprint.to_string(), scope.cache_key());

        let cell: IndexCell = {
            let mut cells = self.cells.lock().await;
            cells
                .get_or_insert(key.clone(), || Arc::new(OnceCell::new()))
                .clone()
        };

        let built = cell
            .get_or_try_init(|| self.build(fingerprint, scope, first_page, pages, embedder))
            .await;

        match built {
            Ok(index) => Ok(index.clone()),
            Err(e) => {
                // Invalidate only this key so the next request can retry.
                let mut cells = self.cells.lock().await;
                let stale = cells
                    .peek(&key)
                    .map(|existing| Arc::ptr_eq(existing, &cell) && cell.get().is_none())
                    .unwrap_or(false);
                if stale {
                    cells.pop(&key);
                }
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        fingerprint: &str,
        scope: SectionScope,
        first_page: usize,
        pages: &[String],
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Arc<RetrievalIndex>> {
        let chunks = chunk_pages(
            pages,
            first_page,
            self.chunking.chunk_size,
            self.chunking.overlap,
        );
        if chunks.is_empty() {
            bail!("no extractable text in the requested scope");
        }

        eprintln!(
            "docent: building index {}/{} ({} chunks)",
            &fingerprint[..fingerprint.len().min(12)],
            scope.cache_key(),
            chunks.len()
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedding capability returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        Ok(Arc::new(RetrievalIndex {
            fingerprint: fingerprint.to_string(),
            scope,
            chunks,
            vectors,
        }))
    }

    /// Number of resident indexes (built or building).
    pub async fn len(&self) -> usize {
        self.cells.lock().await.len()
    }
}
