//! Conversational retrieval pipelines and their per-session cache.
//!
//! A [`RetrievalPipeline`] bundles a retrieval index with the conversation
//! memory for one (document, scope) pair. Answering a question runs the
//! full RAG protocol: condense the question against memory (so "it" and
//! "the second method" resolve to what the user meant), embed the condensed
//! query, retrieve the top-k chunks, stuff them into the answer prompt,
//! complete, and record the turn.
//!
//! [`ChainCache`] memoizes pipelines per (fingerprint, scope). It is owned
//! by a session — memory must never leak across sessions — while the
//! expensive artifact underneath, the embedding index, is shared
//! process-wide through the injected [`IndexCache`]. Dropping the chain
//! cache is what clears all conversation memory on a new upload.

use anyhow::{bail, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::completion::CompletionProvider;
use crate::config::RetrievalConfig;
use crate::document::{Document, SectionScope};
use crate::embedding::EmbeddingProvider;
use crate::index::{IndexCache, RetrievalIndex};

/// Ordered (question, answer) turns for one scope. Append-only during a
/// session; a window bound drops the oldest turns.
#[derive(Debug, Default)]
pub struct ConversationMemory {
    turns: VecDeque<(String, String)>,
    /// 0 = unbounded.
    window: usize,
}

impl ConversationMemory {
    pub fn new(window: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            window,
        }
    }

    pub fn record(&mut self, question: &str, answer: &str) {
        if self.window > 0 && self.turns.len() >= self.window {
            self.turns.pop_front();
        }
        self.turns.push_back((question.to_string(), answer.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Plain-text transcript used in the condense prompt.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for (q, a) in &self.turns {
            out.push_str("User: ");
            out.push_str(q);
            out.push_str("\nAssistant: ");
            out.push_str(a);
            out.push('\n');
        }
        out
    }
}

/// A retrieval index paired with scope-local conversation memory.
pub struct RetrievalPipeline {
    index: Arc<RetrievalIndex>,
    memory: Mutex<ConversationMemory>,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    top_k: usize,
}

const ANSWER_SYSTEM: &str = "Answer the following question based only on the provided context. \
     If the context does not contain the answer, say that you cannot find it in the document.";

const CONDENSE_SYSTEM: &str = "Given the conversation so far, rewrite the follow-up question as a single \
     standalone question that preserves its meaning. Respond with ONLY the rewritten \
     question.";

impl RetrievalPipeline {
    /// Answer a question against this pipeline's scope.
    pub async fn answer(&self, question: &str) -> Result<String> {
        let condensed = self.condense(question).await;

        let query_vec = self.embedder.embed_query(&condensed).await?;
        let hits = self.index.search(&query_vec, self.top_k);
        if hits.is_empty() {
            bail!("retrieval index has no chunks for this scope");
        }

        let mut context = String::new();
        for hit in &hits {
            context.push_str(&format!("[page {}] {}\n\n", hit.source_page, hit.text));
        }

        let prompt = format!("Context:\n{}\nQuestion: {}", context, condensed);
        let answer = self.completer.complete(ANSWER_SYSTEM, &prompt).await?;

        self.memory.lock().await.record(question, &answer);
        Ok(answer)
    }

    /// Reformulate a follow-up question into a standalone one using memory.
    /// The first question in a scope passes through untouched, as does any
    /// question when the condense call fails.
    async fn condense(&self, question: &str) -> String {
        let transcript = {
            let memory = self.memory.lock().await;
            if memory.is_empty() {
                return question.to_string();
            }
            memory.transcript()
        };

        let prompt = format!(
            "Conversation:\n{}\nFollow-up question: {}",
            transcript, question
        );
        match self.completer.complete(CONDENSE_SYSTEM, &prompt).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten.trim().to_string(),
            Ok(_) => question.to_string(),
            Err(e) => {
                eprintln!("docent: condense step failed ({}), using raw question", e);
                question.to_string()
            }
        }
    }

    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.len()
    }
}

/// Per-session memoization of retrieval pipelines by (fingerprint, scope).
pub struct ChainCache {
    chains: Mutex<HashMap<(String, String), Arc<RetrievalPipeline>>>,
    index_cache: Arc<IndexCache>,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    retrieval: RetrievalConfig,
}

impl ChainCache {
    pub fn new(
        index_cache: Arc<IndexCache>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            chains: Mutex::new(HashMap::new()),
            index_cache,
            embedder,
            completer,
            retrieval,
        }
    }

    /// Return the pipeline for (document, scope), building on miss.
    ///
    /// `page_range` is the 1-based inclusive range the scope covers; for
    /// `WholeDocument` pass `(1, document.page_count())`.
    pub async fn get_or_build(
        &self,
        document: &Document,
        scope: SectionScope,
        page_range: (usize, usize),
    ) -> Result<Arc<RetrievalPipeline>> {
        let key = (document.fingerprint.clone(), scope.cache_key());

        if let Some(chain) = self.chains.lock().await.get(&key) {
            return Ok(chain.clone());
        }

        let (first_page, pages) = document.pages_for_range(page_range.0, page_range.1);
        let index = self
            .index_cache
            .get_or_build(
                &document.fingerprint,
                scope,
                first_page,
                pages,
                self.embedder.as_ref(),
            )
            .await?;

        let chain = Arc::new(RetrievalPipeline {
            index,
            memory: Mutex::new(ConversationMemory::new(self.retrieval.memory_window)),
            embedder: self.embedder.clone(),
            completer: self.completer.clone(),
            top_k: self.retrieval.top_k,
        });

        self.chains
            .lock()
            .await
            .entry(key)
            .or_insert_with(|| chain.clone());
        Ok(chain)
    }

    /// Drop one scope's pipeline (and with it that scope's memory).
    pub async fn reset_scope(&self, fingerprint: &str, scope: SectionScope) {
        self.chains
            .lock()
            .await
            .remove(&(fingerprint.to_string(), scope.cache_key()));
    }

    pub async fn len(&self) -> usize {
        self.chains.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ChunkingConfig};
    use async_trait::async_trait;
    use std::path::Path;

    struct EchoChat;

    #[async_trait]
    impl CompletionProvider for EchoChat {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            Ok("an answer".to_string())
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        fn model_name(&self) -> &str {
            "unit"
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.5]).collect())
        }
    }

    fn chains() -> ChainCache {
        let index_cache = Arc::new(IndexCache::new(
            ChunkingConfig {
                chunk_size: 200,
                overlap: 20,
            },
            &CacheConfig { max_indexes: 4 },
        ));
        ChainCache::new(
            index_cache,
            Arc::new(UnitEmbedder),
            Arc::new(EchoChat),
            RetrievalConfig {
                top_k: 2,
                memory_window: 0,
            },
        )
    }

    #[tokio::test]
    async fn reset_scope_drops_pipeline_and_its_memory() {
        let cache = chains();
        let doc = Document::new(
            Path::new("r.pdf"),
            vec!["some page text about a method".to_string()],
        );

        let chain = cache
            .get_or_build(&doc, SectionScope::WholeDocument, (1, 1))
            .await
            .unwrap();
        chain.answer("what is this?").await.unwrap();
        assert_eq!(chain.memory_len().await, 1);
        assert_eq!(cache.len().await, 1);

        cache
            .reset_scope(&doc.fingerprint, SectionScope::WholeDocument)
            .await;
        assert_eq!(cache.len().await, 0);

        let fresh = cache
            .get_or_build(&doc, SectionScope::WholeDocument, (1, 1))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&chain, &fresh));
        assert_eq!(fresh.memory_len().await, 0, "reset scope forgets its turns");
    }

    #[tokio::test]
    async fn reset_scope_leaves_other_scopes_alone() {
        let cache = chains();
        let doc = Document::new(
            Path::new("s.pdf"),
            vec!["page one text".to_string(), "page two text".to_string()],
        );

        let whole = cache
            .get_or_build(&doc, SectionScope::WholeDocument, (1, 2))
            .await
            .unwrap();
        cache
            .get_or_build(&doc, SectionScope::Chapter(0), (2, 2))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 2);

        cache
            .reset_scope(&doc.fingerprint, SectionScope::Chapter(0))
            .await;
        assert_eq!(cache.len().await, 1);

        let again = cache
            .get_or_build(&doc, SectionScope::WholeDocument, (1, 2))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&whole, &again));
    }

    #[test]
    fn memory_window_drops_oldest_turns() {
        let mut memory = ConversationMemory::new(2);
        memory.record("q1", "a1");
        memory.record("q2", "a2");
        memory.record("q3", "a3");
        assert_eq!(memory.len(), 2);
        let transcript = memory.transcript();
        assert!(!transcript.contains("q1"));
        assert!(transcript.contains("q2"));
        assert!(transcript.contains("q3"));
    }

    #[test]
    fn unbounded_memory_keeps_everything() {
        let mut memory = ConversationMemory::new(0);
        for i in 0..50 {
            memory.record(&format!("q{}", i), "a");
        }
        assert_eq!(memory.len(), 50);
    }

    #[test]
    fn transcript_interleaves_roles() {
        let mut memory = ConversationMemory::new(0);
        memory.record("What is X?", "X is a method.");
        let t = memory.transcript();
        assert_eq!(t, "User: What is X?\nAssistant: X is a method.\n");
    }
}
