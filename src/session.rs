//! Conversation sessions.
//!
//! A [`Session`] is the outer state machine: no document, then an active
//! document with a dispatcher wired over it. `upload` swaps the active
//! document, starts structure analysis in the background, and resets every
//! piece of conversational state; `ask` runs one dispatch turn against the
//! active document.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::agent::{AgentContext, Dispatcher, ToolRegistry};
use crate::completion::CompletionProvider;
use crate::config::Config;
use crate::document::{Document, StructureReport};
use crate::embedding::EmbeddingProvider;
use crate::error::DocentError;
use crate::index::IndexCache;
use crate::loader::DocumentLoader;
use crate::pipeline::ChainCache;

/// Outcome of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub message: String,
    pub page_count: usize,
    /// Structure-analysis summary, when analysis already finished at upload
    /// time. Usually `None` because analysis runs in the background; await
    /// [`Session::initial_analysis`] for the completed summary.
    pub initial_analysis: Option<String>,
}

struct ActiveDocument {
    document: Arc<Document>,
    ctx: Arc<AgentContext>,
    dispatcher: Dispatcher,
}

/// One user's conversation with the assistant.
///
/// The retrieval-index cache is injected and may be shared across sessions;
/// conversation memory lives in the per-upload [`ChainCache`] and the
/// session transcript, both of which this type owns exclusively.
pub struct Session {
    id: Uuid,
    config: Config,
    loader: Box<dyn DocumentLoader>,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    index_cache: Arc<IndexCache>,
    active: Option<ActiveDocument>,
    history: Vec<(String, String)>,
}

impl Session {
    pub fn new(
        config: Config,
        loader: Box<dyn DocumentLoader>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        index_cache: Arc<IndexCache>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            loader,
            embedder,
            completer,
            index_cache,
            active: None,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn has_document(&self) -> bool {
        self.active.is_some()
    }

    /// Load a document and make it the active one.
    ///
    /// Replaces any previous document: the chain cache (and with it all
    /// conversation memory) and the session transcript are dropped, so
    /// answers about the new document cannot be contaminated by the old
    /// one. Structure analysis starts in the background; question answering
    /// is available immediately.
    pub fn upload(&mut self, path: &Path) -> Result<UploadReport, DocentError> {
        let pages = self.loader.load(path)?;
        // PdfLoader enforces this itself, but the trait is open; a document
        // with no text would panic downstream in retrieval.
        if pages.iter().all(|p| p.trim().is_empty()) {
            return Err(DocentError::EmptyDocument);
        }
        let document = Arc::new(Document::new(path, pages));
        let page_count = document.page_count();

        let chains = Arc::new(ChainCache::new(
            self.index_cache.clone(),
            self.embedder.clone(),
            self.completer.clone(),
            self.config.retrieval.clone(),
        ));

        let ctx = Arc::new(AgentContext {
            document: document.clone(),
            structure: Arc::new(OnceCell::new()),
            chains,
            completer: self.completer.clone(),
            structure_cfg: self.config.structure.clone(),
            match_threshold: self.config.agent.match_threshold,
        });

        // Warm the structure cell off the upload path. Tools joining the
        // cell either find it populated or trigger the same computation.
        let warm = ctx.clone();
        tokio::spawn(async move {
            warm.structure_report().await;
        });

        let dispatcher = Dispatcher::new(
            ToolRegistry::for_context(ctx.clone()),
            ctx.clone(),
            self.config.agent.max_iterations,
        );

        eprintln!(
            "docent: session {} activated {} ({} pages, fingerprint {})",
            self.id,
            path.display(),
            page_count,
            &document.fingerprint[..12.min(document.fingerprint.len())]
        );

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        let report = UploadReport {
            message: format!(
                "Loaded '{}' ({} pages). Structure analysis is running in the background; \
                 you can ask questions right away.",
                name, page_count
            ),
            page_count,
            initial_analysis: ctx.structure.get().map(|r| r.summary.clone()),
        };

        self.active = Some(ActiveDocument {
            document,
            ctx,
            dispatcher,
        });
        self.history.clear();

        Ok(report)
    }

    /// Run one question through the dispatch loop.
    pub async fn ask(&mut self, question: &str) -> Result<String, DocentError> {
        let active = self.active.as_ref().ok_or(DocentError::NoActiveDocument)?;

        let mut transcript = String::new();
        for (q, a) in &self.history {
            transcript.push_str("User: ");
            transcript.push_str(q);
            transcript.push_str("\nAssistant: ");
            transcript.push_str(a);
            transcript.push('\n');
        }

        let answer = active.dispatcher.dispatch(question, &transcript).await?;
        self.history.push((question.to_string(), answer.clone()));
        Ok(answer)
    }

    /// Structure report for the active document, waiting for analysis to
    /// finish if it is still running.
    pub async fn structure(&self) -> Result<&StructureReport, DocentError> {
        let active = self.active.as_ref().ok_or(DocentError::NoActiveDocument)?;
        Ok(active.ctx.structure_report().await)
    }

    /// The structure-analysis summary for the active document, waiting for
    /// analysis to finish. The awaitable form of
    /// [`UploadReport::initial_analysis`].
    pub async fn initial_analysis(&self) -> Result<String, DocentError> {
        Ok(self.structure().await?.summary.clone())
    }

    pub fn document(&self) -> Option<&Document> {
        self.active.as_ref().map(|a| a.document.as_ref())
    }
}
