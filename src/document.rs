//! Core data model: documents, table-of-contents entries, and section scopes.
//!
//! A [`Document`] is immutable after load: page texts never change, and the
//! fingerprint derived from them keys every cache downstream. Classification
//! and structure are computed lazily elsewhere and attached to the session,
//! not mutated onto the document itself.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// An uploaded document: ordered page texts plus a stable content fingerprint.
#[derive(Debug, Clone)]
pub struct Document {
    /// SHA-256 over path and page texts; cache key for derived artifacts.
    pub fingerprint: String,
    pub path: PathBuf,
    /// Page texts in document order. Page numbers are 1-based everywhere.
    pub pages: Vec<String>,
}

impl Document {
    pub fn new(path: &Path, pages: Vec<String>) -> Self {
        let fingerprint = fingerprint(path, &pages);
        Self {
            fingerprint,
            path: path.to_path_buf(),
            pages,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Pages covered by a scope, as (1-based start page, page texts).
    ///
    /// `Chapter` scopes must carry a resolved page range; the caller resolves
    /// the ToC entry before building an index over it. Total: an empty
    /// document yields an empty slice.
    pub fn pages_for_range(&self, start_page: usize, end_page: usize) -> (usize, &[String]) {
        if self.pages.is_empty() {
            return (1, &[]);
        }
        let start = start_page.max(1).min(self.pages.len());
        let end = end_page.max(start).min(self.pages.len());
        (start, &self.pages[start - 1..end])
    }
}

/// Stable identifier derived from document content, used as a cache key.
pub fn fingerprint(path: &Path, pages: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    for page in pages {
        hasher.update([0u8]);
        hasher.update(page.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Document classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Unclassified,
    Paper,
    Thesis,
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocType::Unclassified => write!(f, "unclassified"),
            DocType::Paper => write!(f, "paper"),
            DocType::Thesis => write!(f, "thesis"),
        }
    }
}

/// One table-of-contents entry. Entries are ordered by start page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    /// 1-based start page.
    pub start_page: usize,
    /// 1-based inclusive end page; `None` until resolved.
    pub end_page: Option<usize>,
}

/// The portion of a document a retrieval index is built over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionScope {
    WholeDocument,
    /// Index into the document's ToC entry list.
    Chapter(usize),
}

impl SectionScope {
    /// Serialization used in cache keys.
    pub fn cache_key(&self) -> String {
        match self {
            SectionScope::WholeDocument => "whole".to_string(),
            SectionScope::Chapter(i) => format!("chapter:{}", i),
        }
    }
}

/// Result of structure analysis, cached once per document.
#[derive(Debug, Clone)]
pub struct StructureReport {
    pub doc_type: DocType,
    pub toc: Vec<TocEntry>,
    pub is_multi_paper_thesis: bool,
    /// Titles of ToC entries identified as standalone papers.
    pub paper_titles: Vec<String>,
    /// Human-readable summary of the analysis.
    pub summary: String,
}

impl StructureReport {
    /// Degraded result used when nothing could be analyzed.
    pub fn fallback() -> Self {
        Self {
            doc_type: DocType::Paper,
            toc: Vec::new(),
            is_multi_paper_thesis: false,
            paper_titles: Vec::new(),
            summary: "Analysis was inconclusive; treating the document as a paper \
                      with no internal structure."
                .to_string(),
        }
    }
}

/// Resolve end pages in place: each entry ends where the next begins, the
/// last entry runs to the final document page. Entries that would break the
/// ordering invariant (start page not strictly positioned after the previous
/// entry's start) are dropped first.
pub fn resolve_end_pages(toc: &mut Vec<TocEntry>, last_document_page: usize) {
    toc.retain(|e| e.start_page >= 1 && e.start_page <= last_document_page);

    let mut last_start = 0usize;
    toc.retain(|e| {
        if e.start_page >= last_start.max(1) {
            last_start = e.start_page;
            true
        } else {
            false
        }
    });

    let len = toc.len();
    for i in 0..len {
        let end = if i + 1 < len {
            // Touching boundaries allowed: a chapter may start on the page
            // the previous one ends on.
            toc[i + 1].start_page.saturating_sub(1).max(toc[i].start_page)
        } else {
            last_document_page.max(toc[i].start_page)
        };
        toc[i].end_page = Some(end);
    }
}
