//! # docent
//!
//! A conversational assistant for analyzing academic PDF documents. Upload
//! a thesis or paper, and ask questions about it: the assistant classifies
//! the document, recovers its table of contents, and answers questions with
//! retrieval-augmented generation scoped either to the whole document or to
//! a single chapter.
//!
//! ## Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | TOML configuration with validated defaults |
//! | [`error`] | Error taxonomy (fatal / user-correctable / runaway) |
//! | [`loader`] | PDF text extraction into ordered page texts |
//! | [`document`] | Document model, fingerprinting, ToC and scopes |
//! | [`chunk`] | Separator-aware overlapping text chunking |
//! | [`embedding`] | Embedding capability (OpenAI + test seams) |
//! | [`completion`] | Chat completion capability |
//! | [`structure`] | Classification and ToC recovery |
//! | [`index`] | In-memory vector index with a single-flight LRU cache |
//! | [`pipeline`] | Conversational RAG pipelines and per-session chains |
//! | [`agent`] | Tool set and the bounded reasoning dispatch loop |
//! | [`session`] | The upload/ask session state machine |
//!
//! The two LLM-facing traits ([`embedding::EmbeddingProvider`] and
//! [`completion::CompletionProvider`]) are the only seams that touch the
//! network; everything else is deterministic and tested in-process.

pub mod agent;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod loader;
pub mod pipeline;
pub mod session;
pub mod structure;
