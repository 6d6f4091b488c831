//! Error taxonomy for the assistant.
//!
//! Errors fall into three behavioral classes:
//! - fatal to the current upload or turn (`Load`, `UnsupportedFormat`,
//!   `EmptyDocument`, `CapabilityUnavailable` after retries are exhausted)
//! - user-correctable, reported as guidance text (`SectionNotFound`,
//!   `NotReady`, `NoActiveDocument`)
//! - dispatch runaway (`MaxIterationsExceeded`), surfaced together with a
//!   best-effort direct answer rather than a raw failure.
//!
//! Structure analysis never produces an error outward; it degrades to a
//! best-effort report instead (see [`crate::structure`]).

/// Error type covering upload, capability, and dispatch failures.
#[derive(Debug)]
pub enum DocentError {
    /// The input file could not be read or parsed.
    Load(String),
    /// The input file is not a PDF.
    UnsupportedFormat(String),
    /// The PDF contained no extractable text.
    EmptyDocument,
    /// An upstream capability (embedding, completion) failed after retries.
    CapabilityUnavailable(String),
    /// No chapter matched the given identifier above the similarity threshold.
    SectionNotFound(String),
    /// The requested tool needs structure analysis that has not finished yet.
    NotReady,
    /// A question arrived before any document was uploaded.
    NoActiveDocument,
    /// The dispatch loop hit its iteration bound without a final answer.
    MaxIterationsExceeded { iterations: u32 },
    /// A tool failed in a way that should reach the user as a safe message.
    Agent(String),
}

impl std::fmt::Display for DocentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocentError::Load(e) => write!(f, "failed to load document: {}", e),
            DocentError::UnsupportedFormat(ext) => {
                write!(f, "unsupported format: expected a PDF, got '{}'", ext)
            }
            DocentError::EmptyDocument => {
                write!(f, "no text could be extracted from the document")
            }
            DocentError::CapabilityUnavailable(e) => {
                write!(f, "upstream capability unavailable: {}", e)
            }
            DocentError::SectionNotFound(ident) => {
                write!(f, "no chapter matching '{}' in the table of contents", ident)
            }
            DocentError::NotReady => {
                write!(f, "document analysis is still running; try again shortly")
            }
            DocentError::NoActiveDocument => {
                write!(f, "no document has been uploaded yet")
            }
            DocentError::MaxIterationsExceeded { iterations } => {
                write!(f, "agent gave up after {} reasoning iterations", iterations)
            }
            DocentError::Agent(msg) => write!(f, "agent error: {}", msg),
        }
    }
}

impl std::error::Error for DocentError {}

impl DocentError {
    /// Whether this error should be shown to the user as guidance rather
    /// than treated as fatal to the session.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            DocentError::SectionNotFound(_)
                | DocentError::NotReady
                | DocentError::NoActiveDocument
        )
    }
}
