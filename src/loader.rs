//! Document loading: `load(path) -> ordered page texts`.
//!
//! [`PdfLoader`] extracts text page by page with lopdf so downstream
//! structure analysis and section scoping get real page boundaries. When
//! lopdf yields no text at all (some font encodings defeat its extractor),
//! the whole document is re-extracted with pdf-extract as a single page,
//! which handles more encodings but loses pagination.

use std::path::Path;

use crate::error::DocentError;

/// Capability: load a document into an ordered sequence of page texts.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<String>, DocentError>;
}

/// PDF loader backed by lopdf with a pdf-extract fallback.
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn load(&self, path: &Path) -> Result<Vec<String>, DocentError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if ext != "pdf" {
            return Err(DocentError::UnsupportedFormat(if ext.is_empty() {
                "<none>".to_string()
            } else {
                ext
            }));
        }

        let doc = lopdf::Document::load(path).map_err(|e| DocentError::Load(e.to_string()))?;

        let mut pages = Vec::new();
        for (page_number, _) in doc.get_pages() {
            let text = doc.extract_text(&[page_number]).unwrap_or_default();
            pages.push(normalize_page_text(&text));
        }

        if pages.iter().all(|p| p.trim().is_empty()) {
            // lopdf found nothing; pdf-extract handles more font encodings.
            let whole = pdf_extract::extract_text(path).unwrap_or_default();
            if whole.trim().is_empty() {
                return Err(DocentError::EmptyDocument);
            }
            eprintln!(
                "docent: page-wise extraction empty for {}, using whole-document fallback",
                path.display()
            );
            return Ok(vec![normalize_page_text(&whole)]);
        }

        Ok(pages)
    }
}

/// Collapse the extractor's artifacts: CRLF, trailing page whitespace, and
/// runs of 3+ blank lines.
fn normalize_page_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.replace("\r\n", "\n").lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(trimmed);
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_extension() {
        let err = PdfLoader.load(Path::new("notes.docx")).unwrap_err();
        assert!(matches!(err, DocentError::UnsupportedFormat(_)));
    }

    #[test]
    fn rejects_missing_extension() {
        let err = PdfLoader.load(Path::new("mystery")).unwrap_err();
        assert!(matches!(err, DocentError::UnsupportedFormat(_)));
    }

    #[test]
    fn unreadable_pdf_is_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();
        let err = PdfLoader.load(&path).unwrap_err();
        assert!(matches!(err, DocentError::Load(_)));
    }

    #[test]
    fn normalize_collapses_blank_runs() {
        let text = "Title\r\n\r\n\r\n\r\nBody   \nMore\n\n\n";
        let cleaned = normalize_page_text(text);
        assert_eq!(cleaned, "Title\n\nBody\nMore");
    }
}
