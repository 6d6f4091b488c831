//! Page-aware overlapping text chunker.
//!
//! Splits page-ordered document text into chunks of at most `chunk_size`
//! bytes, with `overlap` bytes carried between consecutive chunks. Split
//! points prefer semantic boundaries in descending order: paragraph break,
//! line break, sentence end, word gap, and only then a hard cut (snapped to
//! a UTF-8 character boundary).
//!
//! Each chunk records the 1-based page it starts on, for citation, plus its
//! byte offsets in the joined text. Chunks tile the input: the first starts
//! at offset 0, the last ends at the final byte, and consecutive chunks
//! overlap by at most `overlap` (boundary snapping may shave a few bytes).
//! Pure and deterministic.

/// A chunk of document text with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Contiguous index starting at 0.
    pub chunk_index: usize,
    /// 1-based page number the chunk starts on.
    pub source_page: usize,
    /// Byte offset of the chunk start in the joined page text.
    pub start_offset: usize,
    /// Byte offset one past the chunk end.
    pub end_offset: usize,
    pub text: String,
}

/// Separator hierarchy tried at each split point, most semantic first.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Split pages into overlapping chunks.
///
/// `first_page` is the 1-based number of `pages[0]`, so section-scoped
/// chunking keeps document-absolute page numbers. Returns an empty vector
/// when the pages hold no non-whitespace text.
///
/// Callers guarantee `chunk_size > overlap` (validated in config).
pub fn chunk_pages(
    pages: &[String],
    first_page: usize,
    chunk_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    debug_assert!(chunk_size > overlap);

    // Join pages, remembering where each page starts.
    let mut text = String::new();
    let mut page_starts: Vec<(usize, usize)> = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            text.push('\n');
        }
        page_starts.push((text.len(), first_page + i));
        text.push_str(page);
    }

    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < text.len() {
        let end = chunk_end(&text, start, chunk_size);
        chunks.push(Chunk {
            chunk_index: index,
            source_page: page_at(&page_starts, start),
            start_offset: start,
            end_offset: end,
            text: text[start..end].to_string(),
        });
        index += 1;

        if end >= text.len() {
            break;
        }

        // Step back by the overlap, staying on a char boundary and making
        // forward progress.
        let mut next = prev_boundary(&text, end.saturating_sub(overlap));
        if next <= start {
            next = end;
        }
        start = next;
    }

    chunks
}

/// Choose the end of the chunk starting at `start`: the best separator
/// within the size window, or a hard cut at the window edge.
fn chunk_end(text: &str, start: usize, chunk_size: usize) -> usize {
    if start + chunk_size >= text.len() {
        return text.len();
    }

    let mut hard_end = prev_boundary(text, start + chunk_size);
    if hard_end <= start {
        hard_end = next_boundary(text, start + 1);
    }

    // Only accept a separator in the back half of the window; splitting
    // earlier would produce runt chunks.
    let window = &text[start..hard_end];
    let min_pos = window.len() / 2;
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let split = pos + sep.len();
            if split > min_pos {
                return start + split;
            }
        }
    }

    hard_end
}

/// Page containing the given byte offset.
fn page_at(page_starts: &[(usize, usize)], offset: usize) -> usize {
    match page_starts.binary_search_by_key(&offset, |&(off, _)| off) {
        Ok(i) => page_starts[i].1,
        Err(0) => page_starts.first().map(|&(_, p)| p).unwrap_or(1),
        Err(i) => page_starts[i - 1].1,
    }
}

/// Largest char boundary at or below `i`.
fn prev_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary at or above `i`.
fn next_boundary(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i.min(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    fn joined(pages: &[String]) -> String {
        pages.join("\n")
    }

    /// Rebuild the original text from chunks by dropping each chunk's
    /// overlapping prefix.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for c in chunks {
            let skip = covered.saturating_sub(c.start_offset);
            out.push_str(&c.text[skip..]);
            covered = c.end_offset;
        }
        out
    }

    #[test]
    fn small_input_single_chunk() {
        let p = pages(&["Hello, world!"]);
        let chunks = chunk_pages(&p, 1, 1000, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].source_page, 1);
    }

    #[test]
    fn empty_pages_yield_no_chunks() {
        let p = pages(&["", "   ", "\n"]);
        assert!(chunk_pages(&p, 1, 1000, 100).is_empty());
    }

    #[test]
    fn reconstruction_is_lossless() {
        let body = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. \
                    Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.\n\n"
            .repeat(20);
        let p = pages(&[&body[..], &body[..], &body[..]]);
        let chunks = chunk_pages(&p, 1, 300, 40);
        assert!(chunks.len() > 3);
        assert_eq!(reconstruct(&chunks), joined(&p));
    }

    #[test]
    fn chunks_tile_without_gaps() {
        let body = "word ".repeat(1000);
        let p = pages(&[&body[..]]);
        let chunks = chunk_pages(&p, 1, 200, 30);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, joined(&p).len());
        for w in chunks.windows(2) {
            assert!(w[1].start_offset <= w[0].end_offset, "gap between chunks");
            assert!(w[1].start_offset > w[0].start_offset, "no forward progress");
            assert!(w[0].end_offset - w[1].start_offset <= 30 + 4);
        }
    }

    #[test]
    fn indices_contiguous() {
        let body = "Sentence one. Sentence two. Sentence three. ".repeat(50);
        let chunks = chunk_pages(&pages(&[&body[..]]), 1, 120, 20);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let page = format!("{}\n\n{}", "a".repeat(80), "b".repeat(80));
        let chunks = chunk_pages(&pages(&[&page[..]]), 1, 100, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.ends_with("\n\n"));
        assert!(chunks[1].text.starts_with('b'));
    }

    #[test]
    fn source_pages_tracked() {
        let p = pages(&[&"x".repeat(50), &"y".repeat(50), &"z".repeat(50)]);
        let chunks = chunk_pages(&p, 1, 60, 0);
        assert_eq!(chunks.first().unwrap().source_page, 1);
        assert_eq!(chunks.last().unwrap().source_page, 3);
    }

    #[test]
    fn section_scope_keeps_absolute_page_numbers() {
        let p = pages(&[&"m".repeat(40), &"n".repeat(40)]);
        let chunks = chunk_pages(&p, 12, 50, 0);
        assert_eq!(chunks.first().unwrap().source_page, 12);
        assert_eq!(chunks.last().unwrap().source_page, 13);
    }

    #[test]
    fn multibyte_text_never_splits_chars() {
        let body = "héllo wörld ünïcode ".repeat(100);
        let chunks = chunk_pages(&pages(&[&body[..]]), 1, 64, 16);
        let rebuilt = reconstruct(&chunks);
        assert_eq!(rebuilt, joined(&pages(&[&body[..]])));
    }

    #[test]
    fn deterministic() {
        let body = "Alpha beta gamma delta. ".repeat(100);
        let p = pages(&[&body[..]]);
        let a = chunk_pages(&p, 1, 150, 25);
        let b = chunk_pages(&p, 1, 150, 25);
        assert_eq!(a, b);
    }
}
