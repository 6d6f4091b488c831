//! Document structure analysis: classification, table-of-contents
//! extraction, and monograph-vs-compilation determination.
//!
//! Analysis is expensive (it may call the completion capability several
//! times) and runs once per document; the session caches the report for the
//! document's lifetime. It never fails outward: every path degrades to a
//! best-effort [`StructureReport`], at worst "paper with empty structure".
//!
//! ToC extraction is two-tier: a regex pass over the front matter looking
//! for contents-style lines (dotted leaders, numbered chapter rows), then a
//! completion-capability fallback that asks for a JSON array of
//! `{"title", "page"}` objects when the regex pass finds too little.

use regex::Regex;
use std::sync::OnceLock;

use crate::completion::CompletionProvider;
use crate::config::StructureConfig;
use crate::document::{resolve_end_pages, DocType, Document, StructureReport, TocEntry};

/// Chapter titles that indicate ordinary monograph structure rather than an
/// embedded standalone paper.
const GENERIC_TITLES: [&str; 12] = [
    "introduction",
    "summary",
    "conclusion",
    "discussion",
    "background",
    "literature review",
    "methodology",
    "methods",
    "references",
    "bibliography",
    "acknowledgements",
    "abstract",
];

/// Longest text sent to the classifier prompt.
const CLASSIFY_PROMPT_BUDGET: usize = 6000;
/// Longest text sent to the ToC-extraction prompt.
const TOC_PROMPT_BUDGET: usize = 12000;
/// Minimum entries for the regex pass to be trusted over the LLM fallback.
const MIN_HEURISTIC_ENTRIES: usize = 2;

/// Analyze a document's type and structure. Degrades, never fails.
pub async fn analyze(
    document: &Document,
    completer: &dyn CompletionProvider,
    cfg: &StructureConfig,
) -> StructureReport {
    if document.pages.iter().all(|p| p.trim().is_empty()) {
        return StructureReport::fallback();
    }

    let doc_type = classify(document, completer, cfg).await;

    let mut toc = extract_toc(document, completer, cfg).await;
    resolve_end_pages(&mut toc, document.page_count());

    let paper_titles = identify_papers(&toc);
    let is_multi_paper_thesis = doc_type == DocType::Thesis && !paper_titles.is_empty();
    let summary = summarize(doc_type, &toc, &paper_titles);

    StructureReport {
        doc_type,
        toc,
        is_multi_paper_thesis,
        paper_titles,
        summary,
    }
}

/// Classify via the completion capability, falling back to keyword
/// heuristics when the capability is unavailable or answers off-format.
async fn classify(
    document: &Document,
    completer: &dyn CompletionProvider,
    cfg: &StructureConfig,
) -> DocType {
    let front = front_matter(document, cfg.classify_pages, CLASSIFY_PROMPT_BUDGET);
    if front.trim().is_empty() {
        return DocType::Paper;
    }

    let system =
        "Is the text from a 'thesis' or a 'paper'? Respond with ONLY 'thesis' or 'paper'.";
    match completer.complete(system, &front).await {
        Ok(answer) => match answer.trim().to_lowercase().as_str() {
            "thesis" => DocType::Thesis,
            "paper" => DocType::Paper,
            _ => classify_heuristic(&front),
        },
        Err(e) => {
            eprintln!("docent: classifier capability failed ({}), using heuristic", e);
            classify_heuristic(&front)
        }
    }
}

/// Keyword classifier over the title/abstract pages.
fn classify_heuristic(front: &str) -> DocType {
    let lower = front.to_lowercase();
    let thesis_markers = [
        "thesis",
        "dissertation",
        "in partial fulfillment",
        "doctor of philosophy",
        "master of science",
        "chapter 1",
    ];
    if thesis_markers.iter().any(|m| lower.contains(m)) {
        DocType::Thesis
    } else {
        DocType::Paper
    }
}

/// Extract ToC entries (title, start page), unresolved end pages.
async fn extract_toc(
    document: &Document,
    completer: &dyn CompletionProvider,
    cfg: &StructureConfig,
) -> Vec<TocEntry> {
    let scan_pages = cfg.toc_scan_pages.min(document.page_count());
    let entries = extract_toc_heuristic(&document.pages[..scan_pages]);
    if entries.len() >= MIN_HEURISTIC_ENTRIES {
        return entries;
    }

    extract_toc_llm(&document.pages[..scan_pages], completer).await
}

fn contents_line_regexes() -> &'static [Regex; 2] {
    static RE: OnceLock<[Regex; 2]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            // "Chapter 2: Background ........ 15"
            Regex::new(r"^(?P<title>\S.{2,120}?)\s*\.{2,}\s*(?P<page>\d{1,4})$").unwrap(),
            // "2 Background   15" / "Chapter 2. Background 15"
            Regex::new(r"^(?P<title>(?:[Cc]hapter\s+)?\d+[.:]?\s+\S.{1,120}?)\s{2,}(?P<page>\d{1,4})$")
                .unwrap(),
        ]
    })
}

/// Regex pass: anchor on a "Contents" heading, then parse entry-shaped
/// lines from that point on.
fn extract_toc_heuristic(pages: &[String]) -> Vec<TocEntry> {
    let anchor = pages.iter().position(|p| {
        p.lines().any(|l| {
            let t = l.trim().to_lowercase();
            t == "contents" || t == "table of contents"
        })
    });
    let anchor = match anchor {
        Some(i) => i,
        None => return Vec::new(),
    };

    // A contents listing rarely runs past a few pages.
    let end = (anchor + 3).min(pages.len());
    let mut entries = Vec::new();

    for page in &pages[anchor..end] {
        for line in page.lines() {
            let line = line.trim();
            for re in contents_line_regexes() {
                if let Some(caps) = re.captures(line) {
                    let title = caps["title"].trim_end_matches(['.', ' ']).trim().to_string();
                    if let Ok(page_no) = caps["page"].parse::<usize>() {
                        if !title.is_empty() && page_no >= 1 {
                            entries.push(TocEntry {
                                title,
                                start_page: page_no,
                                end_page: None,
                            });
                        }
                    }
                    break;
                }
            }
        }
    }

    entries
}

/// Completion-capability fallback: ask for the ToC as a JSON array.
async fn extract_toc_llm(pages: &[String], completer: &dyn CompletionProvider) -> Vec<TocEntry> {
    let mut text = pages.join("\n");
    text.truncate(floor_char_boundary(&text, TOC_PROMPT_BUDGET));
    if text.trim().is_empty() {
        return Vec::new();
    }

    let system = "You are a text-processing utility. Analyze the following text and extract \
                  the Table of Contents. Respond with ONLY a valid JSON array, where each \
                  object has a 'title' (string) and 'page' (integer) key. Example: \
                  [{\"title\": \"Chapter 1: Introduction\", \"page\": 1}]. If there is no \
                  table of contents, respond with [].";

    let response = match completer.complete(system, &text).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("docent: ToC extraction capability failed ({})", e);
            return Vec::new();
        }
    };

    parse_toc_json(&response)
}

/// Parse a JSON array of `{"title", "page"}` objects, tolerating code
/// fences and prose around the array.
fn parse_toc_json(response: &str) -> Vec<TocEntry> {
    let start = match response.find('[') {
        Some(i) => i,
        None => return Vec::new(),
    };
    let end = match response.rfind(']') {
        Some(i) if i >= start => i + 1,
        _ => return Vec::new(),
    };

    let parsed: Vec<serde_json::Value> = match serde_json::from_str(&response[start..end]) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    parsed
        .into_iter()
        .filter_map(|item| {
            let title = item.get("title")?.as_str()?.trim().to_string();
            let page = item.get("page")?.as_u64()? as usize;
            if title.is_empty() || page < 1 {
                return None;
            }
            Some(TocEntry {
                title,
                start_page: page,
                end_page: None,
            })
        })
        .collect()
}

/// ToC entries whose titles look like standalone papers: non-generic and
/// reasonably long.
fn identify_papers(toc: &[TocEntry]) -> Vec<String> {
    toc.iter()
        .filter(|entry| {
            let title = entry.title.to_lowercase();
            let is_generic = GENERIC_TITLES.iter().any(|g| title.contains(g));
            !is_generic && title.trim().len() > 15
        })
        .map(|entry| entry.title.clone())
        .collect()
}

fn summarize(doc_type: DocType, toc: &[TocEntry], papers: &[String]) -> String {
    match doc_type {
        DocType::Paper | DocType::Unclassified => {
            if toc.is_empty() {
                format!("Classified as a {}; no table of contents detected.", doc_type)
            } else {
                format!(
                    "Classified as a {}; table of contents with {} entries.",
                    doc_type,
                    toc.len()
                )
            }
        }
        DocType::Thesis => {
            if papers.is_empty() {
                "This appears to be a standard monograph-style thesis, as its chapters \
                 have generic titles like 'Introduction' or 'Conclusion'."
                    .to_string()
            } else {
                format!(
                    "This thesis appears to be a compilation of {} papers:\n- {}",
                    papers.len(),
                    papers.join("\n- ")
                )
            }
        }
    }
}

/// First `n` pages joined, truncated to `budget` bytes on a char boundary.
fn front_matter(document: &Document, n: usize, budget: usize) -> String {
    let n = n.min(document.page_count());
    let mut text = document.pages[..n].join("\n");
    text.truncate(floor_char_boundary(&text, budget));
    text
}

fn floor_char_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
