//! End-to-end scenarios over the session/dispatch/retrieval stack with
//! scripted providers. The completion mock routes on the system prompt,
//! since structure analysis, condensing, answer synthesis, and the dispatch
//! loop all share one provider.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use docent::completion::CompletionProvider;
use docent::config::Config;
use docent::embedding::EmbeddingProvider;
use docent::error::DocentError;
use docent::index::IndexCache;
use docent::loader::DocumentLoader;
use docent::session::Session;

struct StaticLoader {
    pages: Vec<String>,
}

impl DocumentLoader for StaticLoader {
    fn load(&self, _path: &Path) -> Result<Vec<String>, DocentError> {
        Ok(self.pages.clone())
    }
}

/// Completion mock: fixed answers for classification, ToC extraction,
/// condensing, and answer synthesis; a scripted queue for the dispatch
/// loop. Records every call for later assertions.
struct MockChat {
    classification: &'static str,
    condensed: Option<&'static str>,
    dispatch: Mutex<VecDeque<String>>,
    log: Mutex<Vec<(String, String)>>,
}

impl MockChat {
    fn new(classification: &'static str, dispatch: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            classification,
            condensed: None,
            dispatch: Mutex::new(dispatch.iter().map(|s| s.to_string()).collect()),
            log: Mutex::new(Vec::new()),
        })
    }

    fn with_condensed(classification: &'static str, condensed: &'static str, dispatch: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            classification,
            condensed: Some(condensed),
            dispatch: Mutex::new(dispatch.iter().map(|s| s.to_string()).collect()),
            log: Mutex::new(Vec::new()),
        })
    }

    fn saw_prompt_containing(&self, needle: &str) -> bool {
        self.log
            .lock()
            .unwrap()
            .iter()
            .any(|(_, prompt)| prompt.contains(needle))
    }
}

#[async_trait]
impl CompletionProvider for MockChat {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.log
            .lock()
            .unwrap()
            .push((system.to_string(), prompt.to_string()));

        if system.contains("Is the text from") {
            return Ok(self.classification.to_string());
        }
        if system.contains("text-processing utility") {
            return Ok("[]".to_string());
        }
        if system.contains("standalone question") {
            return Ok(self.condensed.unwrap_or("rewritten").to_string());
        }
        if system.contains("based only on the provided context") {
            return Ok("The document says so.".to_string());
        }
        Ok(self
            .dispatch
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Final Answer: done".to_string()))
    }
}

/// Deterministic word-bucket embedder that records every query text, so
/// tests can observe what actually reached retrieval.
struct RecordingEmbedder {
    queries: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queries: Mutex::new(Vec::new()),
        })
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn bucket(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 16];
        for word in text.split_whitespace() {
            let mut h = 0usize;
            for b in word.to_lowercase().bytes() {
                h = h.wrapping_mul(31).wrapping_add(b as usize);
            }
            v[h % 16] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for RecordingEmbedder {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::bucket(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.queries.lock().unwrap().push(text.to_string());
        Ok(Self::bucket(text))
    }
}

fn session(
    pages: &[&str],
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
) -> Session {
    let config = Config::default();
    let index_cache = Arc::new(IndexCache::new(config.chunking.clone(), &config.cache));
    Session::new(
        config,
        Box::new(StaticLoader {
            pages: pages.iter().map(|p| p.to_string()).collect(),
        }),
        embedder,
        completer,
        index_cache,
    )
}

const PAPER_PAGES: &[&str] = &[
    "Abstract. We present a gradient descent method for sparse recovery.",
    "The method converges under mild assumptions. Limitations include \
     sensitivity to the chosen step size.",
];

const THESIS_PAGES: &[&str] = &[
    "Contents\n\
     Chapter 1: Introduction .......... 1\n\
     Chapter 3: Results .......... 3",
    "Chapter 1 describes the motivation for this dissertation.",
    "Chapter 3 reports the experimental results in detail.",
];

#[tokio::test]
async fn paper_without_toc_reports_empty_contents() {
    let chat = MockChat::new(
        "paper",
        &[
            "Thought: the type is unknown.\n\
             Action: classify_document_type\n\
             Action Input: \"\"",
            "Thought: check for chapters.\n\
             Action: list_table_of_contents\n\
             Action Input: \"\"",
            "Thought: enough.\n\
             Final Answer: It is a paper without a table of contents.",
        ],
    );
    let mut s = session(PAPER_PAGES, RecordingEmbedder::new(), chat.clone());

    s.upload(Path::new("paper.pdf")).unwrap();
    let answer = s.ask("What kind of document is this?").await.unwrap();

    assert_eq!(answer, "It is a paper without a table of contents.");
    assert!(chat.saw_prompt_containing("Observation: paper"));
    assert!(chat.saw_prompt_containing("empty or could not be found"));
}

#[tokio::test]
async fn thesis_structure_tool_rejects_papers() {
    let chat = MockChat::new(
        "paper",
        &[
            "Thought: the type is unknown.\n\
             Action: classify_document_type\n\
             Action Input: \"\"",
            "Thought: check its composition.\n\
             Action: analyze_thesis_structure\n\
             Action Input: \"\"",
            "Thought: there is nothing to analyze.\n\
             Final Answer: This is a paper, so it has no thesis structure.",
        ],
    );
    let mut s = session(PAPER_PAGES, RecordingEmbedder::new(), chat.clone());

    s.upload(Path::new("paper.pdf")).unwrap();
    let answer = s
        .ask("Is this thesis a compilation of papers?")
        .await
        .unwrap();

    assert_eq!(answer, "This is a paper, so it has no thesis structure.");
    assert!(chat.saw_prompt_containing("not a thesis (classified as paper)"));
}

#[tokio::test]
async fn missing_chapter_becomes_guidance_observation() {
    let chat = MockChat::new(
        "thesis",
        &[
            "Thought: scope to the chapter.\n\
             Action: answer_question_on_section\n\
             Action Input: {\"section\": \"Chapter 2\", \"question\": \"What is studied?\"}",
            "Thought: that chapter does not exist.\n\
             Final Answer: There is no Chapter 2 in this document.",
        ],
    );
    let mut s = session(THESIS_PAGES, RecordingEmbedder::new(), chat.clone());

    s.upload(Path::new("thesis.pdf")).unwrap();
    let answer = s.ask("What does Chapter 2 study?").await.unwrap();

    assert_eq!(answer, "There is no Chapter 2 in this document.");
    // The failed resolution must come back as guidance, not kill the turn.
    assert!(chat.saw_prompt_containing("no chapter matching 'Chapter 2'"));
}

#[tokio::test]
async fn section_scoped_answer_uses_resolved_chapter() {
    let chat = MockChat::new(
        "thesis",
        &[
            "Action: answer_question_on_section\n\
             Action Input: {\"section\": \"Chapter 3\", \"question\": \"What are the results?\"}",
            "Final Answer: The results are reported in Chapter 3.",
        ],
    );
    let embedder = RecordingEmbedder::new();
    let mut s = session(THESIS_PAGES, embedder.clone(), chat.clone());

    s.upload(Path::new("thesis.pdf")).unwrap();
    let answer = s.ask("What are the results?").await.unwrap();

    assert_eq!(answer, "The results are reported in Chapter 3.");
    assert!(chat.saw_prompt_containing("Observation: The document says so."));
    assert_eq!(embedder.queries(), vec!["What are the results?".to_string()]);
}

#[tokio::test]
async fn follow_up_questions_are_condensed_against_memory() {
    let first = "What method does the paper use?";
    let second = "What are its limitations?";
    let condensed = "What are the limitations of the gradient descent method?";

    let step_one = format!("Action: answer_paper_question\nAction Input: {}", first);
    let step_two = format!("Action: answer_paper_question\nAction Input: {}", second);
    let chat = MockChat::with_condensed(
        "paper",
        condensed,
        &[
            step_one.as_str(),
            "Final Answer: gradient descent",
            step_two.as_str(),
            "Final Answer: step size sensitivity",
        ],
    );
    let embedder = RecordingEmbedder::new();
    let mut s = session(PAPER_PAGES, embedder.clone(), chat);

    s.upload(Path::new("paper.pdf")).unwrap();
    s.ask(first).await.unwrap();
    s.ask(second).await.unwrap();

    let queries = embedder.queries();
    assert_eq!(queries.len(), 2);
    // First question in a scope goes through untouched.
    assert_eq!(queries[0], first);
    // The follow-up reaches retrieval in condensed form.
    assert_eq!(queries[1], condensed);
}

#[tokio::test]
async fn new_upload_clears_conversation_memory() {
    let chat = MockChat::with_condensed(
        "paper",
        "REWRITTEN",
        &[
            "Action: answer_paper_question\nAction Input: seed question",
            "Final Answer: seeded",
            "Action: answer_paper_question\nAction Input: fresh question",
            "Final Answer: fresh",
        ],
    );
    let embedder = RecordingEmbedder::new();
    let mut s = session(PAPER_PAGES, embedder.clone(), chat);

    s.upload(Path::new("paper.pdf")).unwrap();
    s.ask("seed question").await.unwrap();

    s.upload(Path::new("paper.pdf")).unwrap();
    s.ask("fresh question").await.unwrap();

    let queries = embedder.queries();
    assert_eq!(queries.len(), 2);
    // Memory was reset: the post-upload question must not be condensed.
    assert_eq!(queries[1], "fresh question");
}

#[tokio::test]
async fn malformed_reasoner_output_gets_one_nudge() {
    let chat = MockChat::new(
        "paper",
        &[
            "I believe the answer is probably gradients.",
            "Thought: corrected.\nFinal Answer: gradients",
        ],
    );
    let mut s = session(PAPER_PAGES, RecordingEmbedder::new(), chat.clone());

    s.upload(Path::new("paper.pdf")).unwrap();
    let answer = s.ask("What is this about?").await.unwrap();

    assert_eq!(answer, "gradients");
    assert!(chat.saw_prompt_containing("not in the required format"));
}

#[tokio::test]
async fn runaway_dispatch_degrades_to_direct_answer() {
    // Never emits a final answer; every round asks for the same tool.
    let looping: Vec<&str> = vec![
        "Action: classify_document_type\nAction Input: \"\"";
        12
    ];
    let chat = MockChat::new("paper", &looping);
    let embedder = RecordingEmbedder::new();
    let mut s = session(PAPER_PAGES, embedder.clone(), chat);

    s.upload(Path::new("paper.pdf")).unwrap();
    let answer = s.ask("What is this about?").await.unwrap();

    assert!(answer.contains("The document says so."));
    // The degraded path ran real retrieval over the whole document.
    assert_eq!(embedder.queries().len(), 1);
}
