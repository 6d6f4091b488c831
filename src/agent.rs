//! The document agent: tool set, registry, and the reasoning dispatch loop.
//!
//! Dispatch is a ReAct-style loop: the completion capability is shown the
//! tool descriptions, the conversation history, and the user's question,
//! and replies either with an action (`Action:` / `Action Input:`) or a
//! `Final Answer:`. The loop invokes the chosen tool, feeds the observation
//! back, and repeats up to a configured iteration bound. Parsing the model
//! output into a tagged [`AgentStep`] keeps dispatch testable independent
//! of the reasoning capability.
//!
//! Tools share an [`AgentContext`]: the active document, the lazily
//! computed structure report, and the session's chain cache.

use async_trait::async_trait;
use regex::Regex;
use similar::TextDiff;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::OnceCell;

use crate::completion::CompletionProvider;
use crate::config::StructureConfig;
use crate::document::{Document, SectionScope, StructureReport, TocEntry};
use crate::error::DocentError;
use crate::pipeline::ChainCache;
use crate::structure;

// ═══════════════════════════════════════════════════════════════════════
// Context shared by all tools
// ═══════════════════════════════════════════════════════════════════════

/// Bridge from tools to the session's document state.
pub struct AgentContext {
    pub document: Arc<Document>,
    /// Structure analysis result, computed once. `upload` spawns a task
    /// that populates this cell; tools that can trigger analysis call
    /// [`AgentContext::structure_report`] on the same cell and join the
    /// in-flight computation instead of duplicating it.
    pub structure: Arc<OnceCell<StructureReport>>,
    pub chains: Arc<ChainCache>,
    pub completer: Arc<dyn CompletionProvider>,
    pub structure_cfg: StructureConfig,
    pub match_threshold: f64,
}

impl AgentContext {
    /// Cached structure report, computing it on first use.
    pub async fn structure_report(&self) -> &StructureReport {
        self.structure
            .get_or_init(|| async {
                structure::analyze(
                    &self.document,
                    self.completer.as_ref(),
                    &self.structure_cfg,
                )
                .await
            })
            .await
    }

    /// Whole-document RAG answer; also the degraded fallback path.
    pub async fn answer_whole(&self, question: &str) -> Result<String, DocentError> {
        let chain = self
            .chains
            .get_or_build(
                &self.document,
                SectionScope::WholeDocument,
                (1, self.document.page_count()),
            )
            .await
            .map_err(|e| DocentError::Agent(e.to_string()))?;
        chain
            .answer(question)
            .await
            .map_err(|e| DocentError::CapabilityUnavailable(e.to_string()))
    }

    async fn answer_section(&self, index: usize, question: &str) -> Result<String, DocentError> {
        let report = self.structure_report().await;
        let entry = report
            .toc
            .get(index)
            .ok_or_else(|| DocentError::SectionNotFound(format!("chapter {}", index + 1)))?;
        let range = (
            entry.start_page,
            entry.end_page.unwrap_or(self.document.page_count()),
        );

        let chain = self
            .chains
            .get_or_build(&self.document, SectionScope::Chapter(index), range)
            .await
            .map_err(|e| DocentError::Agent(e.to_string()))?;
        chain
            .answer(question)
            .await
            .map_err(|e| DocentError::CapabilityUnavailable(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Section resolution
// ═══════════════════════════════════════════════════════════════════════

fn title_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:chapter|ch\.?)\s*(\d+)\b|^(\d+)[.:\s]").unwrap())
}

/// Chapter number carried by a title or identifier, if any.
fn chapter_number(text: &str) -> Option<usize> {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<usize>() {
        return Some(n);
    }
    title_number_regex().captures(trimmed).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// Resolve a chapter identifier against the ToC.
///
/// Resolution order: chapter number (strict when the ToC titles carry
/// numbers — asking for "Chapter 2" must not silently land on "Chapter 3"),
/// positional index for bare numbers against unnumbered ToCs, then
/// case-insensitive substring, then best char-diff similarity above the
/// threshold.
pub fn resolve_section(
    toc: &[TocEntry],
    identifier: &str,
    threshold: f64,
) -> Result<usize, DocentError> {
    let not_found = || DocentError::SectionNotFound(identifier.to_string());

    if toc.is_empty() {
        return Err(not_found());
    }

    if let Some(wanted) = chapter_number(identifier) {
        let numbered: Vec<(usize, usize)> = toc
            .iter()
            .enumerate()
            .filter_map(|(i, e)| chapter_number(&e.title).map(|n| (i, n)))
            .collect();

        if !numbered.is_empty() {
            return numbered
                .iter()
                .find(|&&(_, n)| n == wanted)
                .map(|&(i, _)| i)
                .ok_or_else(not_found);
        }

        if wanted >= 1 && wanted <= toc.len() {
            return Ok(wanted - 1);
        }
        return Err(not_found());
    }

    let needle = identifier.trim().to_lowercase();
    if !needle.is_empty() {
        if let Some(i) = toc
            .iter()
            .position(|e| e.title.to_lowercase().contains(&needle))
        {
            return Ok(i);
        }
    }

    let mut best: Option<(usize, f64)> = None;
    for (i, entry) in toc.iter().enumerate() {
        let ratio =
            TextDiff::from_chars(entry.title.to_lowercase().as_str(), needle.as_str()).ratio()
                as f64;
        if best.map(|(_, r)| ratio > r).unwrap_or(true) {
            best = Some((i, ratio));
        }
    }

    match best {
        Some((i, ratio)) if ratio >= threshold => Ok(i),
        _ => Err(not_found()),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tool trait and registry
// ═══════════════════════════════════════════════════════════════════════

/// A capability the dispatch loop can invoke by name with a text argument.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, as shown to the reasoner.
    fn name(&self) -> &str;

    /// One-line description the reasoner uses to pick a tool.
    fn description(&self) -> &str;

    async fn invoke(&self, input: &str) -> Result<String, DocentError>;
}

/// Registry of the agent's tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the full document-analysis tool set.
    pub fn for_context(ctx: Arc<AgentContext>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ClassifyDocumentType { ctx: ctx.clone() }));
        registry.register(Box::new(AnalyzeThesisStructure { ctx: ctx.clone() }));
        registry.register(Box::new(ListTableOfContents { ctx: ctx.clone() }));
        registry.register(Box::new(GetPageRangeForChapter { ctx: ctx.clone() }));
        registry.register(Box::new(AnswerPaperQuestion { ctx: ctx.clone() }));
        registry.register(Box::new(AnswerQuestionOnSection { ctx }));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Tool list block for the dispatch prompt.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tool implementations
// ═══════════════════════════════════════════════════════════════════════

struct ClassifyDocumentType {
    ctx: Arc<AgentContext>,
}

#[async_trait]
impl Tool for ClassifyDocumentType {
    fn name(&self) -> &str {
        "classify_document_type"
    }
    fn description(&self) -> &str {
        "Determines if the document is a 'thesis' or a 'paper'. Takes no input."
    }
    async fn invoke(&self, _input: &str) -> Result<String, DocentError> {
        let report = self.ctx.structure_report().await;
        Ok(report.doc_type.to_string())
    }
}

struct AnalyzeThesisStructure {
    ctx: Arc<AgentContext>,
}

#[async_trait]
impl Tool for AnalyzeThesisStructure {
    fn name(&self) -> &str {
        "analyze_thesis_structure"
    }
    fn description(&self) -> &str {
        "Reports whether a thesis is a compilation of standalone papers or a \
         single monograph, based on its chapter titles. Takes no input."
    }
    async fn invoke(&self, _input: &str) -> Result<String, DocentError> {
        // Requires a finished analysis; does not trigger one.
        let report = self.ctx.structure.get().ok_or(DocentError::NotReady)?;
        if report.doc_type != crate::document::DocType::Thesis {
            return Ok(format!(
                "This document is not a thesis (classified as {}).",
                report.doc_type
            ));
        }
        Ok(report.summary.clone())
    }
}

struct ListTableOfContents {
    ctx: Arc<AgentContext>,
}

#[async_trait]
impl Tool for ListTableOfContents {
    fn name(&self) -> &str {
        "list_table_of_contents"
    }
    fn description(&self) -> &str {
        "Lists all chapter titles with their page ranges. Takes no input."
    }
    async fn invoke(&self, _input: &str) -> Result<String, DocentError> {
        let report = self.ctx.structure_report().await;
        if report.toc.is_empty() {
            return Ok("The table of contents is empty or could not be found.".to_string());
        }
        let lines: Vec<String> = report
            .toc
            .iter()
            .enumerate()
            .map(|(i, e)| {
                format!(
                    "{}. {} (pages {}-{})",
                    i + 1,
                    e.title,
                    e.start_page,
                    e.end_page.unwrap_or(e.start_page)
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

struct GetPageRangeForChapter {
    ctx: Arc<AgentContext>,
}

#[async_trait]
impl Tool for GetPageRangeForChapter {
    fn name(&self) -> &str {
        "get_page_range_for_chapter"
    }
    fn description(&self) -> &str {
        "Gets the start and end pages for a chapter. Input: the chapter title or number."
    }
    async fn invoke(&self, input: &str) -> Result<String, DocentError> {
        let report = self.ctx.structure_report().await;
        let index = resolve_section(&report.toc, input, self.ctx.match_threshold)?;
        let entry = &report.toc[index];
        Ok(serde_json::json!({
            "title": entry.title,
            "start_page": entry.start_page,
            "end_page": entry.end_page.unwrap_or(self.ctx.document.page_count()),
        })
        .to_string())
    }
}

struct AnswerPaperQuestion {
    ctx: Arc<AgentContext>,
}

#[async_trait]
impl Tool for AnswerPaperQuestion {
    fn name(&self) -> &str {
        "answer_paper_question"
    }
    fn description(&self) -> &str {
        "Answers a question using the entire document. Input: the question."
    }
    async fn invoke(&self, input: &str) -> Result<String, DocentError> {
        if input.trim().is_empty() {
            return Err(DocentError::Agent("the question must not be empty".into()));
        }
        self.ctx.answer_whole(input.trim()).await
    }
}

struct AnswerQuestionOnSection {
    ctx: Arc<AgentContext>,
}

#[async_trait]
impl Tool for AnswerQuestionOnSection {
    fn name(&self) -> &str {
        "answer_question_on_section"
    }
    fn description(&self) -> &str {
        "Answers a question using only one chapter. Input: JSON with \
         'section' (title or number) and 'question' keys."
    }
    async fn invoke(&self, input: &str) -> Result<String, DocentError> {
        let (section, question) = parse_section_input(input)?;
        let report = self.ctx.structure_report().await;
        let index = resolve_section(&report.toc, &section, self.ctx.match_threshold)?;
        self.ctx.answer_section(index, &question).await
    }
}

/// Parse the section-question tool input: a JSON object with `section` and
/// `question` keys, or a `section | question` fallback for reasoners that
/// refuse to emit JSON.
fn parse_section_input(input: &str) -> Result<(String, String), DocentError> {
    let trimmed = input.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let section = value.get("section").and_then(|s| s.as_str());
        let question = value.get("question").and_then(|q| q.as_str());
        if let (Some(section), Some(question)) = (section, question) {
            return Ok((section.to_string(), question.to_string()));
        }
    }

    if let Some((section, question)) = trimmed.split_once('|') {
        let section = section.trim();
        let question = question.trim();
        if !section.is_empty() && !question.is_empty() {
            return Ok((section.to_string(), question.to_string()));
        }
    }

    Err(DocentError::Agent(
        "expected JSON with 'section' and 'question' keys".to_string(),
    ))
}

// ═══════════════════════════════════════════════════════════════════════
// Dispatch loop
// ═══════════════════════════════════════════════════════════════════════

/// One parsed step of reasoner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStep {
    Final(String),
    Action { name: String, input: String },
    Unparsed,
}

fn action_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*Action:\s*(?P<name>[A-Za-z0-9_]+)\s*$").unwrap()
    })
}

fn action_input_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?ms)^\s*Action Input:\s*(?P<input>.*?)\s*(?:^\s*(?:Thought|Observation):|\z)")
            .unwrap()
    })
}

fn final_answer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)Final Answer:\s*(?P<answer>.*)\z").unwrap())
}

/// Parse a reasoner completion into a tagged step.
///
/// Tolerates code fences and quoted action inputs; an output carrying both
/// an action and a final answer is treated as the action (the reasoner is
/// getting ahead of its observations).
pub fn parse_agent_step(output: &str) -> AgentStep {
    let cleaned = output.replace("```", "");

    if let Some(caps) = action_regex().captures(&cleaned) {
        let name = caps["name"].to_string();
        let input = action_input_regex()
            .captures(&cleaned)
            .map(|c| c["input"].trim().trim_matches('"').to_string())
            .unwrap_or_default();
        return AgentStep::Action { name, input };
    }

    if let Some(caps) = final_answer_regex().captures(&cleaned) {
        return AgentStep::Final(caps["answer"].trim().to_string());
    }

    AgentStep::Unparsed
}

const DISPATCH_SYSTEM: &str = "You are a document-analysis agent. Answer the user's question about the \
uploaded document, using the tools below to gather information.

TOOLS:
{tools}

RESPONSE FORMAT (critical): after a 'Thought:' line, respond with exactly one of:

Thought: <why a tool is needed>
Action: <tool_name>
Action Input: <input for the tool; use \"\" when it takes none>

or, when you have enough information:

Thought: <why you can answer>
Final Answer: <the direct answer to the user's question>

Rules:
1. Classify the document first when its type is unknown.
2. For a thesis, questions about its composition go to analyze_thesis_structure.
3. Always end with a Final Answer.";

const REFORMAT_NUDGE: &str = "Your previous response was not in the required format. Reply with either an \
'Action:' and 'Action Input:' pair or a 'Final Answer:', after a 'Thought:' line.";

/// The bounded reasoning loop over a tool registry.
pub struct Dispatcher {
    registry: ToolRegistry,
    ctx: Arc<AgentContext>,
    max_iterations: u32,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, ctx: Arc<AgentContext>, max_iterations: u32) -> Self {
        Self {
            registry,
            ctx,
            max_iterations,
        }
    }

    /// Run one user turn. `history` is the session transcript shown to the
    /// reasoner for context.
    ///
    /// When the iteration bound is hit, falls back to a direct
    /// whole-document answer rather than surfacing a raw failure; only when
    /// that also fails does the turn error with `MaxIterationsExceeded`.
    pub async fn dispatch(&self, question: &str, history: &str) -> Result<String, DocentError> {
        let system = DISPATCH_SYSTEM.replace("{tools}", &self.registry.describe());
        let mut scratchpad = String::new();

        for iteration in 0..self.max_iterations {
            let prompt = if history.is_empty() {
                format!("QUESTION: {}\n\n{}", question, scratchpad)
            } else {
                format!(
                    "CONVERSATION SO FAR:\n{}\nQUESTION: {}\n\n{}",
                    history, question, scratchpad
                )
            };

            let output = self
                .ctx
                .completer
                .complete(&system, &prompt)
                .await
                .map_err(|e| DocentError::CapabilityUnavailable(e.to_string()))?;

            match parse_agent_step(&output) {
                AgentStep::Final(answer) => return Ok(answer),
                AgentStep::Action { name, input } => {
                    eprintln!(
                        "docent: turn iteration {} -> tool {}",
                        iteration + 1,
                        name
                    );
                    let observation = self.run_tool(&name, &input).await?;
                    scratchpad.push_str(&format!(
                        "Action: {}\nAction Input: {}\nObservation: {}\n",
                        name, input, observation
                    ));
                }
                AgentStep::Unparsed => {
                    scratchpad.push_str(&format!("Observation: {}\n", REFORMAT_NUDGE));
                }
            }
        }

        eprintln!(
            "docent: dispatch hit the {}-iteration bound, degrading to direct answer",
            self.max_iterations
        );
        match self.ctx.answer_whole(question).await {
            Ok(answer) => Ok(format!(
                "(I could not settle on a tool plan, so here is a direct answer.)\n{}",
                answer
            )),
            Err(_) => Err(DocentError::MaxIterationsExceeded {
                iterations: self.max_iterations,
            }),
        }
    }

    /// Invoke a tool; user-correctable failures become observations the
    /// reasoner can react to, everything else fails the turn.
    async fn run_tool(&self, name: &str, input: &str) -> Result<String, DocentError> {
        let tool = match self.registry.find(name) {
            Some(tool) => tool,
            None => {
                return Ok(format!(
                    "Unknown tool '{}'. Available tools: {}",
                    name,
                    self.registry
                        .tools()
                        .iter()
                        .map(|t| t.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            }
        };

        match tool.invoke(input).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_user_correctable() => Ok(format!("Tool failed: {}", e)),
            Err(e) => Err(e),
        }
    }
}
