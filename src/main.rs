//! # docent CLI
//!
//! Command-line front end for the document-analysis assistant.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent info <pdf>` | Classify the document and print its structure summary |
//! | `docent toc <pdf>` | Print the recovered table of contents with page ranges |
//! | `docent ask <pdf> "<question>"` | Answer a single question about the document |
//! | `docent chat <pdf>` | Interactive question-answering session |
//!
//! All commands accept `--config <path>` pointing to a TOML file; without
//! it, `./docent.toml` is used when present, built-in defaults otherwise.
//! The OpenAI backend reads `OPENAI_API_KEY` from the environment.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docent::completion::{CompletionProvider, OpenAIChat};
use docent::config::{self, Config, LlmConfig};
use docent::embedding::{EmbeddingProvider, OpenAIEmbedder};
use docent::index::IndexCache;
use docent::loader::PdfLoader;
use docent::session::Session;

/// docent — ask questions about academic PDF documents.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Conversational analysis of academic PDF documents",
    version,
    long_about = "docent loads a PDF (thesis or paper), classifies it, recovers its table of \
    contents, and answers questions via retrieval-augmented generation — over the whole \
    document or scoped to a single chapter."
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to `./docent.toml` when
    /// that file exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the document and print its structure summary.
    Info {
        /// Path to the PDF document.
        document: PathBuf,
    },

    /// Print the table of contents with chapter page ranges.
    Toc {
        /// Path to the PDF document.
        document: PathBuf,
    },

    /// Answer a single question about the document.
    Ask {
        /// Path to the PDF document.
        document: PathBuf,

        /// The question to answer.
        question: String,
    },

    /// Start an interactive question-answering session.
    ///
    /// Reads questions from stdin until EOF, `exit`, or `quit`.
    Chat {
        /// Path to the PDF document.
        document: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => config::load_config(path),
        None => {
            let default = Path::new("./docent.toml");
            if default.exists() {
                config::load_config(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn build_providers(
    llm: &LlmConfig,
) -> Result<(Arc<dyn EmbeddingProvider>, Arc<dyn CompletionProvider>)> {
    match llm.provider.as_str() {
        "openai" => Ok((
            Arc::new(OpenAIEmbedder::new(llm)?),
            Arc::new(OpenAIChat::new(llm)?),
        )),
        other => anyhow::bail!(
            "llm provider '{}' has no runtime backend; set llm.provider = \"openai\"",
            other
        ),
    }
}

fn open_session(cli: &Cli) -> Result<Session> {
    let cfg = load_config(cli)?;
    config::validate(&cfg)?;
    let (embedder, completer) = build_providers(&cfg.llm)?;
    let index_cache = Arc::new(IndexCache::new(cfg.chunking.clone(), &cfg.cache));
    Ok(Session::new(
        cfg,
        Box::new(PdfLoader),
        embedder,
        completer,
        index_cache,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut session = open_session(&cli)?;

    match &cli.command {
        Commands::Info { document } => {
            let report = session.upload(document)?;
            eprintln!("{}", report.message);
            let structure = session.structure().await?;
            println!("Type: {}", structure.doc_type);
            println!("Pages: {}", report.page_count);
            println!("Chapters found: {}", structure.toc.len());
            println!("{}", structure.summary);
        }

        Commands::Toc { document } => {
            let report = session.upload(document)?;
            eprintln!("{}", report.message);
            let structure = session.structure().await?;
            if structure.toc.is_empty() {
                println!("No table of contents could be recovered.");
            } else {
                for (i, entry) in structure.toc.iter().enumerate() {
                    println!(
                        "{:>3}. {} (pages {}-{})",
                        i + 1,
                        entry.title,
                        entry.start_page,
                        entry.end_page.unwrap_or(entry.start_page)
                    );
                }
            }
        }

        Commands::Ask { document, question } => {
            let report = session.upload(document)?;
            eprintln!("{}", report.message);
            let answer = session.ask(question).await?;
            println!("{}", answer);
        }

        Commands::Chat { document } => {
            let report = session.upload(document)?;
            eprintln!("{}", report.message);
            eprintln!("Type a question, or 'exit' to leave.");
            run_repl(&mut session).await?;
        }
    }

    Ok(())
}

async fn run_repl(session: &mut Session) -> Result<()> {
    let stdin = std::io::stdin();
    loop {
        eprint!("you> ");
        std::io::stderr().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        match session.ask(question).await {
            Ok(answer) => println!("{}\n", answer),
            Err(e) if e.is_user_correctable() => println!("{}\n", e),
            Err(e) => eprintln!("error: {}\n", e),
        }
    }
    Ok(())
}
