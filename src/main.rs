//! One-shot reading companion over a plain-text book.
//!
//! Usage: `lectern <book.txt> [question]`. Indexes the book on first run,
//! then asks the remote agent the question, executing its tool calls locally
//! and answering clarifications on stdin.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lectern::index::collect_sections;
use lectern::index::store::SqliteIndexStore;
use lectern::index::embeddings::FastembedEmbedder;
use lectern::run::interrupt::{ClarificationAnswer, Interrupt, ResumeDecision, ReviewDecision};
use lectern::traits::{BookMetadata, ReadingPosition, TocEntry};
use lectern::{
    document_id_for, AppConfig, DocumentSource, HttpRunTransport, IndexManager, Message,
    RunEvent, RunInput, RunOrchestrator, ToolDispatcher,
};

/// A plain-text book split into sections on markdown-style `#` headings.
/// Files without headings become one section.
struct TextFileBook {
    title: String,
    sections: Vec<(TocEntry, String)>,
    length: usize,
}

impl TextFileBook {
    fn load(path: &PathBuf) -> anyhow::Result<(Self, String)> {
        let raw = std::fs::read_to_string(path)?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string());

        let mut sections: Vec<(TocEntry, String)> = Vec::new();
        let mut current_title = title.clone();
        let mut current = String::new();
        for line in raw.lines() {
            if let Some(heading) = line.strip_prefix('#') {
                if !current.trim().is_empty() {
                    sections.push(section_entry(sections.len(), &current_title, &current));
                }
                current_title = heading.trim_start_matches('#').trim().to_string();
                current = String::new();
            } else {
                current.push_str(line);
                current.push('\n');
            }
        }
        if !current.trim().is_empty() {
            sections.push(section_entry(sections.len(), &current_title, &current));
        }

        let length = raw.chars().count();
        Ok((
            Self {
                title,
                sections,
                length,
            },
            raw,
        ))
    }
}

fn section_entry(index: usize, title: &str, text: &str) -> (TocEntry, String) {
    (
        TocEntry {
            id: format!("sec{}", index + 1),
            title: title.to_string(),
            children: Vec::new(),
        },
        text.trim().to_string(),
    )
}

#[async_trait]
impl DocumentSource for TextFileBook {
    async fn table_of_contents(&self) -> anyhow::Result<Vec<TocEntry>> {
        Ok(self.sections.iter().map(|(e, _)| e.clone()).collect())
    }

    async fn section(&self, section_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .sections
            .iter()
            .find(|(e, _)| e.id == section_id)
            .map(|(_, text)| text.clone()))
    }

    async fn metadata(&self) -> anyhow::Result<BookMetadata> {
        Ok(BookMetadata {
            title: self.title.clone(),
            author: "unknown".to_string(),
            length: self.length,
        })
    }

    async fn current_page(&self) -> anyhow::Result<Option<ReadingPosition>> {
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(book_path) = args.next().map(PathBuf::from) else {
        eprintln!("Usage: lectern <book.txt> [question]");
        std::process::exit(2);
    };
    let question = match args.next() {
        Some(q) => q,
        None => prompt("Question about the book? ").await?,
    };

    let config = AppConfig::load("config.toml")?;

    let (book, raw) = TextFileBook::load(&book_path)?;
    let book = Arc::new(book);
    let document_id = document_id_for(&raw);

    let store = SqliteIndexStore::open(&config.index.db_path).await?;
    let index = Arc::new(IndexManager::new(
        Arc::new(FastembedEmbedder::new()),
        Arc::new(store),
        config.index.chunking(),
    )?);

    if !index.is_indexed(&document_id).await {
        info!(book = %book.title, "indexing book");
        let sections = collect_sections(book.as_ref()).await?;
        let cancel = tokio_util::sync::CancellationToken::new();
        index
            .build(
                &document_id,
                &sections,
                |p| eprint!("\rindexing... {:3.0}%", p * 100.0),
                &cancel,
            )
            .await?;
        eprintln!();
    }

    let transport = Arc::new(HttpRunTransport::new(
        &config.agent.base_url,
        &config.agent.assistant_id,
    )?);
    let tools = Arc::new(ToolDispatcher::new(
        Arc::clone(&book) as Arc<dyn DocumentSource>,
        Arc::clone(&index),
        document_id.clone(),
    ));
    let orch = RunOrchestrator::new(transport, tools, config.agent.max_tool_rounds);

    let input = RunInput {
        messages: vec![Message::human(&question)],
        book_context: Some(book_context(book.as_ref()).await?),
        payment: config.agent.payment_token.clone(),
        ..Default::default()
    };
    let mut handle = orch.start(input).await?;

    while let Some(event) = handle.events.recv().await {
        match event {
            RunEvent::StreamingContent { content } => {
                eprint!("\r{content}");
            }
            RunEvent::ToolRoundCompleted { round, results } => {
                eprintln!("\n[tool round {round}: {results} result(s)]");
            }
            RunEvent::InterruptRaised { interrupt } => {
                answer_interrupt(&orch, interrupt).await?;
            }
            RunEvent::Completed => break,
            RunEvent::Cancelled => {
                eprintln!("\nrun cancelled");
                return Ok(());
            }
            RunEvent::Errored { error } => {
                eprintln!("\nrun failed: {error}");
                std::process::exit(1);
            }
            _ => {}
        }
    }

    let state = orch.state().await;
    let answer = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == lectern::traits::Role::Assistant)
        .map(|m| m.text())
        .unwrap_or(state.streaming_content);
    println!("\n{answer}");
    Ok(())
}

async fn answer_interrupt(orch: &RunOrchestrator, interrupt: Interrupt) -> anyhow::Result<()> {
    match interrupt {
        Interrupt::Clarification(c) => {
            eprintln!("\n{}", c.question);
            for (i, option) in c.options.iter().enumerate() {
                eprintln!("  {}. {option}", i + 1);
            }
            let answer = prompt("> ").await?;
            orch.resume(
                &c.interrupt_id,
                ResumeDecision::Clarification(ClarificationAnswer::Text(answer)),
            )
            .await?;
        }
        Interrupt::HumanReview(r) => {
            let mut decisions = Vec::with_capacity(r.actions.len());
            for action in &r.actions {
                eprintln!("\nagent wants to run {}: {}", action.name, action.description);
                let answer = prompt("approve? [y/N] ").await?;
                decisions.push(if answer.trim().eq_ignore_ascii_case("y") {
                    ReviewDecision::Approve
                } else {
                    ReviewDecision::Reject
                });
            }
            orch.resume(&r.interrupt_id, ResumeDecision::Review(decisions))
                .await?;
        }
        // Client tool rounds are handled inside the run driver.
        Interrupt::ClientTool(_) => {}
    }
    Ok(())
}

async fn book_context(book: &dyn DocumentSource) -> anyhow::Result<String> {
    let metadata = book.metadata().await?;
    let mut out = format!(
        "Book: {} by {} ({} characters)\nTable of contents:\n",
        metadata.title, metadata.author, metadata.length
    );
    for entry in book.table_of_contents().await? {
        out.push_str(&format!("- {} ({})\n", entry.title, entry.id));
    }
    Ok(out)
}

async fn prompt(text: &str) -> anyhow::Result<String> {
    use std::io::Write;
    eprint!("{text}");
    std::io::stderr().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}
