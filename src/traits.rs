//! Core data model and the trait seams between subsystems.
//!
//! Everything a collaborator plugs into lives here: the remote run transport,
//! the document-extraction source, the embedding provider, and the index
//! persistence store.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RunError;
use crate::run::interrupt::{InterruptFrame, ResumePayload};

// ---------------------------------------------------------------------------
// Conversation model
// ---------------------------------------------------------------------------

/// One turn in a conversation, in the remote agent's wire shape
/// (`type` discriminates the role).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    /// Present only on assistant messages that request tool use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Present only on tool-result messages; links back to the originating call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Message {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::Human,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::ToolResult,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Flattened text content, joining structured parts.
    pub fn text(&self) -> String {
        self.content.text()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    #[serde(rename = "ai")]
    Assistant,
    #[serde(rename = "tool")]
    ToolResult,
}

/// Message content is either plain text or a structured part list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn len(&self) -> usize {
        self.text().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
}

/// A single tool call as issued by the remote agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
    /// Local execution status. Never sent over the wire.
    #[serde(skip, default)]
    pub status: ToolCallStatus,
    /// Set only once status reaches Completed or Error.
    #[serde(skip, default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Error,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            status: ToolCallStatus::Pending,
            result: None,
        }
    }

    /// Advance the status. Transitions are monotonic
    /// (pending → executing → completed/error); backward moves are rejected.
    pub fn advance(&mut self, next: ToolCallStatus) -> bool {
        let legal = match (self.status, next) {
            (ToolCallStatus::Pending, ToolCallStatus::Executing) => true,
            (ToolCallStatus::Executing, ToolCallStatus::Completed) => true,
            (ToolCallStatus::Executing, ToolCallStatus::Error) => true,
            _ => false,
        };
        if legal {
            self.status = next;
        }
        legal
    }
}

/// Outcome of executing one tool call locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

// ---------------------------------------------------------------------------
// Run input
// ---------------------------------------------------------------------------

/// Context about the passage the user highlighted, forwarded to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
}

/// Everything needed to start one run against the remote agent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunInput {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passage_context: Option<PassageContext>,
    /// Pre-formatted TOC/metadata block the agent reads in its system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_context: Option<String>,
    /// Opaque payment token. Forwarded unmodified; never interpreted locally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<String>,
}

// ---------------------------------------------------------------------------
// Remote run stream
// ---------------------------------------------------------------------------

/// A single server-sent frame from the remote run.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    /// Incremental-token frame: in-progress assistant messages. Content is
    /// accumulated (the full tail so far), not a delta.
    Tokens(Vec<PartialMessage>),
    /// Snapshot frame: the full authoritative message list for the run.
    Snapshot(RunSnapshot),
    /// The run suspended and needs client-supplied input to continue.
    Interrupt(InterruptFrame),
    /// Server-reported run error.
    ErrorFrame(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialMessage {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunSnapshot {
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// A request to open (or reopen) the run stream.
#[derive(Debug, Clone)]
pub enum StreamRequest {
    Start {
        /// None on the very first run of a conversation; echoed thereafter.
        thread_id: Option<String>,
        input: RunInput,
    },
    Resume {
        thread_id: String,
        interrupt_id: String,
        payload: ResumePayload,
    },
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, RunError>> + Send>>;

/// Transport to the remote run server. The orchestrator only ever sees
/// parsed frames, so tests script this seam directly.
#[async_trait]
pub trait RunTransport: Send + Sync {
    async fn create_thread(&self) -> anyhow::Result<String>;
    async fn open_stream(&self, request: StreamRequest) -> anyhow::Result<FrameStream>;
}

// ---------------------------------------------------------------------------
// Document extraction collaborator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocEntry {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    /// Total text length in characters.
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingPosition {
    pub chapter_title: String,
    /// Progress through the book in [0,1].
    pub progress: f32,
    pub visible_text: String,
}

/// The document-extraction collaborator. Rendering and extraction proper are
/// outside this crate; the boundary is this trait.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn table_of_contents(&self) -> anyhow::Result<Vec<TocEntry>>;
    /// Full text of one section, or None if the id is unknown.
    async fn section(&self, section_id: &str) -> anyhow::Result<Option<String>>;
    async fn metadata(&self) -> anyhow::Result<BookMetadata>;
    /// What the user is currently reading, if the host surface tracks it.
    async fn current_page(&self) -> anyhow::Result<Option<ReadingPosition>>;
}

// ---------------------------------------------------------------------------
// Retrieval seams
// ---------------------------------------------------------------------------

/// Text → fixed-length L2-normalized vector. Deterministic for identical
/// input and model version.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Persistent store for completed document indexes, keyed by document id.
/// Read once per process lifetime, written once per completed indexing job.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn load(&self, document_id: &str) -> anyhow::Result<Option<crate::index::DocumentIndex>>;
    async fn save(&self, index: &crate::index::DocumentIndex) -> anyhow::Result<()>;
}
