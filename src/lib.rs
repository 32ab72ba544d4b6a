//! Client-side plumbing for a book-reading agent: a run orchestrator that
//! drives the remote agent's event stream (including its three interrupt
//! kinds), and a local semantic retrieval engine that answers the agent's
//! tool calls over the book being read.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod run;
pub mod tools;
pub mod traits;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
pub mod testing;

pub use client::HttpRunTransport;
pub use config::AppConfig;
pub use error::{RunError, RunErrorKind, ToolError};
pub use events::RunEvent;
pub use index::{document_id_for, IndexManager};
pub use run::interrupt::{ClarificationAnswer, Interrupt, ResumeDecision, ReviewDecision};
pub use run::{RunHandle, RunOrchestrator, RunPhase, RunState};
pub use tools::ToolDispatcher;
pub use traits::{
    DocumentSource, Embedder, IndexStore, Message, RunInput, RunTransport, ToolCall,
};
