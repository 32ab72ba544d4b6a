//! Observer notifications for run state changes.
//!
//! UI layers subscribe to these instead of reading shared mutable state; the
//! orchestrator owns the `RunState` and emits an event for every visible
//! change.

use crate::run::interrupt::Interrupt;
use crate::traits::Message;

#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A remote thread was created for this conversation.
    ThreadCreated { thread_id: String },
    /// A message was appended locally (e.g. the optimistic human turn).
    MessageAppended { message: Message },
    /// The in-progress assistant tail grew. Carries the full accumulated text.
    StreamingContent { content: String },
    /// A snapshot replaced the message list.
    MessagesReplaced { count: usize },
    /// The run parked on an interrupt that needs caller input.
    InterruptRaised { interrupt: Interrupt },
    /// One client-tool round-trip finished and the run resumed itself.
    ToolRoundCompleted { round: usize, results: usize },
    Completed,
    Cancelled,
    Errored { error: String },
}
