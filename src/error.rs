use std::fmt;

/// Classified run error: tells the caller *why* the run failed or why a
/// `resume` call was rejected, so it can pick the right recovery strategy.
#[derive(Debug)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    /// Stream could not be opened or died mid-flight. Not retried
    /// automatically: a blind retry would duplicate an already
    /// partially-applied human turn.
    Transport,
    /// Malformed or unrecognized frame. Logged and skipped at the stream
    /// level; surfaced here only when the transcript integrity is at stake.
    Protocol,
    /// Too many consecutive client-tool round-trips in one human turn.
    /// Fatal to the run.
    IterationLimitExceeded,
    /// `resume` was called while no interrupt is active.
    NoActiveInterrupt,
    /// `resume` named an interrupt id that does not match the stored one.
    InterruptMismatch,
}

impl RunError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: RunErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: RunErrorKind::Protocol,
            message: message.into(),
        }
    }

    pub fn iteration_limit(cap: usize) -> Self {
        Self {
            kind: RunErrorKind::IterationLimitExceeded,
            message: format!("client tool round-trip cap of {cap} exceeded"),
        }
    }

    pub fn no_active_interrupt() -> Self {
        Self {
            kind: RunErrorKind::NoActiveInterrupt,
            message: "no interrupt is active for this run".to_string(),
        }
    }

    pub fn interrupt_mismatch(claimed: &str, stored: &str) -> Self {
        Self {
            kind: RunErrorKind::InterruptMismatch,
            message: format!("claimed interrupt {claimed} does not match active interrupt {stored}"),
        }
    }

    /// Whether the error is fatal to the run itself (as opposed to the
    /// specific caller misuse that produced it).
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self.kind,
            RunErrorKind::Transport | RunErrorKind::IterationLimitExceeded
        )
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RunErrorKind::Transport => "transport",
            RunErrorKind::Protocol => "protocol",
            RunErrorKind::IterationLimitExceeded => "iteration limit",
            RunErrorKind::NoActiveInterrupt => "no active interrupt",
            RunErrorKind::InterruptMismatch => "interrupt mismatch",
        };
        write!(f, "{kind}: {}", self.message)
    }
}

impl std::error::Error for RunError {}

/// Dispatcher-level error. Surfaced to the agent as a tool *error result*
/// rather than raised fatally; the agent can adapt to "not indexed" but a
/// silent empty result is indistinguishable from "found nothing".
#[derive(Debug)]
pub enum ToolError {
    UnknownTool(String),
    NotIndexed(String),
    Source(anyhow::Error),
}

impl ToolError {
    /// The error text delivered back to the agent as the tool result.
    pub fn agent_facing_text(&self) -> String {
        match self {
            ToolError::UnknownTool(name) => format!("Error: unknown tool '{name}'"),
            ToolError::NotIndexed(_) => {
                "Error: not indexed - the book has not been indexed yet".to_string()
            }
            ToolError::Source(e) => format!("Error: {e}"),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::UnknownTool(name) => write!(f, "unknown tool: {name}"),
            ToolError::NotIndexed(doc) => write!(f, "document not indexed: {doc}"),
            ToolError::Source(e) => write!(f, "document source error: {e}"),
        }
    }
}

impl std::error::Error for ToolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(RunError::transport("boom").is_fatal_to_run());
        assert!(RunError::iteration_limit(10).is_fatal_to_run());
        assert!(!RunError::no_active_interrupt().is_fatal_to_run());
        assert!(!RunError::interrupt_mismatch("a", "b").is_fatal_to_run());
    }

    #[test]
    fn tool_error_text_distinguishes_unknown_from_empty() {
        let e = ToolError::UnknownTool("frobnicate".to_string());
        assert!(e.agent_facing_text().contains("unknown tool"));
        let e = ToolError::NotIndexed("doc-1".to_string());
        assert!(e.agent_facing_text().contains("not indexed"));
    }
}
