//! Interrupt classification and resume payload construction.
//!
//! The server tags each interrupt with an id and a free-shape value; the
//! value's shape decides which of the three kinds it is. Shapes mirror the
//! agent-side middleware: `clarification_request`, `client_tool_execution`,
//! and the approval form carrying `action_requests` + `review_configs`.

use serde_json::{json, Value};
use tracing::warn;

use crate::traits::{ToolCall, ToolResult};

/// Raw interrupt frame as it arrives on the stream: a server-issued id
/// (required for resumption) plus the unclassified payload.
#[derive(Debug, Clone)]
pub struct InterruptFrame {
    pub interrupt_id: String,
    pub value: Value,
}

/// A classified suspension point.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// The agent asks a free-text or multiple-choice question.
    Clarification(ClarificationRequest),
    /// The agent proposes side-effecting actions needing approval.
    HumanReview(ReviewRequest),
    /// The agent invoked tools that must execute locally.
    ClientTool(ClientToolRequest),
}

impl Interrupt {
    pub fn interrupt_id(&self) -> &str {
        match self {
            Interrupt::Clarification(c) => &c.interrupt_id,
            Interrupt::HumanReview(r) => &r.interrupt_id,
            Interrupt::ClientTool(t) => &t.interrupt_id,
        }
    }

    /// Classify a raw frame by payload shape. Returns None for shapes none of
    /// the three kinds match; the caller logs and skips those (the original
    /// surface silently dropped them; kept non-fatal, flagged at WARN).
    pub fn classify(frame: &InterruptFrame) -> Option<Interrupt> {
        let value = &frame.value;
        let kind = value.get("type").and_then(Value::as_str);

        match kind {
            Some("clarification_request") => {
                Some(Interrupt::Clarification(ClarificationRequest {
                    interrupt_id: frame.interrupt_id.clone(),
                    tool_call_id: str_field(value, "tool_call_id"),
                    question: str_field(value, "question"),
                    options: string_list(value.get("options")),
                    allow_multiple: bool_field(value, "allow_multiple"),
                    allow_freeform: bool_field(value, "allow_freeform"),
                }))
            }
            Some("client_tool_execution") => {
                // Write-style calls arrive with approval metadata and must be
                // reviewed by a human before anything executes.
                if bool_field(value, "requires_approval") {
                    return Some(Interrupt::HumanReview(review_from(frame, value)));
                }
                let tool_calls: Vec<ToolCall> = value
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .map(|calls| {
                        calls
                            .iter()
                            .filter_map(|c| serde_json::from_value(c.clone()).ok())
                            .collect()
                    })
                    .unwrap_or_default();
                if tool_calls.is_empty() {
                    warn!(interrupt_id = %frame.interrupt_id, "client tool interrupt with no parseable calls");
                    return None;
                }
                Some(Interrupt::ClientTool(ClientToolRequest {
                    interrupt_id: frame.interrupt_id.clone(),
                    tool_calls,
                }))
            }
            // Bare approval interrupts (no type tag) from HITL middleware.
            None if value.get("action_requests").is_some()
                && value.get("review_configs").is_some() =>
            {
                Some(Interrupt::HumanReview(review_from(frame, value)))
            }
            _ => None,
        }
    }
}

fn review_from(frame: &InterruptFrame, value: &Value) -> ReviewRequest {
    let actions = value
        .get("action_requests")
        .and_then(Value::as_array)
        .map(|reqs| {
            reqs.iter()
                .map(|r| ActionRequest {
                    name: str_field(r, "name"),
                    args: r.get("args").cloned().unwrap_or(Value::Null),
                    description: str_field(r, "description"),
                })
                .collect()
        })
        .unwrap_or_default();
    ReviewRequest {
        interrupt_id: frame.interrupt_id.clone(),
        actions,
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ClarificationRequest {
    pub interrupt_id: String,
    /// Synthetic "ask" call this clarification answers.
    pub tool_call_id: String,
    pub question: String,
    pub options: Vec<String>,
    pub allow_multiple: bool,
    pub allow_freeform: bool,
}

#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub interrupt_id: String,
    pub actions: Vec<ActionRequest>,
}

/// Tool calls the agent wants executed locally, in issuance order.
#[derive(Debug, Clone)]
pub struct ClientToolRequest {
    pub interrupt_id: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub name: String,
    pub args: Value,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Resumption
// ---------------------------------------------------------------------------

/// The caller's answer to a parked interrupt.
#[derive(Debug, Clone)]
pub enum ResumeDecision {
    Clarification(ClarificationAnswer),
    /// One decision per proposed action, in presentation order.
    Review(Vec<ReviewDecision>),
    /// Results for locally executed tool calls, keyed by call id.
    ToolResults(Vec<ToolResult>),
}

#[derive(Debug, Clone)]
pub enum ClarificationAnswer {
    Text(String),
    Choices {
        selected: Vec<String>,
        freeform: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Wire payload sent back with the interrupt id on resumption.
#[derive(Debug, Clone)]
pub struct ResumePayload(pub Value);

impl ResumePayload {
    pub fn from_decision(decision: &ResumeDecision) -> Self {
        let value = match decision {
            ResumeDecision::Clarification(ClarificationAnswer::Text(text)) => {
                json!({ "response": text })
            }
            ResumeDecision::Clarification(ClarificationAnswer::Choices { selected, freeform }) => {
                let mut v = json!({ "selected": selected });
                if let Some(freeform) = freeform {
                    v["freeform"] = json!(freeform);
                }
                v
            }
            ResumeDecision::Review(decisions) => {
                let decisions: Vec<Value> = decisions
                    .iter()
                    .map(|d| match d {
                        ReviewDecision::Approve => json!({ "type": "approve" }),
                        ReviewDecision::Reject => json!({ "type": "reject" }),
                    })
                    .collect();
                json!({ "decisions": decisions })
            }
            ResumeDecision::ToolResults(results) => {
                let results: Vec<Value> = results
                    .iter()
                    .map(|r| {
                        json!({
                            "tool_call_id": r.tool_call_id,
                            "content": r.content,
                        })
                    })
                    .collect();
                json!({ "tool_results": results })
            }
        };
        ResumePayload(value)
    }
}
