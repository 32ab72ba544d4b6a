//! HTTP transport to the remote run server.
//!
//! Streams are server-sent events over a POST body. The decoder is tolerant:
//! unknown event names and malformed payloads are logged and skipped, so one
//! bad frame never kills a run.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::RunError;
use crate::run::interrupt::InterruptFrame;
use crate::traits::{
    FrameStream, PartialMessage, RunSnapshot, RunTransport, StreamFrame, StreamRequest,
};

pub struct HttpRunTransport {
    client: reqwest::Client,
    base_url: String,
    assistant_id: String,
}

impl HttpRunTransport {
    pub fn new(base_url: impl Into<String>, assistant_id: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            assistant_id: assistant_id.into(),
        })
    }

    fn stream_body(&self, request: &StreamRequest) -> Value {
        match request {
            StreamRequest::Start { input, .. } => json!({
                "assistant_id": self.assistant_id,
                "input": input,
                "stream_mode": ["messages", "values"],
            }),
            StreamRequest::Resume {
                interrupt_id,
                payload,
                ..
            } => {
                // The resume map is keyed by the server-issued interrupt id.
                let mut resume = serde_json::Map::new();
                resume.insert(interrupt_id.clone(), payload.0.clone());
                json!({
                    "assistant_id": self.assistant_id,
                    "command": { "resume": resume },
                    "stream_mode": ["messages", "values"],
                })
            }
        }
    }
}

#[async_trait]
impl RunTransport for HttpRunTransport {
    async fn create_thread(&self) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/threads", self.base_url))
            .json(&json!({}))
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        body.get("thread_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("thread response missing thread_id"))
    }

    async fn open_stream(&self, request: StreamRequest) -> anyhow::Result<FrameStream> {
        let thread_id = match &request {
            StreamRequest::Start { thread_id, .. } => thread_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no thread id for run"))?,
            StreamRequest::Resume { thread_id, .. } => thread_id.clone(),
        };
        let response = self
            .client
            .post(format!(
                "{}/threads/{}/runs/stream",
                self.base_url, thread_id
            ))
            .json(&self.stream_body(&request))
            .send()
            .await?
            .error_for_status()?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(RunError::transport(format!(
                            "stream read failed: {e}"
                        ))));
                        return;
                    }
                };
                for event in decoder.feed(&chunk) {
                    if let Some(frame) = frame_from_event(&event) {
                        if tx.send(Ok(frame)).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

// ---------------------------------------------------------------------------
// SSE decoding
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
struct SseEvent {
    name: String,
    data: String,
}

/// Incremental server-sent-event parser. Chunk boundaries may fall anywhere,
/// including inside a line or mid-way through a multibyte character, so the
/// buffer holds raw bytes and only complete lines are decoded.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    name: String,
    data: Vec<String>,
}

impl SseDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        name: std::mem::take(&mut self.name),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                } else {
                    self.name.clear();
                }
            } else if let Some(name) = line.strip_prefix("event:") {
                self.name = name.trim_start().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.trim_start().to_string());
            } else if !line.starts_with(':') {
                debug!(line, "ignoring unrecognized sse line");
            }
        }
        events
    }
}

fn frame_from_event(event: &SseEvent) -> Option<StreamFrame> {
    match event.name.as_str() {
        "messages/partial" => match serde_json::from_str::<Vec<PartialMessage>>(&event.data) {
            Ok(parts) => Some(StreamFrame::Tokens(parts)),
            Err(e) => {
                warn!(error = %e, "malformed token frame, skipping");
                None
            }
        },
        "values" => {
            let value: Value = match serde_json::from_str(&event.data) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "malformed snapshot frame, skipping");
                    return None;
                }
            };
            if let Some(interrupts) = value.get("__interrupt__").and_then(Value::as_array) {
                let first = interrupts.first()?;
                let interrupt_id = first
                    .get("id")
                    .or_else(|| first.get("interrupt_id"))
                    .and_then(Value::as_str)?
                    .to_string();
                return Some(StreamFrame::Interrupt(InterruptFrame {
                    interrupt_id,
                    value: first.get("value").cloned().unwrap_or(Value::Null),
                }));
            }
            match serde_json::from_value::<RunSnapshot>(value) {
                Ok(snapshot) => Some(StreamFrame::Snapshot(snapshot)),
                Err(e) => {
                    warn!(error = %e, "malformed snapshot frame, skipping");
                    None
                }
            }
        }
        "error" => Some(StreamFrame::ErrorFrame(event.data.clone())),
        // Lifecycle noise: metadata, messages/complete, end.
        _ => None,
    }
}
