//! Run lifecycle: one conversation's state machine and the driver task that
//! consumes the remote frame stream.
//!
//! The orchestrator owns a single `RunState` behind a mutex; the driver task
//! is its only writer while a run is live. Callers observe changes through
//! the event channel on the handle rather than polling the state.

pub mod interrupt;
pub mod reconcile;

use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RunError;
use crate::events::RunEvent;
use crate::tools::ToolDispatcher;
use crate::traits::{
    Message, Role, RunInput, RunTransport, StreamFrame, StreamRequest, ToolCall, ToolCallStatus,
};
use interrupt::{Interrupt, ResumeDecision, ResumePayload};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunPhase {
    #[default]
    Idle,
    Streaming,
    Interrupted,
    Complete,
    Errored,
}

/// Everything a consumer can observe about one conversation's run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub messages: Vec<Message>,
    pub streaming: bool,
    pub interrupted: bool,
    /// Accumulated in-progress assistant text; cleared once a snapshot
    /// catches up.
    pub streaming_content: String,
    /// Client tool calls currently executing locally.
    pub pending_tool_calls: Vec<ToolCall>,
    pub remote_thread_id: Option<String>,
    pub active_interrupt: Option<Interrupt>,
    pub error: Option<String>,
    pub phase: RunPhase,
}

/// Per-run plumbing between the public API and the driver task.
#[derive(Default)]
struct RunControl {
    resume_tx: Option<mpsc::UnboundedSender<ResumePayload>>,
    cancel: Option<CancellationToken>,
}

/// Receiving side of one run: drop it to stop observing (the run itself is
/// stopped through `cancel`).
#[derive(Debug)]
pub struct RunHandle {
    pub events: mpsc::UnboundedReceiver<RunEvent>,
}

pub struct RunOrchestrator {
    transport: Arc<dyn RunTransport>,
    tools: Arc<ToolDispatcher>,
    /// Consecutive client-tool round-trips allowed per human turn.
    max_tool_rounds: usize,
    state: Arc<Mutex<RunState>>,
    control: Arc<Mutex<RunControl>>,
}

impl RunOrchestrator {
    pub fn new(
        transport: Arc<dyn RunTransport>,
        tools: Arc<ToolDispatcher>,
        max_tool_rounds: usize,
    ) -> Self {
        Self {
            transport,
            tools,
            max_tool_rounds,
            state: Arc::new(Mutex::new(RunState::default())),
            control: Arc::new(Mutex::new(RunControl::default())),
        }
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> RunState {
        self.state.lock().await.clone()
    }

    /// Start a run for the given input. The input's trailing human message is
    /// appended to the transcript before any network round-trip so the caller
    /// sees their turn immediately; thread creation and the stream open happen
    /// on the driver task.
    pub async fn start(&self, input: RunInput) -> Result<RunHandle, RunError> {
        let Some(last) = input.messages.last() else {
            return Err(RunError::protocol("run input has no messages"));
        };
        if last.role != Role::Human {
            return Err(RunError::protocol(
                "run input must end with a human message",
            ));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        {
            let mut state = self.state.lock().await;
            if matches!(state.phase, RunPhase::Streaming | RunPhase::Interrupted) {
                return Err(RunError::protocol("a run is already active"));
            }
            state.messages.push(last.clone());
            state.streaming = true;
            state.interrupted = false;
            state.streaming_content.clear();
            state.pending_tool_calls.clear();
            state.active_interrupt = None;
            state.error = None;
            state.phase = RunPhase::Streaming;
        }
        let _ = events_tx.send(RunEvent::MessageAppended {
            message: last.clone(),
        });

        {
            let mut control = self.control.lock().await;
            control.resume_tx = Some(resume_tx);
            control.cancel = Some(cancel.clone());
        }

        let driver = Driver {
            transport: Arc::clone(&self.transport),
            tools: Arc::clone(&self.tools),
            max_tool_rounds: self.max_tool_rounds,
            state: Arc::clone(&self.state),
            events: events_tx,
            cancel,
        };
        tokio::spawn(driver.run(input, resume_rx));

        Ok(RunHandle { events: events_rx })
    }

    /// Answer the active interrupt. Rejected without touching the transcript
    /// if no interrupt is parked or the id does not match.
    pub async fn resume(
        &self,
        interrupt_id: &str,
        decision: ResumeDecision,
    ) -> Result<(), RunError> {
        let mut state = self.state.lock().await;
        let stored = match &state.active_interrupt {
            Some(interrupt) => interrupt.interrupt_id().to_string(),
            None => return Err(RunError::no_active_interrupt()),
        };
        if stored != interrupt_id {
            return Err(RunError::interrupt_mismatch(interrupt_id, &stored));
        }

        let control = self.control.lock().await;
        let Some(tx) = &control.resume_tx else {
            return Err(RunError::no_active_interrupt());
        };
        tx.send(ResumePayload::from_decision(&decision))
            .map_err(|_| RunError::transport("run driver is gone"))?;

        state.active_interrupt = None;
        state.interrupted = false;
        state.streaming = true;
        state.phase = RunPhase::Streaming;
        Ok(())
    }

    /// Stop the active run. Idempotent; `streaming` is false once this
    /// returns and the driver shuts down at its next checkpoint.
    pub async fn cancel(&self) {
        let control = self.control.lock().await;
        if let Some(cancel) = &control.cancel {
            cancel.cancel();
        }
        drop(control);
        let mut state = self.state.lock().await;
        state.streaming = false;
    }
}

struct Driver {
    transport: Arc<dyn RunTransport>,
    tools: Arc<ToolDispatcher>,
    max_tool_rounds: usize,
    state: Arc<Mutex<RunState>>,
    events: mpsc::UnboundedSender<RunEvent>,
    cancel: CancellationToken,
}

/// What the driver does after draining one stream.
enum Next {
    Reopen(StreamRequest),
    Finished,
}

impl Driver {
    async fn run(self, input: RunInput, mut resume_rx: mpsc::UnboundedReceiver<ResumePayload>) {
        let existing = self.state.lock().await.remote_thread_id.clone();
        let thread_id = match existing {
            Some(id) => id,
            None => match self.transport.create_thread().await {
                Ok(id) => {
                    info!(thread_id = %id, "created remote thread");
                    self.state.lock().await.remote_thread_id = Some(id.clone());
                    let _ = self.events.send(RunEvent::ThreadCreated {
                        thread_id: id.clone(),
                    });
                    id
                }
                Err(e) => {
                    self.finish_errored(RunError::transport(e.to_string())).await;
                    return;
                }
            },
        };

        let mut request = StreamRequest::Start {
            thread_id: Some(thread_id),
            input,
        };
        // Consecutive client-tool round-trips this human turn.
        let mut rounds = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                self.finish_cancelled().await;
                return;
            }
            let stream = match self.transport.open_stream(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.finish_errored(RunError::transport(e.to_string())).await;
                    return;
                }
            };
            match self.drain(stream, &mut resume_rx, &mut rounds).await {
                Ok(Next::Reopen(next)) => request = next,
                Ok(Next::Finished) => return,
                Err(e) => {
                    self.finish_errored(e).await;
                    return;
                }
            }
        }
    }

    /// Consume one stream until it ends or produces a continuation request.
    async fn drain(
        &self,
        mut stream: crate::traits::FrameStream,
        resume_rx: &mut mpsc::UnboundedReceiver<ResumePayload>,
        rounds: &mut usize,
    ) -> Result<Next, RunError> {
        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = self.cancel.cancelled() => {
                    self.finish_cancelled().await;
                    return Ok(Next::Finished);
                }
            };
            let frame = match item {
                Some(Ok(frame)) => frame,
                Some(Err(e)) if e.is_fatal_to_run() => return Err(e),
                Some(Err(e)) => {
                    warn!(error = %e, "skipping bad frame");
                    continue;
                }
                None => {
                    self.finish_complete().await;
                    return Ok(Next::Finished);
                }
            };

            match frame {
                StreamFrame::Tokens(parts) => {
                    let mut state = self.state.lock().await;
                    if reconcile::apply_token_frame(&mut state, &parts) {
                        let _ = self.events.send(RunEvent::StreamingContent {
                            content: state.streaming_content.clone(),
                        });
                    }
                }
                StreamFrame::Snapshot(snapshot) => {
                    let mut state = self.state.lock().await;
                    reconcile::apply_snapshot_frame(&mut state, snapshot);
                    let _ = self.events.send(RunEvent::MessagesReplaced {
                        count: state.messages.len(),
                    });
                }
                StreamFrame::ErrorFrame(message) => {
                    return Err(RunError::transport(message));
                }
                StreamFrame::Interrupt(raw) => {
                    let Some(interrupt) = Interrupt::classify(&raw) else {
                        warn!(interrupt_id = %raw.interrupt_id, "unclassifiable interrupt, skipping");
                        continue;
                    };
                    match interrupt {
                        Interrupt::ClientTool(req) => {
                            *rounds += 1;
                            if *rounds > self.max_tool_rounds {
                                return Err(RunError::iteration_limit(self.max_tool_rounds));
                            }
                            // The run is suspended for the duration of the
                            // round. `active_interrupt` stays None: this
                            // interrupt resumes itself, so `resume` must not
                            // be able to claim it.
                            {
                                let mut state = self.state.lock().await;
                                state.interrupted = true;
                                state.streaming = false;
                                state.phase = RunPhase::Interrupted;
                            }
                            let _ = self.events.send(RunEvent::InterruptRaised {
                                interrupt: Interrupt::ClientTool(req.clone()),
                            });
                            let payload = self.execute_tool_round(&req, *rounds).await;
                            {
                                let mut state = self.state.lock().await;
                                state.interrupted = false;
                                state.streaming = true;
                                state.phase = RunPhase::Streaming;
                            }
                            return Ok(Next::Reopen(self.resume_request(
                                req.interrupt_id,
                                payload,
                            ).await?));
                        }
                        parked => {
                            // Human input breaks the consecutive-round chain.
                            *rounds = 0;
                            let interrupt_id = parked.interrupt_id().to_string();
                            {
                                let mut state = self.state.lock().await;
                                state.interrupted = true;
                                state.streaming = false;
                                state.phase = RunPhase::Interrupted;
                                state.active_interrupt = Some(parked.clone());
                            }
                            let _ = self
                                .events
                                .send(RunEvent::InterruptRaised { interrupt: parked });

                            let payload = tokio::select! {
                                payload = resume_rx.recv() => payload,
                                _ = self.cancel.cancelled() => {
                                    self.finish_cancelled().await;
                                    return Ok(Next::Finished);
                                }
                            };
                            let Some(payload) = payload else {
                                debug!("resume channel closed, ending run");
                                self.finish_complete().await;
                                return Ok(Next::Finished);
                            };
                            return Ok(Next::Reopen(
                                self.resume_request(interrupt_id, payload).await?,
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Execute every call of a client-tool round concurrently; results come
    /// back in issuance order.
    async fn execute_tool_round(
        &self,
        req: &interrupt::ClientToolRequest,
        round: usize,
    ) -> ResumePayload {
        {
            let mut state = self.state.lock().await;
            state.pending_tool_calls = req.tool_calls.clone();
            for call in &mut state.pending_tool_calls {
                call.advance(ToolCallStatus::Executing);
            }
        }

        let results = join_all(
            req.tool_calls
                .iter()
                .map(|call| self.tools.dispatch_to_result(call)),
        )
        .await;

        {
            let mut state = self.state.lock().await;
            for (call, result) in state.pending_tool_calls.iter_mut().zip(&results) {
                call.advance(if result.is_error {
                    ToolCallStatus::Error
                } else {
                    ToolCallStatus::Completed
                });
                call.result = Some(result.content.clone());
            }
        }
        let _ = self.events.send(RunEvent::ToolRoundCompleted {
            round,
            results: results.len(),
        });
        ResumePayload::from_decision(&ResumeDecision::ToolResults(results))
    }

    async fn resume_request(
        &self,
        interrupt_id: String,
        payload: ResumePayload,
    ) -> Result<StreamRequest, RunError> {
        let thread_id = {
            let state = self.state.lock().await;
            state
                .remote_thread_id
                .clone()
                .ok_or_else(|| RunError::protocol("resuming a run with no thread"))?
        };
        Ok(StreamRequest::Resume {
            thread_id,
            interrupt_id,
            payload,
        })
    }

    async fn finish_complete(&self) {
        let mut state = self.state.lock().await;
        state.streaming = false;
        state.interrupted = false;
        state.pending_tool_calls.clear();
        state.phase = RunPhase::Complete;
        let _ = self.events.send(RunEvent::Completed);
    }

    async fn finish_cancelled(&self) {
        let mut state = self.state.lock().await;
        state.streaming = false;
        state.interrupted = false;
        state.pending_tool_calls.clear();
        state.phase = RunPhase::Complete;
        let _ = self.events.send(RunEvent::Cancelled);
    }

    async fn finish_errored(&self, error: RunError) {
        warn!(error = %error, "run failed");
        let mut state = self.state.lock().await;
        state.streaming = false;
        state.interrupted = false;
        state.pending_tool_calls.clear();
        state.error = Some(error.to_string());
        state.phase = RunPhase::Errored;
        let _ = self.events.send(RunEvent::Errored {
            error: error.to_string(),
        });
    }
}
