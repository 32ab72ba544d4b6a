//! End-to-end scenarios over a scripted transport: full runs through the
//! orchestrator, the dispatcher, and the in-memory retrieval engine.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use crate::error::RunErrorKind;
use crate::events::RunEvent;
use crate::index::chunker::ChunkingConfig;
use crate::index::IndexManager;
use crate::run::interrupt::{
    ClarificationAnswer, InterruptFrame, Interrupt, ResumeDecision,
};
use crate::run::{RunHandle, RunOrchestrator, RunPhase};
use crate::testing::{MemoryIndexStore, MockEmbedder, MockTransport, StaticBook};
use crate::tools::ToolDispatcher;
use crate::traits::{
    Message, MessageContent, PartialMessage, Role, RunInput, RunSnapshot, StreamFrame,
    StreamRequest,
};

fn harness(transport: Arc<MockTransport>, max_tool_rounds: usize) -> RunOrchestrator {
    let index = IndexManager::new(
        Arc::new(MockEmbedder::new()),
        Arc::new(MemoryIndexStore::new()),
        ChunkingConfig::default(),
    )
    .unwrap();
    let tools = ToolDispatcher::new(Arc::new(StaticBook::sample()), Arc::new(index), "doc-1");
    RunOrchestrator::new(transport, Arc::new(tools), max_tool_rounds)
}

fn input(text: &str) -> RunInput {
    RunInput {
        messages: vec![Message::human(text)],
        ..Default::default()
    }
}

fn tokens(content: &str) -> Result<StreamFrame, crate::error::RunError> {
    Ok(StreamFrame::Tokens(vec![PartialMessage {
        id: "m-stream".to_string(),
        role: Role::Assistant,
        content: MessageContent::Text(content.to_string()),
    }]))
}

fn snapshot(messages: Vec<Message>) -> Result<StreamFrame, crate::error::RunError> {
    Ok(StreamFrame::Snapshot(RunSnapshot { messages }))
}

fn interrupt(id: &str, value: serde_json::Value) -> Result<StreamFrame, crate::error::RunError> {
    Ok(StreamFrame::Interrupt(InterruptFrame {
        interrupt_id: id.to_string(),
        value,
    }))
}

fn client_tool_interrupt(id: &str, call_id: &str, name: &str, args: serde_json::Value) -> Result<StreamFrame, crate::error::RunError> {
    interrupt(
        id,
        json!({
            "type": "client_tool_execution",
            "tool_calls": [{"id": call_id, "name": name, "args": args}],
            "auto_approve": true,
            "requires_approval": false,
        }),
    )
}

async fn next_event(handle: &mut RunHandle) -> RunEvent {
    timeout(Duration::from_secs(2), handle.events.recv())
        .await
        .expect("timed out waiting for run event")
        .expect("event channel closed")
}

async fn wait_for(handle: &mut RunHandle, pred: impl Fn(&RunEvent) -> bool) -> RunEvent {
    loop {
        let event = next_event(handle).await;
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn streaming_keeps_longest_token_frame() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(vec![
        tokens("Let m"),
        tokens("Let me searc"),
        tokens("Let me se"),
    ]);
    let orch = harness(Arc::clone(&transport), 10);

    let mut handle = orch.start(input("what is this book about?")).await.unwrap();
    wait_for(&mut handle, |e| matches!(e, RunEvent::Completed)).await;

    let state = orch.state().await;
    assert_eq!(state.streaming_content, "Let me searc");
    assert!(!state.streaming);
    assert_eq!(state.phase, RunPhase::Complete);
}

#[tokio::test]
async fn snapshot_replaces_messages_and_clears_caught_up_tail() {
    let transport = Arc::new(MockTransport::new());
    let final_messages = vec![
        Message::human("what is this book about?"),
        Message::assistant("Let me search the book for you."),
    ];
    transport.push_stream(vec![
        tokens("Let me search the book"),
        snapshot(final_messages.clone()),
    ]);
    let orch = harness(Arc::clone(&transport), 10);

    let mut handle = orch.start(input("what is this book about?")).await.unwrap();
    wait_for(&mut handle, |e| matches!(e, RunEvent::Completed)).await;

    let state = orch.state().await;
    assert_eq!(state.messages.len(), 2);
    assert!(state.streaming_content.is_empty());
}

#[tokio::test]
async fn optimistic_append_happens_before_any_network_io() {
    let transport = Arc::new(MockTransport::new());
    let orch = harness(Arc::clone(&transport), 10);

    let mut handle = orch.start(input("hello")).await.unwrap();
    // The appended turn is observable before the thread even exists.
    let state = orch.state().await;
    assert_eq!(state.messages.len(), 1);
    match next_event(&mut handle).await {
        RunEvent::MessageAppended { message } => assert_eq!(message.text(), "hello"),
        other => panic!("expected appended message, got {other:?}"),
    }
    match next_event(&mut handle).await {
        RunEvent::ThreadCreated { thread_id } => assert_eq!(thread_id, "thread-1"),
        other => panic!("expected thread creation, got {other:?}"),
    }
    let state = orch.state().await;
    assert_eq!(state.remote_thread_id.as_deref(), Some("thread-1"));
}

/// Transport whose thread creation takes noticeable wall time, to observe
/// what `start` does while the round-trip is in flight.
struct SlowThreadTransport {
    inner: Arc<MockTransport>,
    delay: Duration,
}

#[async_trait::async_trait]
impl crate::traits::RunTransport for SlowThreadTransport {
    async fn create_thread(&self) -> anyhow::Result<String> {
        tokio::time::sleep(self.delay).await;
        self.inner.create_thread().await
    }

    async fn open_stream(
        &self,
        request: StreamRequest,
    ) -> anyhow::Result<crate::traits::FrameStream> {
        self.inner.open_stream(request).await
    }
}

#[tokio::test]
async fn slow_thread_creation_does_not_block_state_or_append() {
    let inner = Arc::new(MockTransport::new());
    inner.push_stream(vec![tokens("On it.")]);
    let transport = Arc::new(SlowThreadTransport {
        inner,
        delay: Duration::from_millis(500),
    });

    let index = IndexManager::new(
        Arc::new(MockEmbedder::new()),
        Arc::new(MemoryIndexStore::new()),
        ChunkingConfig::default(),
    )
    .unwrap();
    let tools = ToolDispatcher::new(Arc::new(StaticBook::sample()), Arc::new(index), "doc-1");
    let orch = RunOrchestrator::new(transport, Arc::new(tools), 10);

    let mut handle = orch.start(input("hello")).await.unwrap();
    // While create_thread is still sleeping, the state lock is free and the
    // human turn is already visible.
    let state = timeout(Duration::from_millis(100), orch.state())
        .await
        .expect("state() must not block behind thread creation");
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].text(), "hello");
    assert!(state.remote_thread_id.is_none());

    wait_for(&mut handle, |e| matches!(e, RunEvent::Completed)).await;
    assert_eq!(orch.state().await.remote_thread_id.as_deref(), Some("thread-1"));
}

#[tokio::test]
async fn client_tool_interrupt_round_trips_automatically() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(vec![client_tool_interrupt(
        "int-1",
        "call-1",
        "get_chapter",
        json!({"chapter_id": "ch1"}),
    )]);
    transport.push_stream(vec![snapshot(vec![
        Message::human("summarize chapter one"),
        Message::assistant("Chapter one is about the sea."),
    ])]);
    let orch = harness(Arc::clone(&transport), 10);

    let mut handle = orch.start(input("summarize chapter one")).await.unwrap();
    // The suspension is surfaced to observers before any tool executes.
    let raised = wait_for(&mut handle, |e| {
        matches!(
            e,
            RunEvent::InterruptRaised { .. } | RunEvent::ToolRoundCompleted { .. }
        )
    })
    .await;
    match raised {
        RunEvent::InterruptRaised {
            interrupt: Interrupt::ClientTool(req),
        } => assert_eq!(req.interrupt_id, "int-1"),
        other => panic!("expected client tool interrupt first, got {other:?}"),
    }
    let round = wait_for(&mut handle, |e| {
        matches!(e, RunEvent::ToolRoundCompleted { .. })
    })
    .await;
    match round {
        RunEvent::ToolRoundCompleted { round, results } => {
            assert_eq!(round, 1);
            assert_eq!(results, 1);
        }
        _ => unreachable!(),
    }
    wait_for(&mut handle, |e| matches!(e, RunEvent::Completed)).await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    match &calls[1] {
        StreamRequest::Resume {
            thread_id,
            interrupt_id,
            payload,
        } => {
            assert_eq!(thread_id, "thread-1");
            assert_eq!(interrupt_id, "int-1");
            let results = payload.0["tool_results"].as_array().unwrap();
            assert_eq!(results[0]["tool_call_id"], "call-1");
            assert!(results[0]["content"].as_str().unwrap().contains("Waves"));
        }
        other => panic!("expected resume request, got {other:?}"),
    }
}

#[tokio::test]
async fn tool_results_come_back_in_issuance_order() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(vec![interrupt(
        "int-1",
        json!({
            "type": "client_tool_execution",
            "tool_calls": [
                {"id": "call-a", "name": "get_chapter", "args": {"chapter_id": "ch2"}},
                {"id": "call-b", "name": "get_table_of_contents", "args": {}},
                {"id": "call-c", "name": "get_chapter", "args": {"chapter_id": "ch1"}},
            ],
            "requires_approval": false,
        }),
    )]);
    transport.push_stream(vec![]);
    let orch = harness(Arc::clone(&transport), 10);

    let mut handle = orch.start(input("compare the chapters")).await.unwrap();
    wait_for(&mut handle, |e| matches!(e, RunEvent::Completed)).await;

    let calls = transport.calls();
    let StreamRequest::Resume { payload, .. } = &calls[1] else {
        panic!("expected resume request");
    };
    let ids: Vec<&str> = payload.0["tool_results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["tool_call_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["call-a", "call-b", "call-c"]);
}

#[tokio::test]
async fn tool_round_cap_errors_without_submitting_results() {
    let cap = 2;
    let transport = Arc::new(MockTransport::new());
    for i in 0..=cap {
        transport.push_stream(vec![client_tool_interrupt(
            &format!("int-{i}"),
            &format!("call-{i}"),
            "get_current_page",
            json!({}),
        )]);
    }
    let orch = harness(Arc::clone(&transport), cap);

    let mut handle = orch.start(input("keep looking things up")).await.unwrap();
    let errored = wait_for(&mut handle, |e| matches!(e, RunEvent::Errored { .. })).await;
    let RunEvent::Errored { error } = errored else {
        unreachable!()
    };
    assert!(error.contains("cap"));

    // One start plus one resume per allowed round; the over-cap interrupt
    // produced no resume.
    let calls = transport.calls();
    assert_eq!(calls.len(), 1 + cap);

    let state = orch.state().await;
    assert_eq!(state.phase, RunPhase::Errored);
    assert!(!state.streaming);
    assert!(state.error.is_some());
}

#[tokio::test]
async fn clarification_parks_until_resumed() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(vec![interrupt(
        "int-9",
        json!({
            "type": "clarification_request",
            "tool_call_id": "call-ask",
            "question": "Which chapter did you mean?",
            "options": ["The Sea", "The City"],
            "allow_multiple": false,
            "allow_freeform": true,
        }),
    )]);
    transport.push_stream(vec![snapshot(vec![
        Message::human("tell me about that chapter"),
        Message::assistant("The Sea is about coastal erosion."),
    ])]);
    let orch = harness(Arc::clone(&transport), 10);

    let mut handle = orch.start(input("tell me about that chapter")).await.unwrap();
    let raised = wait_for(&mut handle, |e| matches!(e, RunEvent::InterruptRaised { .. })).await;
    match raised {
        RunEvent::InterruptRaised {
            interrupt: Interrupt::Clarification(c),
        } => assert_eq!(c.question, "Which chapter did you mean?"),
        other => panic!("expected clarification, got {other:?}"),
    }

    let state = orch.state().await;
    assert!(state.interrupted);
    assert!(!state.streaming);
    assert_eq!(state.phase, RunPhase::Interrupted);

    orch.resume(
        "int-9",
        ResumeDecision::Clarification(ClarificationAnswer::Choices {
            selected: vec!["The Sea".to_string()],
            freeform: None,
        }),
    )
    .await
    .unwrap();
    wait_for(&mut handle, |e| matches!(e, RunEvent::Completed)).await;

    let calls = transport.calls();
    let StreamRequest::Resume {
        interrupt_id,
        payload,
        ..
    } = &calls[1]
    else {
        panic!("expected resume request");
    };
    assert_eq!(interrupt_id, "int-9");
    assert_eq!(payload.0["selected"][0], "The Sea");

    let state = orch.state().await;
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.phase, RunPhase::Complete);
}

#[tokio::test]
async fn resume_with_wrong_id_leaves_run_untouched() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(vec![interrupt(
        "int-9",
        json!({
            "type": "clarification_request",
            "question": "Which chapter?",
        }),
    )]);
    transport.push_stream(vec![]);
    let orch = harness(Arc::clone(&transport), 10);

    let mut handle = orch.start(input("tell me more")).await.unwrap();
    wait_for(&mut handle, |e| matches!(e, RunEvent::InterruptRaised { .. })).await;
    let before = orch.state().await;

    let err = orch
        .resume(
            "int-wrong",
            ResumeDecision::Clarification(ClarificationAnswer::Text("ch1".to_string())),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, RunErrorKind::InterruptMismatch);

    let after = orch.state().await;
    assert_eq!(after.messages.len(), before.messages.len());
    assert!(after.interrupted);
    assert_eq!(after.phase, RunPhase::Interrupted);
    // Only the start request went out.
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn cancel_while_parked_stops_the_run() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(vec![interrupt(
        "int-9",
        json!({
            "type": "clarification_request",
            "question": "Which chapter?",
        }),
    )]);
    let orch = harness(Arc::clone(&transport), 10);

    let mut handle = orch.start(input("tell me more")).await.unwrap();
    wait_for(&mut handle, |e| matches!(e, RunEvent::InterruptRaised { .. })).await;

    orch.cancel().await;
    wait_for(&mut handle, |e| matches!(e, RunEvent::Cancelled)).await;

    let state = orch.state().await;
    assert!(!state.streaming);
    assert_eq!(state.phase, RunPhase::Complete);
}

#[tokio::test]
async fn unclassifiable_interrupt_is_skipped_not_fatal() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(vec![
        interrupt("int-1", json!({"type": "telemetry_ping"})),
        tokens("Moving on."),
    ]);
    let orch = harness(Arc::clone(&transport), 10);

    let mut handle = orch.start(input("hello")).await.unwrap();
    wait_for(&mut handle, |e| matches!(e, RunEvent::Completed)).await;

    let state = orch.state().await;
    assert_eq!(state.phase, RunPhase::Complete);
    assert_eq!(state.streaming_content, "Moving on.");
}

#[tokio::test]
async fn search_round_trip_over_indexed_book() {
    let transport = Arc::new(MockTransport::new());
    transport.push_stream(vec![client_tool_interrupt(
        "int-1",
        "call-1",
        "search_book",
        json!({"queries": ["waves and tides", "rocky shore"], "top_k": 3}),
    )]);
    transport.push_stream(vec![]);

    let index = IndexManager::new(
        Arc::new(MockEmbedder::new()),
        Arc::new(MemoryIndexStore::new()),
        ChunkingConfig::default(),
    )
    .unwrap();
    let book = StaticBook::sample();
    index
        .build(
            "doc-1",
            &book.index_sections(),
            |_| {},
            &tokio_util::sync::CancellationToken::new(),
        )
        .await
        .unwrap();
    let tools = ToolDispatcher::new(Arc::new(book), Arc::new(index), "doc-1");
    let orch = RunOrchestrator::new(transport.clone(), Arc::new(tools), 10);

    let mut handle = orch.start(input("what shapes the shore?")).await.unwrap();
    wait_for(&mut handle, |e| matches!(e, RunEvent::Completed)).await;

    let calls = transport.calls();
    let StreamRequest::Resume { payload, .. } = &calls[1] else {
        panic!("expected resume request");
    };
    let content = payload.0["tool_results"][0]["content"].as_str().unwrap();
    assert!(content.contains("The Sea"));
    assert!(content.contains("score"));
}
