//! Local execution of the agent's client-side tool calls.
//!
//! The dispatcher is a routing function keyed on tool name: reading tools go
//! to the document-extraction collaborator, semantic search goes to the
//! retrieval engine. Unknown names fail loudly: returning empty content to
//! the agent would be indistinguishable from "found nothing".

mod reader;
mod search;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::index::{collect_sections, IndexManager};
use crate::traits::{DocumentSource, ToolCall, ToolResult};

pub struct ToolDispatcher {
    source: Arc<dyn DocumentSource>,
    index: Arc<IndexManager>,
    document_id: String,
    /// Documents whose background index build has already been kicked off.
    indexing_started: Mutex<HashSet<String>>,
    /// Cancels any in-flight background index builds on shutdown.
    background_cancel: CancellationToken,
}

impl ToolDispatcher {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        index: Arc<IndexManager>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            index,
            document_id: document_id.into(),
            indexing_started: Mutex::new(HashSet::new()),
            background_cancel: CancellationToken::new(),
        }
    }

    /// Stop any background index builds in flight. Safe to call more than
    /// once; builds kicked off afterwards are stillborn.
    pub fn shutdown(&self) {
        self.background_cancel.cancel();
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    /// Execute one tool call. Dispatcher-level failures come back as `Err`;
    /// the orchestrator folds them into error-text tool results so the agent
    /// can adapt instead of the run dying.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        debug!(tool = %call.name, call_id = %call.id, "dispatching tool call");
        let content = match call.name.as_str() {
            "get_table_of_contents" => reader::table_of_contents(self.source.as_ref()).await?,
            "get_chapter" => reader::chapter(self.source.as_ref(), &call.args).await?,
            "get_current_page" => reader::current_page(self.source.as_ref()).await?,
            "search_book" => {
                match search::search_book(&self.index, &self.document_id, &call.args).await {
                    Err(ToolError::NotIndexed(doc)) => {
                        // First search against an unindexed document kicks off a
                        // background build; this call still reports not-indexed.
                        self.start_background_indexing().await;
                        return Err(ToolError::NotIndexed(doc));
                    }
                    other => other?,
                }
            }
            other => {
                warn!(tool = other, "unknown tool requested by agent");
                return Err(ToolError::UnknownTool(other.to_string()));
            }
        };
        Ok(ToolResult {
            tool_call_id: call.id.clone(),
            content,
            is_error: false,
        })
    }

    async fn start_background_indexing(&self) {
        let mut started = self.indexing_started.lock().await;
        if !started.insert(self.document_id.clone()) {
            return;
        }
        drop(started);

        info!(document_id = %self.document_id, "starting background index build");
        let source = Arc::clone(&self.source);
        let index = Arc::clone(&self.index);
        let document_id = self.document_id.clone();
        let cancel = self.background_cancel.clone();
        tokio::spawn(async move {
            if cancel.is_cancelled() {
                return;
            }
            let sections = match collect_sections(source.as_ref()).await {
                Ok(sections) => sections,
                Err(e) => {
                    warn!(document_id = %document_id, error = %e, "failed to read sections for indexing");
                    return;
                }
            };
            if let Err(e) = index
                .build(&document_id, &sections, |_| {}, &cancel)
                .await
            {
                warn!(document_id = %document_id, error = %e, "background index build failed");
            }
        });
    }

    /// Like `dispatch`, but folds failures into an error-text result keyed by
    /// the same call id, ready for resumption.
    pub async fn dispatch_to_result(&self, call: &ToolCall) -> ToolResult {
        match self.dispatch(call).await {
            Ok(result) => result,
            Err(e) => ToolResult {
                tool_call_id: call.id.clone(),
                content: e.agent_facing_text(),
                is_error: true,
            },
        }
    }
}
