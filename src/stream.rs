//! Node-by-node stream dispatch for one agent turn
//!
//! Consumes one [`TurnNode`] at a time, publishes the corresponding
//! outbound events, and keeps the running answer buffer. Errors from a
//! node's internal stream propagate to the orchestrator — a turn-level
//! failure is never swallowed here.

use crate::agent::{ModelEvent, NodeEventStream, TurnNode, TurnResult};
use crate::error::Result;
use crate::messaging::MessagingService;
use crate::parser::EventParser;
use crate::retry::VisualizationRetryManager;
use crate::types::{EventKind, RequestContext};
use futures::StreamExt;
use std::sync::Arc;

/// Outcome of processing one node
#[derive(Debug)]
pub enum NodeOutcome {
    /// The turn continues with this buffer
    Continue(String),

    /// The turn is complete
    End(TurnResult),
}

/// Publishes one turn's streamed events and tracks visual artifacts
pub struct StreamProcessor {
    messaging: Arc<MessagingService>,
    parser: EventParser,
    retry_manager: Arc<VisualizationRetryManager>,
}

impl StreamProcessor {
    pub fn new(
        messaging: Arc<MessagingService>,
        parser: EventParser,
        retry_manager: Arc<VisualizationRetryManager>,
    ) -> Self {
        Self {
            messaging,
            parser,
            retry_manager,
        }
    }

    /// Process one node, returning the updated buffer or the turn result
    pub async fn process_node(
        &self,
        node: TurnNode,
        request: &RequestContext,
        buffer: String,
    ) -> Result<NodeOutcome> {
        match node {
            TurnNode::ModelRequest(events) => {
                let buffer = self.handle_model_request(events, request, buffer).await?;
                Ok(NodeOutcome::Continue(buffer))
            }
            TurnNode::ToolCalls(events) => {
                self.handle_tool_calls(events, request).await?;
                // A fresh tool round starts a fresh narration window
                Ok(NodeOutcome::Continue(String::new()))
            }
            TurnNode::End(result) => {
                tracing::debug!(request = %request.request_id, "End node reached");
                Ok(NodeOutcome::End(result))
            }
        }
    }

    /// Stream thinking/text deltas, buffering answer text
    async fn handle_model_request(
        &self,
        mut events: NodeEventStream,
        request: &RequestContext,
        mut buffer: String,
    ) -> Result<String> {
        let mut event_count = 0usize;

        while let Some(event) = events.next().await {
            let event = event?;
            event_count += 1;

            if let Some(content) = self.parser.extract_content(&event) {
                if self.parser.is_text_event(&event) {
                    buffer.push_str(content);
                }
                // Live generation always streams as `thinking`; the
                // finalized answer is replayed as `text` at the end
                self.messaging
                    .publish_event(
                        &request.user_key,
                        EventKind::Thinking,
                        serde_json::json!({ "content": content }),
                        false,
                    )
                    .await?;
            }
        }

        tracing::debug!(
            request = %request.request_id,
            events = event_count,
            buffer_len = buffer.len(),
            "Model request node finished"
        );
        Ok(buffer)
    }

    /// Publish tool starts/results, recording visual artifacts
    async fn handle_tool_calls(
        &self,
        mut events: NodeEventStream,
        request: &RequestContext,
    ) -> Result<()> {
        while let Some(event) = events.next().await {
            match event? {
                ModelEvent::ToolCallStart { name, args } => {
                    tracing::debug!(request = %request.request_id, tool = %name, "Tool call started");
                    self.messaging
                        .publish_event(
                            &request.user_key,
                            EventKind::ToolCallStart,
                            serde_json::json!({ "name": name, "args": args }),
                            false,
                        )
                        .await?;
                }
                ModelEvent::ToolCallResult {
                    tool_call_id,
                    content,
                } => {
                    let parsed = self.parser.parse_tool_result(&tool_call_id, &content)?;
                    tracing::debug!(
                        request = %request.request_id,
                        kind = %parsed.kind,
                        "Tool call finished"
                    );
                    if parsed.kind.is_visual() {
                        self.retry_manager.record_visual(request);
                    }
                    self.messaging
                        .publish_event(&request.user_key, parsed.kind, parsed.payload, false)
                        .await?;
                }
                // Text deltas don't occur inside a tool round
                _ => {}
            }
        }
        Ok(())
    }
}
