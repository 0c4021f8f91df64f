//! Classification of low-level agent events into the outbound vocabulary
//!
//! Pure and stateless — no I/O. The sentinel-prefix convention on tool
//! results (`PLOTLY_JSON:` / `TABLE_JSON:` followed by a JSON document) is
//! the wire contract between the tool layer and the streaming layer.

use crate::agent::ModelEvent;
use crate::error::{RelayError, Result};
use crate::types::{EventKind, PLOTLY_MARKER, TABLE_MARKER};

/// A finished tool call classified for republication
#[derive(Debug, Clone)]
pub struct ParsedToolResult {
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

/// Parses agent streaming events
#[derive(Debug, Clone, Copy, Default)]
pub struct EventParser;

impl EventParser {
    /// Extract the textual delta of a thinking/text event, if any
    pub fn extract_content<'a>(&self, event: &'a ModelEvent) -> Option<&'a str> {
        match event {
            ModelEvent::Thinking { delta } | ModelEvent::Text { delta } => {
                if delta.is_empty() {
                    None
                } else {
                    Some(delta)
                }
            }
            _ => None,
        }
    }

    /// True for answer text (buffered for possible replay at the end),
    /// false for thinking/reasoning text (streamed live only)
    pub fn is_text_event(&self, event: &ModelEvent) -> bool {
        matches!(event, ModelEvent::Text { .. })
    }

    /// Classify a tool's raw string result
    ///
    /// Recognizes the chart and table sentinel markers; anything else is a
    /// generic `tool_call_result` carrying the raw string. A marker
    /// followed by invalid JSON is a turn-level failure.
    pub fn parse_tool_result(
        &self,
        tool_call_id: &str,
        content: &str,
    ) -> Result<ParsedToolResult> {
        if let Some((_, embedded)) = content.split_once(PLOTLY_MARKER) {
            let json = parse_embedded(PLOTLY_MARKER, embedded)?;
            return Ok(ParsedToolResult {
                kind: EventKind::Plotly,
                payload: serde_json::json!({ "json": json }),
            });
        }

        if let Some((_, embedded)) = content.split_once(TABLE_MARKER) {
            let json = parse_embedded(TABLE_MARKER, embedded)?;
            return Ok(ParsedToolResult {
                kind: EventKind::DataTable,
                payload: serde_json::json!({ "json": json }),
            });
        }

        Ok(ParsedToolResult {
            kind: EventKind::ToolCallResult,
            payload: serde_json::json!({
                "tool_call_id": tool_call_id,
                "result": content,
            }),
        })
    }
}

fn parse_embedded(marker: &str, embedded: &str) -> Result<serde_json::Value> {
    serde_json::from_str(embedded)
        .map_err(|e| RelayError::Turn(format!("invalid JSON after {} marker: {}", marker, e)))
}
