//! Core wire types for the relay
//!
//! Channel names, the transport message envelope, the closed set of
//! outbound event kinds, and per-request identity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sentinel prefix marking an embedded chart payload in a tool result.
///
/// Wire contract with the tool layer — must not change.
pub const PLOTLY_MARKER: &str = "PLOTLY_JSON:";

/// Sentinel prefix marking an embedded tabular payload in a tool result.
pub const TABLE_MARKER: &str = "TABLE_JSON:";

/// Wildcard pattern covering every user's inbound channel
pub const INBOX_PATTERN: &str = "inbox:*";

/// Prefix for per-user outbound channels (`outbox:{user}`)
pub const OUTBOX_PREFIX: &str = "outbox:";

/// Wildcard pattern covering every user's cancellation channel
pub const CANCEL_PATTERN: &str = "cancel:*";

/// A message received from a transport channel
///
/// Produced by the transport on receipt; immutable once constructed.
#[derive(Debug, Clone)]
pub struct Message {
    /// Channel the message was received on
    pub channel: String,

    /// Decoded JSON payload
    pub data: serde_json::Value,

    /// Delivery metadata (matched pattern, transport hints)
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Create a message with a single `pattern` metadata entry
    pub fn matched(
        channel: impl Into<String>,
        data: serde_json::Value,
        pattern: impl Into<String>,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("pattern".to_string(), pattern.into());
        Self {
            channel: channel.into(),
            data,
            metadata,
        }
    }
}

/// Closed set of event kinds published on a user's outbound channel
///
/// The SSE-facing consumer uses the wire name as the SSE event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Live model generation (thinking and answer deltas alike)
    Thinking,
    /// Finalized answer text
    Text,
    /// A tool invocation began
    ToolCallStart,
    /// A tool finished with an unstructured result
    ToolCallResult,
    /// Embedded chart payload extracted from a tool result
    Plotly,
    /// Embedded tabular payload extracted from a tool result
    DataTable,
    /// A visualization retry turn is starting
    Retrying,
    /// Terminal: request completed
    Done,
    /// Terminal: request failed
    Error,
}

impl EventKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Thinking => "thinking",
            EventKind::Text => "text",
            EventKind::ToolCallStart => "tool_call_start",
            EventKind::ToolCallResult => "tool_call_result",
            EventKind::Plotly => "plotly",
            EventKind::DataTable => "data_table",
            EventKind::Retrying => "retrying",
            EventKind::Done => "done",
            EventKind::Error => "error",
        }
    }

    /// True for the chart/table kinds that count as visual artifacts
    pub fn is_visual(&self) -> bool {
        matches!(self, EventKind::Plotly | EventKind::DataTable)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated inbound conversation request
///
/// Wire shape on `inbox:{email}`: `{"email": ..., "message": ...}`,
/// optionally extended with a tenant identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundRequest {
    /// User key addressing the outbound channel
    pub email: String,

    /// The user's message to the agent
    pub message: String,

    /// Optional tenant identifier, carried but not interpreted by the core
    #[serde(default)]
    pub company_id: Option<String>,
}

impl InboundRequest {
    /// Parse and validate an inbound payload
    ///
    /// Returns `None` on shape mismatch or empty required fields — the
    /// caller drops such messages silently since there is no trustworthy
    /// destination to address a response to.
    pub fn parse(data: &serde_json::Value) -> Option<Self> {
        let parsed: Self = serde_json::from_value(data.clone()).ok()?;
        if parsed.email.is_empty() || parsed.message.is_empty() {
            return None;
        }
        Some(parsed)
    }
}

/// Per-request identity
///
/// Retry state is keyed by `request_id` so two concurrent requests from the
/// same user cannot stomp each other's state. Channel names and the
/// cancellation set stay keyed by `user_key` — that is the wire contract.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Stable user identifier (email), used for channel names
    pub user_key: String,

    /// Unique id for this request (`req-<uuid>`)
    pub request_id: String,
}

impl RequestContext {
    /// Create a context with a fresh request id
    pub fn new(user_key: impl Into<String>) -> Self {
        Self {
            user_key: user_key.into(),
            request_id: format!("req-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Outbound channel name for this request's user
    pub fn outbox(&self) -> String {
        format!("{}{}", OUTBOX_PREFIX, self.user_key)
    }
}
