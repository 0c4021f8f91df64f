//! Agent framework boundary
//!
//! The LLM agent's reasoning loop and tool implementations live outside
//! this crate. These types pin down the narrow interface the relay
//! consumes: a turn is a sequence of nodes, each node either streams
//! low-level events or ends the turn with a result. The node category is
//! decided once, here, as a closed enum — never by inspecting type names
//! downstream.

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Role of a message in the model conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message of accumulated model context
///
/// Carried across retry turns so the agent continues from the full
/// conversation rather than restarting from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub content: String,
}

impl ModelMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Low-level streaming event emitted inside a node
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// Reasoning delta — streamed live, never buffered
    Thinking { delta: String },

    /// Answer text delta — streamed live and buffered for finalization
    Text { delta: String },

    /// A tool invocation started
    ToolCallStart {
        name: String,
        args: serde_json::Value,
    },

    /// A tool invocation finished with its raw string result
    ToolCallResult {
        tool_call_id: String,
        content: String,
    },
}

/// Structured result of a completed turn
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    /// The agent's structured final output, if it produced one
    pub output: Option<String>,

    /// Full message history accumulated through this turn
    pub messages: Vec<ModelMessage>,
}

/// Event stream for one node's internal execution
pub type NodeEventStream = BoxStream<'static, Result<ModelEvent>>;

/// One step of a turn's execution
///
/// Closed set of node categories, matched exhaustively by the stream
/// processor.
pub enum TurnNode {
    /// The model is generating thinking/answer text
    ModelRequest(NodeEventStream),

    /// The agent is invoking tools
    ToolCalls(NodeEventStream),

    /// The turn is complete
    End(TurnResult),
}

/// Driver for the external agent framework
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Start one agent turn from a prompt plus accumulated history
    async fn start_turn(
        &self,
        prompt: &str,
        history: Vec<ModelMessage>,
    ) -> Result<Box<dyn AgentTurn>>;
}

/// One in-flight agent turn, consumed node by node
#[async_trait]
pub trait AgentTurn: Send {
    /// Produce the next node of this turn
    ///
    /// Must not be called again after yielding [`TurnNode::End`].
    async fn next_node(&mut self) -> Result<TurnNode>;
}

/// Stateless post-turn evaluator: was a visualization warranted?
///
/// Consumed as a pure function from transcript to boolean. Its internal
/// behavior (model, prompt) is outside this crate.
#[async_trait]
pub trait VisualizationJudge: Send + Sync {
    async fn needs_visualization(&self, transcript: &[ModelMessage]) -> Result<bool>;
}
