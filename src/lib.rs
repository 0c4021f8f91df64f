//! # agent-relay
//!
//! Message-driven orchestration core for streaming LLM agent conversations
//! over pub/sub.
//!
//! ## Overview
//!
//! A caller drops a request on `inbox:{user}`, a worker streams partial
//! results (thinking, text, tool calls, charts, tables) onto
//! `outbox:{user}`, and the caller may cancel mid-flight via
//! `cancel:{user}`. After each agent turn, a retry manager asks a judge
//! whether a visualization was warranted and re-drives the agent if so,
//! bounded by a retry ceiling.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agent_relay::{
//!     CancellationManager, EventParser, MemoryHub, MessagingService, Orchestrator,
//!     RelayConfig, StreamProcessor, VisualizationRetryManager,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     agent: Arc<dyn agent_relay::AgentRunner>,
//! #     judge: Arc<dyn agent_relay::VisualizationJudge>,
//! # ) -> agent_relay::Result<()> {
//! let config = RelayConfig::from_env()?;
//! let hub = MemoryHub::new();
//!
//! let messaging = Arc::new(MessagingService::new(config.build_channel(&hub)));
//! let cancellation = Arc::new(CancellationManager::new(
//!     config.build_channel(&hub),
//!     Arc::clone(&messaging),
//! ));
//! let retry = Arc::new(VisualizationRetryManager::new(
//!     Arc::clone(&messaging),
//!     judge,
//!     config.max_retries,
//! ));
//! let processor = Arc::new(StreamProcessor::new(
//!     Arc::clone(&messaging),
//!     EventParser,
//!     Arc::clone(&retry),
//! ));
//!
//! Orchestrator::new(messaging, cancellation, processor, retry, agent)
//!     .serve()
//!     .await
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **MessageChannel** trait — transport abstraction (Redis, in-process)
//! - **MessagingService** — inbox/outbox framing and the event envelope
//! - **CancellationManager** — out-of-band cancel signals, O(1) hot-path checks
//! - **EventParser** — pure classification of agent streaming events
//! - **StreamProcessor** — per-node dispatch and outbound publication
//! - **VisualizationRetryManager** — post-turn finalize-or-retry decision
//! - **Orchestrator** — one concurrent task per inbound request

pub mod agent;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod messaging;
pub mod orchestrator;
pub mod parser;
pub mod retry;
pub mod stream;
pub mod types;

// Re-export core types
pub use agent::{
    AgentRunner, AgentTurn, ModelEvent, ModelMessage, NodeEventStream, Role, TurnNode,
    TurnResult, VisualizationJudge,
};
pub use cancel::CancellationManager;
pub use channel::{MemoryChannel, MemoryHub, MessageChannel, MessageStream, RedisChannel};
pub use config::{RelayConfig, TransportKind};
pub use error::{RelayError, Result};
pub use messaging::MessagingService;
pub use orchestrator::Orchestrator;
pub use parser::{EventParser, ParsedToolResult};
pub use retry::{RetryDecision, RetryState, VisualizationRetryManager, DEFAULT_MAX_RETRIES, RETRY_PROMPT};
pub use stream::{NodeOutcome, StreamProcessor};
pub use types::{EventKind, InboundRequest, Message, RequestContext};
