//! Visualization retry state machine
//!
//! After each agent turn the manager decides: publish the final answer, or
//! re-drive the agent with an injected prompt, bounded by a retry ceiling.
//! State is keyed by request id so two concurrent requests from the same
//! user cannot stomp each other.

use crate::agent::{ModelMessage, TurnResult, VisualizationJudge};
use crate::error::Result;
use crate::messaging::MessagingService;
use crate::types::{EventKind, RequestContext};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Default retry ceiling: at most this many retry turns after the first
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Injected prompt that re-drives the agent toward a visualization
pub const RETRY_PROMPT: &str =
    "Create a visualization (chart or table) to illustrate your previous answer.";

/// Progress message on the `retrying` event
const RETRYING_MESSAGE: &str = "Generating the visualization...";

/// Fixed apology published when the ceiling is reached without a visual
const EXHAUSTED_MESSAGE: &str =
    "The visualization could not be generated. Could you rephrase your question?";

/// Per-request retry bookkeeping
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Retry turns taken so far
    pub attempt: u32,

    /// A chart/table artifact was emitted during the current turn
    pub has_visual: bool,
}

impl RetryState {
    fn increment_attempt(&mut self) {
        self.attempt += 1;
        self.has_visual = false;
    }

    fn mark_visual(&mut self) {
        self.has_visual = true;
    }
}

/// Parameters for the next retry turn
///
/// Produced once per retry and consumed immediately by the orchestrator.
#[derive(Debug, Clone)]
pub struct RetryDecision {
    pub retry_prompt: String,
    pub message_history: Vec<ModelMessage>,
}

/// Decides after each turn whether to finalize or re-drive the agent
pub struct VisualizationRetryManager {
    messaging: Arc<MessagingService>,
    judge: Arc<dyn VisualizationJudge>,
    states: RwLock<HashMap<String, RetryState>>,
    max_retries: u32,
}

impl VisualizationRetryManager {
    pub fn new(
        messaging: Arc<MessagingService>,
        judge: Arc<dyn VisualizationJudge>,
        max_retries: u32,
    ) -> Self {
        Self {
            messaging,
            judge,
            states: RwLock::new(HashMap::new()),
            max_retries,
        }
    }

    /// Initialize state for a new request
    pub fn start_request(&self, request: &RequestContext) {
        if let Ok(mut states) = self.states.write() {
            states.insert(request.request_id.clone(), RetryState::default());
        }
        tracing::debug!(request = %request.request_id, "Retry state created");
    }

    /// Record that a visual artifact was produced during the current turn
    ///
    /// No-op if no active state exists, guarding against out-of-order
    /// notifications.
    pub fn record_visual(&self, request: &RequestContext) {
        if let Ok(mut states) = self.states.write() {
            if let Some(state) = states.get_mut(&request.request_id) {
                state.mark_visual();
                tracing::debug!(request = %request.request_id, "Visual artifact recorded");
            }
        }
    }

    /// Drop state for a request that will not finalize (cancel, turn failure)
    pub fn abandon(&self, request: &RequestContext) {
        self.reset(request);
    }

    /// Evaluate a completed turn: finalize it, or return retry parameters
    ///
    /// Returns `None` once the request is fully handled (final answer or
    /// apology and the terminal event published), `Some` when the
    /// orchestrator should start another turn.
    pub async fn finalize_or_retry(
        &self,
        request: &RequestContext,
        outcome: &TurnResult,
        buffer: &str,
    ) -> Result<Option<RetryDecision>> {
        let state = self
            .states
            .read()
            .ok()
            .and_then(|states| states.get(&request.request_id).cloned());

        let state = match state {
            Some(state) => state,
            None => {
                // No active state — finalize directly
                self.publish_final(request, outcome, buffer, None).await?;
                return Ok(None);
            }
        };

        // Fast path: a visual was produced this turn
        if state.has_visual {
            tracing::debug!(request = %request.request_id, "Finalizing: visual produced");
            self.reset(request);
            self.publish_final(request, outcome, buffer, None).await?;
            return Ok(None);
        }

        // Ceiling reached without a visual
        if state.attempt >= self.max_retries {
            tracing::warn!(
                request = %request.request_id,
                attempts = state.attempt,
                "Visualization retries exhausted"
            );
            self.reset(request);
            self.publish_final(request, outcome, buffer, Some(EXHAUSTED_MESSAGE))
                .await?;
            return Ok(None);
        }

        if !self.evaluate_need(request, outcome).await {
            tracing::debug!(request = %request.request_id, "Finalizing: no visualization needed");
            self.reset(request);
            self.publish_final(request, outcome, buffer, None).await?;
            return Ok(None);
        }

        self.trigger_retry(request, outcome).await.map(Some)
    }

    /// Ask the judge whether a visualization was warranted
    ///
    /// Judge failure defaults to "yes": fail toward more retries, not
    /// silent omission.
    async fn evaluate_need(&self, request: &RequestContext, outcome: &TurnResult) -> bool {
        match self.judge.needs_visualization(&outcome.messages).await {
            Ok(needed) => {
                tracing::debug!(request = %request.request_id, needed, "Judge verdict");
                needed
            }
            Err(e) => {
                tracing::warn!(
                    request = %request.request_id,
                    error = %e,
                    "Judge failed, defaulting to retry"
                );
                true
            }
        }
    }

    async fn trigger_retry(
        &self,
        request: &RequestContext,
        outcome: &TurnResult,
    ) -> Result<RetryDecision> {
        let attempt = {
            let mut states = self
                .states
                .write()
                .unwrap_or_else(|e| e.into_inner());
            match states.get_mut(&request.request_id) {
                Some(state) => {
                    state.increment_attempt();
                    state.attempt
                }
                None => 0,
            }
        };

        tracing::info!(
            request = %request.request_id,
            attempt,
            max = self.max_retries,
            "Retrying for visualization"
        );

        self.messaging
            .publish_event(
                &request.user_key,
                EventKind::Retrying,
                serde_json::json!({ "message": RETRYING_MESSAGE }),
                false,
            )
            .await?;

        Ok(RetryDecision {
            retry_prompt: RETRY_PROMPT.to_string(),
            message_history: outcome.messages.clone(),
        })
    }

    /// Publish the final text and the terminal event
    ///
    /// Prefers the agent's structured output over the accumulated buffer;
    /// with `error_message` set, publishes a terminal `error` instead.
    async fn publish_final(
        &self,
        request: &RequestContext,
        outcome: &TurnResult,
        buffer: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        if let Some(message) = error_message {
            self.messaging
                .publish_event(
                    &request.user_key,
                    EventKind::Error,
                    serde_json::json!({ "message": message }),
                    true,
                )
                .await?;
            return Ok(());
        }

        let final_text = match outcome.output.as_deref() {
            Some(output) if !output.is_empty() => output,
            _ => buffer.trim(),
        };

        if !final_text.is_empty() {
            self.messaging
                .publish_event(
                    &request.user_key,
                    EventKind::Text,
                    serde_json::json!({ "content": final_text }),
                    false,
                )
                .await?;
        }

        self.messaging
            .publish_event(&request.user_key, EventKind::Done, serde_json::json!({}), true)
            .await?;

        tracing::debug!(request = %request.request_id, "Request finalized");
        Ok(())
    }

    fn reset(&self, request: &RequestContext) {
        if let Ok(mut states) = self.states.write() {
            states.remove(&request.request_id);
        }
    }

    #[cfg(test)]
    fn state(&self, request: &RequestContext) -> Option<RetryState> {
        self.states
            .read()
            .ok()
            .and_then(|states| states.get(&request.request_id).cloned())
    }
}
