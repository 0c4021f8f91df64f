//! Top-level request loop
//!
//! Subscribes to the inbound wildcard, spawns one independent task per
//! inbound message, and wires the streaming, cancellation, and retry
//! components together per request. A failing request never crashes the
//! listen loop.

use crate::agent::AgentRunner;
use crate::cancel::CancellationManager;
use crate::error::Result;
use crate::messaging::MessagingService;
use crate::retry::VisualizationRetryManager;
use crate::stream::{NodeOutcome, StreamProcessor};
use crate::types::{InboundRequest, Message, RequestContext};
use std::sync::Arc;

/// Orchestrates the full request lifecycle for all users
#[derive(Clone)]
pub struct Orchestrator {
    messaging: Arc<MessagingService>,
    cancellation: Arc<CancellationManager>,
    stream_processor: Arc<StreamProcessor>,
    retry_manager: Arc<VisualizationRetryManager>,
    agent: Arc<dyn AgentRunner>,
}

impl Orchestrator {
    /// Compose the orchestrator from explicitly injected components
    pub fn new(
        messaging: Arc<MessagingService>,
        cancellation: Arc<CancellationManager>,
        stream_processor: Arc<StreamProcessor>,
        retry_manager: Arc<VisualizationRetryManager>,
        agent: Arc<dyn AgentRunner>,
    ) -> Self {
        Self {
            messaging,
            cancellation,
            stream_processor,
            retry_manager,
            agent,
        }
    }

    /// Listen for inbound requests until the stream ends
    ///
    /// Starts the messaging service and the cancellation manager, and
    /// stops both on every exit path.
    pub async fn serve(&self) -> Result<()> {
        self.messaging.start().await?;
        if let Err(e) = self.cancellation.start().await {
            let _ = self.messaging.stop().await;
            return Err(e);
        }

        tracing::info!("Orchestrator listening");
        let result = self.listen_loop().await;

        if let Err(e) = self.cancellation.stop().await {
            tracing::warn!(error = %e, "Cancellation manager stop failed");
        }
        if let Err(e) = self.messaging.stop().await {
            tracing::warn!(error = %e, "Messaging service stop failed");
        }
        result
    }

    async fn listen_loop(&self) -> Result<()> {
        let mut stream = self.messaging.listen().await?;
        while let Some(msg) = stream.next().await? {
            let this = self.clone();
            tokio::spawn(async move {
                this.handle_message(msg).await;
            });
        }
        tracing::info!("Inbound stream ended");
        Ok(())
    }

    /// Validate and process one inbound message at the task boundary
    async fn handle_message(&self, msg: Message) {
        let request = match InboundRequest::parse(&msg.data) {
            Some(parsed) => parsed,
            None => {
                // No trustworthy destination to answer to — drop silently
                tracing::warn!(channel = %msg.channel, "Dropping malformed inbound message");
                return;
            }
        };

        let ctx = RequestContext::new(&request.email);
        tracing::info!(
            user = %ctx.user_key,
            request = %ctx.request_id,
            tenant = request.company_id.as_deref().unwrap_or("-"),
            "Request received"
        );

        self.retry_manager.start_request(&ctx);

        if let Err(e) = self.process_request(&ctx, &request).await {
            tracing::error!(
                user = %ctx.user_key,
                request = %ctx.request_id,
                error = %e,
                "Request failed"
            );
            self.retry_manager.abandon(&ctx);
            if let Err(publish_err) = self
                .messaging
                .publish_error(&ctx.user_key, &e.to_string())
                .await
            {
                tracing::error!(
                    user = %ctx.user_key,
                    error = %publish_err,
                    "Failed to publish error event"
                );
            }
        }
    }

    /// Drive agent turns until the retry manager finalizes the request
    async fn process_request(&self, ctx: &RequestContext, request: &InboundRequest) -> Result<()> {
        let mut prompt = request.message.clone();
        let mut history = Vec::new();

        loop {
            let mut turn = self.agent.start_turn(&prompt, history).await?;
            let mut buffer = String::new();

            let outcome = loop {
                // Cancellation is checked before every node; a cancelled
                // request stops at the next node boundary
                if self.cancellation.handle_if_cancelled(&ctx.user_key).await? {
                    self.retry_manager.abandon(ctx);
                    return Ok(());
                }

                let node = turn.next_node().await?;
                match self.stream_processor.process_node(node, ctx, buffer.clone()).await? {
                    NodeOutcome::Continue(updated) => buffer = updated,
                    NodeOutcome::End(result) => break result,
                }
            };

            match self
                .retry_manager
                .finalize_or_retry(ctx, &outcome, &buffer)
                .await?
            {
                None => return Ok(()),
                Some(decision) => {
                    prompt = decision.retry_prompt;
                    history = decision.message_history;
                }
            }
        }
    }
}
