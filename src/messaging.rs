//! Messaging service — inbox/outbox framing over a message channel
//!
//! Wraps one [`MessageChannel`] with the channel naming convention and the
//! outbound event envelope, so callers publish events without knowing
//! patterns, prefixes, or wire shapes.

use crate::channel::{MessageChannel, MessageStream};
use crate::error::{RelayError, Result};
use crate::types::{EventKind, INBOX_PATTERN, OUTBOX_PREFIX};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Inbox listener and outbox publisher for all users
pub struct MessagingService {
    channel: Arc<dyn MessageChannel>,
    connected: AtomicBool,
}

impl MessagingService {
    /// Create a service over an injected channel
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            channel,
            connected: AtomicBool::new(false),
        }
    }

    /// Connect and subscribe to the inbound wildcard
    pub async fn start(&self) -> Result<()> {
        tracing::info!(pattern = INBOX_PATTERN, "Starting messaging service");
        self.channel.connect().await?;
        self.channel.subscribe(INBOX_PATTERN).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Disconnect from the channel
    pub async fn stop(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("Stopping messaging service");
            self.channel.disconnect().await?;
        }
        Ok(())
    }

    /// Open the inbound message stream
    ///
    /// Fails with [`RelayError::NotConnected`] before `start()`.
    pub async fn listen(&self) -> Result<Box<dyn MessageStream>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RelayError::NotConnected);
        }
        self.channel.listen().await
    }

    /// Publish one outbound event to `outbox:{user}`
    ///
    /// The envelope is the payload's fields plus `event` (the kind's wire
    /// name) and `done`. Fire-and-forget: nothing is awaited beyond the
    /// transport send.
    pub async fn publish_event(
        &self,
        user_key: &str,
        kind: EventKind,
        payload: serde_json::Value,
        done: bool,
    ) -> Result<()> {
        let mut envelope = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        envelope.insert(
            "event".to_string(),
            serde_json::Value::String(kind.as_str().to_string()),
        );
        envelope.insert("done".to_string(), serde_json::Value::Bool(done));

        let outbox = format!("{}{}", OUTBOX_PREFIX, user_key);
        self.channel
            .publish(&outbox, &serde_json::Value::Object(envelope))
            .await?;

        if done {
            tracing::debug!(user = %user_key, kind = %kind, "Terminal event published");
        }
        Ok(())
    }

    /// Publish a terminal `error` event
    pub async fn publish_error(&self, user_key: &str, message: &str) -> Result<()> {
        tracing::error!(user = %user_key, error = %message, "Publishing error event");
        self.publish_event(
            user_key,
            EventKind::Error,
            serde_json::json!({ "message": message }),
            true,
        )
        .await
    }
}
