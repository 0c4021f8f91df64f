//! Redis Pub/Sub transport
//!
//! Publishing goes through a `ConnectionManager` (auto-reconnecting
//! multiplexed connection); subscriptions use a dedicated `PubSub`
//! connection with `PSUBSCRIBE` glob patterns, split into a sink half
//! (held for later `subscribe` calls) and a stream half (consumed by
//! listeners), so patterns keep accumulating on the live connection even
//! while a listen stream is active. Payloads are JSON on the wire; a
//! malformed inbound payload is wrapped as `{"raw": <text>}` rather than
//! dropped.

use crate::channel::{MessageChannel, MessageStream};
use crate::error::{RelayError, Result};
use crate::types::Message;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use redis::aio::{ConnectionManager, PubSubSink};
use redis::AsyncCommands;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

type MsgStream = Pin<Box<dyn Stream<Item = redis::Msg> + Send>>;

/// Redis Pub/Sub channel
pub struct RedisChannel {
    url: String,
    client: Mutex<Option<redis::Client>>,
    conn: tokio::sync::Mutex<Option<ConnectionManager>>,
    sink: tokio::sync::Mutex<Option<PubSubSink>>,
    messages: Arc<tokio::sync::Mutex<Option<MsgStream>>>,
}

impl RedisChannel {
    /// Create a channel for the given Redis URL (e.g. `redis://localhost:6379`)
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Mutex::new(None),
            conn: tokio::sync::Mutex::new(None),
            sink: tokio::sync::Mutex::new(None),
            messages: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Open the PubSub connection on first use and split it
    async fn ensure_pubsub(&self) -> Result<()> {
        let mut sink_guard = self.sink.lock().await;
        if sink_guard.is_some() {
            return Ok(());
        }

        let client = self
            .client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(RelayError::NotConnected)?;

        let pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| RelayError::Connection(format!("pubsub: {}", e)))?;
        let (sink, stream) = pubsub.split();

        *self.messages.lock().await = Some(stream.boxed());
        *sink_guard = Some(sink);
        Ok(())
    }
}

#[async_trait]
impl MessageChannel for RedisChannel {
    async fn connect(&self) -> Result<()> {
        let mut conn_guard = self.conn.lock().await;
        if conn_guard.is_some() {
            return Ok(());
        }

        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| RelayError::Connection(format!("{}: {}", self.url, e)))?;

        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| RelayError::Connection(format!("{}: {}", self.url, e)))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| RelayError::Connection(format!("ping failed: {}", e)))?;

        tracing::info!(url = %self.url, "Connected to Redis");

        *self.client.lock().unwrap_or_else(|e| e.into_inner()) = Some(client);
        *conn_guard = Some(conn);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.conn.lock().await = None;
        *self.sink.lock().await = None;
        self.client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        // A listener pinned inside next() keeps its stream alive until it
        // observes the dropped connection; don't block on it here.
        if let Ok(mut messages) = self.messages.try_lock() {
            *messages = None;
        }

        tracing::info!("Disconnected from Redis");
        Ok(())
    }

    async fn publish(&self, channel: &str, data: &serde_json::Value) -> Result<()> {
        let mut conn_guard = self.conn.lock().await;
        let conn = conn_guard.as_mut().ok_or(RelayError::NotConnected)?;

        let payload = serde_json::to_string(data)?;
        let _receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| RelayError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<()> {
        self.ensure_pubsub().await?;

        let mut sink_guard = self.sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(RelayError::NotConnected)?;
        sink.psubscribe(pattern)
            .await
            .map_err(|e| RelayError::Subscribe {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(pattern, "Subscribed to Redis pattern");
        Ok(())
    }

    async fn listen(&self) -> Result<Box<dyn MessageStream>> {
        self.ensure_pubsub().await?;

        Ok(Box::new(RedisMessageStream {
            messages: Arc::clone(&self.messages),
        }))
    }
}

/// Stream of decoded messages from a Redis subscription
struct RedisMessageStream {
    messages: Arc<tokio::sync::Mutex<Option<MsgStream>>>,
}

#[async_trait]
impl MessageStream for RedisMessageStream {
    async fn next(&mut self) -> Result<Option<Message>> {
        let mut guard = self.messages.lock().await;
        let stream = match guard.as_mut() {
            Some(stream) => stream,
            None => return Ok(None),
        };

        match stream.next().await {
            Some(msg) => Ok(Some(decode(msg))),
            None => Ok(None),
        }
    }
}

/// Decode a raw Redis message into the transport envelope
///
/// Invalid JSON is wrapped as `{"raw": <text>}` instead of being dropped.
fn decode(msg: redis::Msg) -> Message {
    let channel = msg.get_channel_name().to_string();
    let pattern: String = msg.get_pattern().unwrap_or_default();
    let payload: String = msg.get_payload().unwrap_or_default();

    let data = match serde_json::from_str(&payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(channel = %channel, error = %e, "Malformed JSON payload");
            serde_json::json!({ "raw": payload })
        }
    };

    Message::matched(channel, data, pattern)
}
