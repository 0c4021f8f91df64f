//! In-process transport for single-address-space deployments and tests
//!
//! A `MemoryHub` is the shared broker; each `MemoryChannel` created from it
//! is one endpoint. Publishing delivers one copy to every currently-
//! subscribed endpoint whose pattern matches the channel name. No
//! persistence: a message published before any matching subscription
//! exists is dropped.

use crate::channel::{pattern_matches, MessageChannel, MessageStream};
use crate::error::{RelayError, Result};
use crate::types::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct HubInner {
    endpoints: HashMap<u64, Endpoint>,
    next_id: u64,
}

struct Endpoint {
    patterns: Vec<String>,
    tx: mpsc::UnboundedSender<Message>,
}

/// Shared in-process broker
///
/// Cheap to clone; all clones address the same set of endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new, not-yet-connected endpoint on this hub
    pub fn channel(&self) -> MemoryChannel {
        MemoryChannel {
            hub: self.clone(),
            id: Mutex::new(None),
            rx: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    fn register(&self, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.endpoints.insert(
            id,
            Endpoint {
                patterns: Vec::new(),
                tx,
            },
        );
        id
    }

    fn unregister(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.endpoints.remove(&id);
    }

    fn add_pattern(&self, id: u64, pattern: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(endpoint) = inner.endpoints.get_mut(&id) {
            if !endpoint.patterns.iter().any(|p| p == pattern) {
                endpoint.patterns.push(pattern.to_string());
            }
        }
    }

    fn deliver(&self, channel: &str, data: &serde_json::Value) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for endpoint in inner.endpoints.values() {
            let matched = endpoint
                .patterns
                .iter()
                .find(|p| pattern_matches(p, channel));
            if let Some(pattern) = matched {
                // A dropped receiver just means the listener went away
                let _ = endpoint
                    .tx
                    .send(Message::matched(channel, data.clone(), pattern.clone()));
            }
        }
    }
}

/// One endpoint on a [`MemoryHub`]
pub struct MemoryChannel {
    hub: MemoryHub,
    id: Mutex<Option<u64>>,
    rx: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Message>>>>,
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn connect(&self) -> Result<()> {
        {
            let id = self.id.lock().unwrap_or_else(|e| e.into_inner());
            if id.is_some() {
                return Ok(());
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint_id = self.hub.register(tx);
        *self.rx.lock().await = Some(rx);
        *self.id.lock().unwrap_or_else(|e| e.into_inner()) = Some(endpoint_id);

        tracing::debug!(endpoint = endpoint_id, "In-memory channel connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let taken = self
            .id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(endpoint_id) = taken {
            // Dropping the hub-side sender ends any active listen stream
            self.hub.unregister(endpoint_id);
            tracing::debug!(endpoint = endpoint_id, "In-memory channel disconnected");
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, data: &serde_json::Value) -> Result<()> {
        let connected = self
            .id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        if !connected {
            return Err(RelayError::NotConnected);
        }

        self.hub.deliver(channel, data);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<()> {
        let endpoint_id = self
            .id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or(RelayError::NotConnected)?;

        self.hub.add_pattern(endpoint_id, pattern);
        tracing::debug!(endpoint = endpoint_id, pattern, "Subscribed");
        Ok(())
    }

    async fn listen(&self) -> Result<Box<dyn MessageStream>> {
        let connected = self
            .id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        if !connected {
            return Err(RelayError::NotConnected);
        }

        Ok(Box::new(MemoryMessageStream {
            rx: Arc::clone(&self.rx),
        }))
    }
}

/// Stream of messages for one in-memory endpoint
struct MemoryMessageStream {
    rx: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Message>>>>,
}

#[async_trait]
impl MessageStream for MemoryMessageStream {
    async fn next(&mut self) -> Result<Option<Message>> {
        let mut guard = self.rx.lock().await;
        match guard.as_mut() {
            Some(rx) => Ok(rx.recv().await),
            None => Ok(None),
        }
    }
}
