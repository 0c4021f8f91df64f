//! Pub/sub-backed cancellation
//!
//! A background task listens on `cancel:*` and records cancelled user keys
//! in a local set, so the hot streaming path checks membership in O(1)
//! with no I/O instead of polling a remote store per chunk. Entries are
//! removed when consumed; the set only ever holds pending, unconsumed
//! cancellations.

use crate::channel::MessageChannel;
use crate::error::Result;
use crate::messaging::MessagingService;
use crate::types::{EventKind, CANCEL_PATTERN};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;

/// Receives cancellation signals and exposes them to request tasks
pub struct CancellationManager {
    channel: Arc<dyn MessageChannel>,
    messaging: Arc<MessagingService>,
    cancelled: Arc<RwLock<HashSet<String>>>,
    running: Arc<AtomicBool>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CancellationManager {
    /// Create a manager over a dedicated channel
    ///
    /// The channel must not be shared with the messaging service — the
    /// cancellation subscription has its own lifecycle.
    pub fn new(channel: Arc<dyn MessageChannel>, messaging: Arc<MessagingService>) -> Self {
        Self {
            channel,
            messaging,
            cancelled: Arc::new(RwLock::new(HashSet::new())),
            running: Arc::new(AtomicBool::new(false)),
            listener: tokio::sync::Mutex::new(None),
        }
    }

    /// Connect, subscribe to `cancel:*`, and launch the background listener
    pub async fn start(&self) -> Result<()> {
        tracing::info!(pattern = CANCEL_PATTERN, "Starting cancellation manager");
        self.channel.connect().await?;
        self.channel.subscribe(CANCEL_PATTERN).await?;
        self.running.store(true, Ordering::SeqCst);

        let mut stream = self.channel.listen().await?;
        let cancelled = Arc::clone(&self.cancelled);
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Ok(Some(msg)) => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        // channel = "cancel:user@example.org"; payload ignored
                        let user_key = match msg.channel.split_once(':') {
                            Some((_, suffix)) if !suffix.is_empty() => suffix.to_string(),
                            _ => {
                                tracing::warn!(channel = %msg.channel, "Cancel signal without user key");
                                continue;
                            }
                        };
                        tracing::info!(user = %user_key, "Cancellation signal received");
                        if let Ok(mut set) = cancelled.write() {
                            set.insert(user_key);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Cancellation listener failed");
                        break;
                    }
                }
            }
        });

        *self.listener.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the listener and disconnect
    pub async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Cancellation listener join failed");
                }
            }
        }

        self.channel.disconnect().await?;
        tracing::info!("Cancellation manager stopped");
        Ok(())
    }

    /// O(1) membership test, no I/O — safe on the hot streaming path
    pub fn is_cancelled(&self, user_key: &str) -> bool {
        self.cancelled
            .read()
            .map(|set| set.contains(user_key))
            .unwrap_or(false)
    }

    /// Remove a pending cancellation (idempotent)
    pub fn clear(&self, user_key: &str) {
        if let Ok(mut set) = self.cancelled.write() {
            set.remove(user_key);
        }
    }

    /// Consume a pending cancellation if present
    ///
    /// Returns `false` with no side effect when nothing is pending.
    /// Otherwise clears the flag, publishes the terminal `done` event for
    /// the user, and returns `true` — the caller abandons the in-flight
    /// turn.
    pub async fn handle_if_cancelled(&self, user_key: &str) -> Result<bool> {
        if !self.is_cancelled(user_key) {
            return Ok(false);
        }

        tracing::info!(user = %user_key, "Abandoning turn for cancellation");
        self.clear(user_key);
        self.messaging
            .publish_event(user_key, EventKind::Done, serde_json::json!({}), true)
            .await?;
        Ok(true)
    }
}
