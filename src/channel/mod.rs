//! Message channel trait — the core abstraction for pub/sub transports
//!
//! All transports (Redis, in-process, etc.) implement `MessageChannel` to
//! provide a uniform API for connect, publish, subscribe, and listen.
//! Logical channel names are plain strings composed by convention
//! (`inbox:*`, `outbox:{user}`, `cancel:{user}`); subscription patterns use
//! Redis `PSUBSCRIBE`-style globs.

use crate::error::Result;
use crate::types::Message;
use async_trait::async_trait;

pub mod memory;
pub mod redis;

pub use self::memory::{MemoryChannel, MemoryHub};
pub use self::redis::RedisChannel;

/// Core trait for pub/sub transports
///
/// Implementations handle the transport-specific details of delivery.
/// Delivery is at-least-once to currently-subscribed listeners; messages
/// published before any matching subscription exists are dropped.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Establish the transport connection
    ///
    /// Idempotent if already connected. Fails with
    /// [`RelayError::Connection`](crate::RelayError::Connection) if the
    /// transport is unreachable.
    async fn connect(&self) -> Result<()>;

    /// Release all transport resources
    ///
    /// Safe to call multiple times. Active listen streams end after
    /// disconnect.
    async fn disconnect(&self) -> Result<()>;

    /// Publish a JSON payload to a channel
    ///
    /// Fails with [`RelayError::NotConnected`](crate::RelayError::NotConnected)
    /// before `connect()`. Fire-and-forget beyond the transport send
    /// completing — no receiver acknowledgment is awaited.
    async fn publish(&self, channel: &str, data: &serde_json::Value) -> Result<()>;

    /// Register interest in a wildcard or exact channel name
    ///
    /// Multiple calls accumulate patterns.
    async fn subscribe(&self, pattern: &str) -> Result<()>;

    /// Open a lazy stream of messages for the subscribed patterns
    ///
    /// The stream suspends until a message arrives and ends when the
    /// channel disconnects.
    async fn listen(&self) -> Result<Box<dyn MessageStream>>;
}

/// Async handle for receiving messages from any transport
#[async_trait]
pub trait MessageStream: Send {
    /// Receive the next message, or `None` once the channel disconnects
    async fn next(&mut self) -> Result<Option<Message>>;
}

/// Glob match in Redis `PSUBSCRIBE` style: `*` matches any run of
/// characters, `?` matches exactly one.
pub(crate) fn pattern_matches(pattern: &str, channel: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = channel.chars().collect();
    glob_match(&pat, &txt)
}

fn glob_match(pat: &[char], txt: &[char]) -> bool {
    match pat.first() {
        None => txt.is_empty(),
        Some('*') => {
            // Try every possible suffix, shortest first
            (0..=txt.len()).any(|i| glob_match(&pat[1..], &txt[i..]))
        }
        Some('?') => !txt.is_empty() && glob_match(&pat[1..], &txt[1..]),
        Some(c) => txt.first() == Some(c) && glob_match(&pat[1..], &txt[1..]),
    }
}
