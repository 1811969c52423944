//! Channel trait: the abstraction over chat platforms.
//!
//! A Channel connects OrgClaw to a messaging platform (Slack, Teams, email,
//! CLI, etc.). It yields inbound messages and delivers replies addressed by
//! routing key: `{channel_type}:{org_ref}:{user_ref...}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::ChannelError;

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Platform message ID (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Where the conversation lives and where replies go
    pub routing_key: String,

    /// Sender identifier (platform-specific user ID)
    pub sender_id: String,

    /// Human-readable sender name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// The text content
    pub content: String,

    pub timestamp: DateTime<Utc>,

    /// Platform-specific metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ChannelMessage {
    pub fn new(
        routing_key: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: None,
            routing_key: routing_key.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// The core Channel trait.
///
/// `send` failures are returned, never panicked; callers treat them as
/// retryable.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel type this adapter serves (e.g., "slack", "cli").
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    async fn start(
        &self,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<ChannelMessage, ChannelError>>,
        ChannelError,
    >;

    /// Deliver text to the conversation addressed by `routing_key`.
    async fn send(&self, routing_key: &str, content: &str)
    -> std::result::Result<(), ChannelError>;

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Health check: is the channel connected and operational?
    async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
        Ok(true)
    }
}
