//! Channel registry: manages all active channel instances.
//!
//! Merges inbound streams from every channel and dispatches outbound replies
//! to the channel named by the routing key's first segment. The registry is
//! itself a [`Channel`], so the pipeline can hold one handle for all
//! platforms.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use orgclaw_core::channel::{Channel, ChannelMessage};
use orgclaw_core::error::ChannelError;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Central registry holding all enabled channel instances.
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel adapter under its channel type.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "Registered channel");
        self.channels.insert(name, channel);
    }

    /// Get a channel by type.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    /// List all registered channel types.
    pub fn list(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// The channel responsible for a routing key.
    fn route(&self, routing_key: &str) -> Result<&Arc<dyn Channel>, ChannelError> {
        let channel_type = routing_key
            .split_once(':')
            .map(|(head, _)| head)
            .filter(|head| !head.is_empty())
            .ok_or_else(|| ChannelError::InvalidRoutingKey(routing_key.to_string()))?;

        self.channels.get(channel_type).ok_or_else(|| {
            ChannelError::NotConfigured(format!("Channel '{channel_type}' not found"))
        })
    }

    /// Run health checks on all channels.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for (name, channel) in &self.channels {
            let healthy = channel.health_check().await.unwrap_or(false);
            results.insert(name.clone(), healthy);
        }
        results
    }
}

#[async_trait]
impl Channel for ChannelRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    /// Start all channels and merge their message streams into one receiver.
    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let (merged_tx, merged_rx) = mpsc::channel(256);

        for (name, channel) in &self.channels {
            let mut rx = channel.start().await?;
            let tx = merged_tx.clone();

            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if tx.send(msg).await.is_err() {
                        break; // Merged receiver dropped
                    }
                }
            });

            info!(channel = %name, "Started channel");
        }

        Ok(merged_rx)
    }

    async fn send(&self, routing_key: &str, content: &str) -> Result<(), ChannelError> {
        self.route(routing_key)?.send(routing_key, content).await
    }

    /// Stop all channels gracefully.
    async fn stop(&self) -> Result<(), ChannelError> {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "Failed to stop channel");
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(self.health_check_all().await.values().all(|ok| *ok))
    }
}
