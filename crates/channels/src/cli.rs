//! CLI channel: interactive terminal-based chat.
//!
//! Reads from stdin, writes to stdout. Every line becomes a message on the
//! fixed routing key `cli:{org_ref}:{user_ref}`, so a terminal user resolves
//! through the same channel bindings as any other platform.

use async_trait::async_trait;
use orgclaw_core::channel::{Channel, ChannelMessage};
use orgclaw_core::error::ChannelError;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Channel type served by [`CliChannel`].
pub const CLI_CHANNEL: &str = "cli";

/// Interactive CLI channel for terminal-based chat.
pub struct CliChannel {
    org_ref: String,
    user_ref: String,
}

impl CliChannel {
    pub fn new(org_ref: impl Into<String>, user_ref: impl Into<String>) -> Self {
        Self {
            org_ref: org_ref.into(),
            user_ref: user_ref.into(),
        }
    }

    /// The routing key every inbound line carries.
    pub fn routing_key(&self) -> String {
        format!("{CLI_CHANNEL}:{}:{}", self.org_ref, self.user_ref)
    }

    /// Build the message for one line of input; `None` for blank lines.
    fn line_to_message(&self, line: &str) -> Option<ChannelMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let mut msg = ChannelMessage::new(self.routing_key(), self.user_ref.clone(), line);
        msg.sender_name = Some("User".into());
        Some(msg)
    }
}

fn is_exit_command(line: &str) -> bool {
    matches!(line.trim(), "exit" | "quit" | "/exit" | "/quit" | ":q")
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        CLI_CHANNEL
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let template = CliChannel::new(self.org_ref.clone(), self.user_ref.clone());

        tokio::spawn(async move {
            let reader = BufReader::new(io::stdin());
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if is_exit_command(&line) {
                            break;
                        }
                        let Some(msg) = template.line_to_message(&line) else {
                            continue;
                        };
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx
                            .send(Err(ChannelError::ConnectionLost(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, routing_key: &str, content: &str) -> Result<(), ChannelError> {
        if !routing_key.starts_with("cli:") {
            return Err(ChannelError::InvalidRoutingKey(routing_key.to_string()));
        }

        let mut stdout = io::stdout();
        stdout
            .write_all(format!("{content}\n").as_bytes())
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: CLI_CHANNEL.into(),
                reason: e.to_string(),
            })?;
        stdout
            .flush()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: CLI_CHANNEL.into(),
                reason: e.to_string(),
            })
    }
}
