//! Chat channel implementations for OrgClaw.
//!
//! Each channel connects to a chat platform and relays messages to/from
//! the pipeline, addressed by routing key.
//!
//! Available channels:
//! - **CLI**: Interactive terminal chat (stdin/stdout)
//! - **Registry**: Fan-in of every channel and routing-key dispatch for replies

pub mod cli;
pub mod registry;

pub use cli::{CLI_CHANNEL, CliChannel};
pub use registry::ChannelRegistry;
