//! # OrgClaw Core
//!
//! Domain types, traits, and error definitions for the OrgClaw conversation
//! engine. This crate has **zero framework dependencies**: it defines the
//! tenant, session, consent, memory and pattern model that every other crate
//! implements against.
//!
//! Every collaborator the pipeline talks to (record store, channel, model
//! executor) is a trait here. Implementations live in their own crates, so
//! tests can swap in in-memory stores and scripted executors.

pub mod error;
pub mod tenant;
pub mod session;
pub mod consent;
pub mod memory;
pub mod pattern;
pub mod store;
pub mod channel;
pub mod agent;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use tenant::{AccessMode, ChannelBinding, InstanceStatus, UserInstance};
pub use session::{Role, Session, SessionMessage, SessionStatus};
pub use consent::{ConsentRecord, ConsentType};
pub use memory::{MemoryQuery, MemoryRecord, MemoryType};
pub use pattern::{MetricType, PatternRecord, PatternType};
pub use store::{ConsentStore, MemoryStore, PatternStore, RecordStore, SessionStore, TenantStore};
pub use channel::{Channel, ChannelMessage};
pub use agent::AgentExecutor;
pub use event::{DomainEvent, EventBus};
