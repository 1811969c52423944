//! Store traits: the abstract keyed record store behind the core.
//!
//! Each bounded context gets its own trait so components depend only on the
//! records they own. Every call is its own unit of work; nothing here spans a
//! transaction across traits.
//!
//! Implementations: in-memory (tests, ephemeral runs) and SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::consent::{ConsentRecord, ConsentType};
use crate::error::StoreError;
use crate::memory::{MemoryQuery, MemoryRecord};
use crate::pattern::PatternRecord;
use crate::session::{Session, SessionMessage};
use crate::tenant::{ChannelBinding, InstanceStatus, UserInstance};

type StoreResult<T> = std::result::Result<T, StoreError>;

/// User instances and channel bindings.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn insert_instance(&self, instance: &UserInstance) -> StoreResult<()>;

    async fn get_instance(&self, instance_id: &str) -> StoreResult<Option<UserInstance>>;

    /// Returns `false` when no such instance exists.
    async fn update_instance_status(
        &self,
        instance_id: &str,
        status: InstanceStatus,
    ) -> StoreResult<bool>;

    /// Fails with `StoreError::Conflict` if the triple is already bound.
    async fn insert_binding(&self, binding: &ChannelBinding) -> StoreResult<()>;

    async fn find_binding(
        &self,
        channel_type: &str,
        channel_org_ref: &str,
        channel_user_ref: &str,
    ) -> StoreResult<Option<ChannelBinding>>;
}

/// Sessions and their messages.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> StoreResult<()>;

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Overwrites every mutable field of the stored session.
    async fn update_session(&self, session: &Session) -> StoreResult<()>;

    /// Most recently active `active` session for the instance on a channel type.
    async fn find_active_session(
        &self,
        instance_id: &str,
        channel_type: &str,
    ) -> StoreResult<Option<Session>>;

    /// Most recently active `active` session on any channel with
    /// `last_activity_at` strictly after `since`.
    async fn find_recent_active_session(
        &self,
        instance_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Option<Session>>;

    /// Move every `active` session idle since `cutoff` to `expired`.
    /// `inclusive` also expires sessions whose activity equals the cutoff.
    async fn expire_idle_sessions(&self, cutoff: DateTime<Utc>, inclusive: bool)
    -> StoreResult<u64>;

    /// Sessions of any status, most recently active first.
    async fn list_recent_sessions(&self, instance_id: &str, limit: usize)
    -> StoreResult<Vec<Session>>;

    async fn insert_message(&self, message: &SessionMessage) -> StoreResult<()>;

    /// Messages in chronological (insertion) order.
    async fn list_messages(
        &self,
        session_id: &str,
        include_compacted: bool,
    ) -> StoreResult<Vec<SessionMessage>>;

    /// Flag the given messages compacted; returns how many changed.
    async fn mark_compacted(&self, message_ids: &[String]) -> StoreResult<u64>;
}

/// Consent records.
#[async_trait]
pub trait ConsentStore: Send + Sync {
    async fn get_consent(
        &self,
        instance_id: &str,
        consent_type: ConsentType,
    ) -> StoreResult<Option<ConsentRecord>>;

    async fn upsert_consent(&self, record: &ConsentRecord) -> StoreResult<()>;

    async fn list_consents(&self, instance_id: &str) -> StoreResult<Vec<ConsentRecord>>;
}

/// Personal memories.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert_memory(&self, memory: &MemoryRecord) -> StoreResult<()>;

    async fn get_memory(&self, memory_id: &str) -> StoreResult<Option<MemoryRecord>>;

    /// Live (not deleted, not expired) memories, most recently updated first.
    async fn query_memories(
        &self,
        instance_id: &str,
        query: &MemoryQuery,
    ) -> StoreResult<Vec<MemoryRecord>>;

    async fn update_memory(&self, memory: &MemoryRecord) -> StoreResult<()>;

    /// Bump the access counter and last-accessed timestamp.
    async fn record_access(&self, memory_id: &str) -> StoreResult<()>;

    async fn soft_delete_memory(&self, memory_id: &str) -> StoreResult<bool>;

    async fn soft_delete_all_memories(&self, instance_id: &str) -> StoreResult<u64>;

    /// Physically remove memories whose expiry is before `now`.
    async fn delete_expired_memories(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Anonymized pattern logs.
#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn insert_pattern(&self, record: &PatternRecord) -> StoreResult<()>;

    async fn list_patterns(&self, org_id: &str) -> StoreResult<Vec<PatternRecord>>;
}

/// Everything the conversation core needs from one backing store.
pub trait RecordStore:
    TenantStore + SessionStore + ConsentStore + MemoryStore + PatternStore
{
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;
}
