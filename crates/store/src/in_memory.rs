//! In-memory record store: useful for testing and ephemeral runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgclaw_core::consent::{ConsentRecord, ConsentType};
use orgclaw_core::error::StoreError;
use orgclaw_core::memory::{MemoryQuery, MemoryRecord};
use orgclaw_core::pattern::PatternRecord;
use orgclaw_core::session::{Session, SessionMessage, SessionStatus};
use orgclaw_core::store::{
    ConsentStore, MemoryStore, PatternStore, RecordStore, SessionStore, TenantStore,
};
use orgclaw_core::tenant::{ChannelBinding, InstanceStatus, UserInstance};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A [`RecordStore`] that keeps every table in a `Vec`.
///
/// Vec position doubles as insertion order, the same tie-breaker the SQLite
/// store gets from its `iid` column.
#[derive(Default)]
pub struct InMemoryStore {
    instances: Arc<RwLock<Vec<UserInstance>>>,
    bindings: Arc<RwLock<Vec<ChannelBinding>>>,
    sessions: Arc<RwLock<Vec<Session>>>,
    messages: Arc<RwLock<Vec<SessionMessage>>>,
    consents: Arc<RwLock<Vec<ConsentRecord>>>,
    memories: Arc<RwLock<Vec<MemoryRecord>>>,
    patterns: Arc<RwLock<Vec<PatternRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The newest-activity session among `candidates`; later insertion wins ties.
fn most_recent<'a>(candidates: impl Iterator<Item = &'a Session>) -> Option<Session> {
    candidates
        .fold(None::<&Session>, |best, s| match best {
            Some(b) if b.last_activity_at > s.last_activity_at => Some(b),
            _ => Some(s),
        })
        .cloned()
}

#[async_trait]
impl TenantStore for InMemoryStore {
    async fn insert_instance(&self, instance: &UserInstance) -> Result<(), StoreError> {
        let mut instances = self.instances.write().await;
        if instances.iter().any(|i| i.instance_id == instance.instance_id) {
            return Err(StoreError::Conflict(format!(
                "instance {}",
                instance.instance_id
            )));
        }
        instances.push(instance.clone());
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<UserInstance>, StoreError> {
        Ok(self
            .instances
            .read()
            .await
            .iter()
            .find(|i| i.instance_id == instance_id)
            .cloned())
    }

    async fn update_instance_status(
        &self,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<bool, StoreError> {
        let mut instances = self.instances.write().await;
        match instances.iter_mut().find(|i| i.instance_id == instance_id) {
            Some(instance) => {
                instance.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_binding(&self, binding: &ChannelBinding) -> Result<(), StoreError> {
        let mut bindings = self.bindings.write().await;
        let taken = bindings.iter().any(|b| {
            b.channel_type == binding.channel_type
                && b.channel_org_ref == binding.channel_org_ref
                && b.channel_user_ref == binding.channel_user_ref
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "binding {}:{}:{}",
                binding.channel_type, binding.channel_org_ref, binding.channel_user_ref
            )));
        }
        bindings.push(binding.clone());
        Ok(())
    }

    async fn find_binding(
        &self,
        channel_type: &str,
        channel_org_ref: &str,
        channel_user_ref: &str,
    ) -> Result<Option<ChannelBinding>, StoreError> {
        Ok(self
            .bindings
            .read()
            .await
            .iter()
            .find(|b| {
                b.channel_type == channel_type
                    && b.channel_org_ref == channel_org_ref
                    && b.channel_user_ref == channel_user_ref
            })
            .cloned())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions.write().await.push(session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned())
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions
            .iter_mut()
            .find(|s| s.session_id == session.session_id)
        {
            existing.last_activity_at = session.last_activity_at;
            existing.status = session.status;
            existing.summary = session.summary.clone();
            existing.message_count = session.message_count;
            existing.token_count = session.token_count;
        }
        Ok(())
    }

    async fn find_active_session(
        &self,
        instance_id: &str,
        channel_type: &str,
    ) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(most_recent(sessions.iter().filter(|s| {
            s.instance_id == instance_id
                && s.channel_type == channel_type
                && s.status == SessionStatus::Active
        })))
    }

    async fn find_recent_active_session(
        &self,
        instance_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(most_recent(sessions.iter().filter(|s| {
            s.instance_id == instance_id
                && s.status == SessionStatus::Active
                && s.last_activity_at > since
        })))
    }

    async fn expire_idle_sessions(
        &self,
        cutoff: DateTime<Utc>,
        inclusive: bool,
    ) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let mut expired = 0;
        for session in sessions.iter_mut() {
            let idle = if inclusive {
                session.last_activity_at <= cutoff
            } else {
                session.last_activity_at < cutoff
            };
            if session.status == SessionStatus::Active && idle {
                session.status = SessionStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_recent_sessions(
        &self,
        instance_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<(usize, &Session)> = sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.instance_id == instance_id)
            .collect();
        matching.sort_by(|(ia, a), (ib, b)| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| ib.cmp(ia))
        });
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn insert_message(&self, message: &SessionMessage) -> Result<(), StoreError> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        include_compacted: bool,
    ) -> Result<Vec<SessionMessage>, StoreError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.session_id == session_id && (include_compacted || !m.is_compacted))
            .cloned()
            .collect())
    }

    async fn mark_compacted(&self, message_ids: &[String]) -> Result<u64, StoreError> {
        let mut messages = self.messages.write().await;
        let mut changed = 0;
        for message in messages.iter_mut() {
            if !message.is_compacted && message_ids.contains(&message.message_id) {
                message.is_compacted = true;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl ConsentStore for InMemoryStore {
    async fn get_consent(
        &self,
        instance_id: &str,
        consent_type: ConsentType,
    ) -> Result<Option<ConsentRecord>, StoreError> {
        Ok(self
            .consents
            .read()
            .await
            .iter()
            .find(|c| c.instance_id == instance_id && c.consent_type == consent_type)
            .cloned())
    }

    async fn upsert_consent(&self, record: &ConsentRecord) -> Result<(), StoreError> {
        let mut consents = self.consents.write().await;
        match consents.iter_mut().find(|c| {
            c.instance_id == record.instance_id && c.consent_type == record.consent_type
        }) {
            Some(existing) => *existing = record.clone(),
            None => consents.push(record.clone()),
        }
        Ok(())
    }

    async fn list_consents(&self, instance_id: &str) -> Result<Vec<ConsentRecord>, StoreError> {
        let mut records: Vec<ConsentRecord> = self
            .consents
            .read()
            .await
            .iter()
            .filter(|c| c.instance_id == instance_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.consent_type.as_str().cmp(b.consent_type.as_str()));
        Ok(records)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert_memory(&self, memory: &MemoryRecord) -> Result<(), StoreError> {
        self.memories.write().await.push(memory.clone());
        Ok(())
    }

    async fn get_memory(&self, memory_id: &str) -> Result<Option<MemoryRecord>, StoreError> {
        Ok(self
            .memories
            .read()
            .await
            .iter()
            .find(|m| m.memory_id == memory_id)
            .cloned())
    }

    async fn query_memories(
        &self,
        instance_id: &str,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let now = Utc::now();
        let keywords: Vec<String> = query.keywords.iter().map(|k| k.to_lowercase()).collect();
        let memories = self.memories.read().await;

        let mut results: Vec<(usize, &MemoryRecord)> = memories
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.instance_id == instance_id
                    && !m.is_deleted
                    && m.expires_at.is_none_or(|exp| exp > now)
                    && query.memory_type.is_none_or(|t| m.memory_type == t)
            })
            .filter(|(_, m)| {
                if keywords.is_empty() {
                    return true;
                }
                let content = m.content.to_lowercase();
                keywords.iter().any(|k| content.contains(k.as_str()))
            })
            .collect();

        results.sort_by(|(ia, a), (ib, b)| {
            b.updated_at.cmp(&a.updated_at).then_with(|| ib.cmp(ia))
        });
        if query.limit > 0 {
            results.truncate(query.limit);
        }

        Ok(results.into_iter().map(|(_, m)| m.clone()).collect())
    }

    async fn update_memory(&self, memory: &MemoryRecord) -> Result<(), StoreError> {
        let mut memories = self.memories.write().await;
        if let Some(existing) = memories
            .iter_mut()
            .find(|m| m.memory_id == memory.memory_id)
        {
            *existing = memory.clone();
        }
        Ok(())
    }

    async fn record_access(&self, memory_id: &str) -> Result<(), StoreError> {
        let mut memories = self.memories.write().await;
        if let Some(memory) = memories.iter_mut().find(|m| m.memory_id == memory_id) {
            memory.access_count = memory.access_count.saturating_add(1);
            memory.last_accessed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn soft_delete_memory(&self, memory_id: &str) -> Result<bool, StoreError> {
        let mut memories = self.memories.write().await;
        match memories
            .iter_mut()
            .find(|m| m.memory_id == memory_id && !m.is_deleted)
        {
            Some(memory) => {
                memory.is_deleted = true;
                memory.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn soft_delete_all_memories(&self, instance_id: &str) -> Result<u64, StoreError> {
        let mut memories = self.memories.write().await;
        let now = Utc::now();
        let mut deleted = 0;
        for memory in memories
            .iter_mut()
            .filter(|m| m.instance_id == instance_id && !m.is_deleted)
        {
            memory.is_deleted = true;
            memory.updated_at = now;
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn delete_expired_memories(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut memories = self.memories.write().await;
        let before = memories.len();
        memories.retain(|m| m.expires_at.is_none_or(|exp| exp >= now));
        Ok((before - memories.len()) as u64)
    }
}

#[async_trait]
impl PatternStore for InMemoryStore {
    async fn insert_pattern(&self, record: &PatternRecord) -> Result<(), StoreError> {
        self.patterns.write().await.push(record.clone());
        Ok(())
    }

    async fn list_patterns(&self, org_id: &str) -> Result<Vec<PatternRecord>, StoreError> {
        Ok(self
            .patterns
            .read()
            .await
            .iter()
            .filter(|p| p.org_id == org_id)
            .cloned()
            .collect())
    }
}

impl RecordStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use orgclaw_core::memory::MemoryType;

    #[tokio::test]
    async fn duplicate_binding_is_a_conflict() {
        let store = InMemoryStore::new();
        let inst = UserInstance::new("u-1", "acme", "ops", "operations");
        let binding = ChannelBinding::for_instance(&inst, "slack", "T1", "U1");
        store.insert_binding(&binding).await.unwrap();
        let err = store.insert_binding(&binding).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn active_lookup_ignores_terminal_sessions() {
        let store = InMemoryStore::new();
        let mut closed = Session::new("inst-1", "slack", None);
        closed.status = SessionStatus::Closed;
        store.insert_session(&closed).await.unwrap();
        assert!(
            store
                .find_active_session("inst-1", "slack")
                .await
                .unwrap()
                .is_none()
        );

        let open = Session::new("inst-1", "slack", None);
        store.insert_session(&open).await.unwrap();
        let found = store
            .find_active_session("inst-1", "slack")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, open.session_id);
    }

    #[tokio::test]
    async fn inclusive_expiry_catches_equal_timestamps() {
        let store = InMemoryStore::new();
        let session = Session::new("inst-1", "slack", None);
        let cutoff = session.last_activity_at;
        store.insert_session(&session).await.unwrap();

        assert_eq!(store.expire_idle_sessions(cutoff, false).await.unwrap(), 0);
        assert_eq!(store.expire_idle_sessions(cutoff, true).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_recent_sessions_orders_by_activity() {
        let store = InMemoryStore::new();
        let mut old = Session::new("inst-1", "email", None);
        old.last_activity_at = Utc::now() - Duration::hours(2);
        let new = Session::new("inst-1", "slack", None);
        store.insert_session(&new).await.unwrap();
        store.insert_session(&old).await.unwrap();

        let listed = store.list_recent_sessions("inst-1", 5).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, new.session_id);

        let limited = store.list_recent_sessions("inst-1", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn memory_keyword_filter_is_case_insensitive() {
        let store = InMemoryStore::new();
        let mem = MemoryRecord::new("inst-1", MemoryType::Fact, "Quarterly REVIEW is in May");
        store.insert_memory(&mem).await.unwrap();

        let query = MemoryQuery {
            keywords: vec!["review".into()],
            limit: 5,
            ..Default::default()
        };
        assert_eq!(store.query_memories("inst-1", &query).await.unwrap().len(), 1);
        assert!(store.query_memories("inst-2", &query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn soft_delete_all_hides_memories() {
        let store = InMemoryStore::new();
        for content in ["one fact", "another fact"] {
            let mem = MemoryRecord::new("inst-1", MemoryType::Fact, content);
            store.insert_memory(&mem).await.unwrap();
        }
        assert_eq!(store.soft_delete_all_memories("inst-1").await.unwrap(), 2);
        let all = store
            .query_memories("inst-1", &MemoryQuery::default())
            .await
            .unwrap();
        assert!(all.is_empty());
    }
}
