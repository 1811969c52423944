//! Tenant resolution: maps a channel identity onto a user instance.

use std::sync::Arc;

use orgclaw_core::error::StoreError;
use orgclaw_core::store::TenantStore;
use orgclaw_core::tenant::UserInstance;
use tracing::{debug, warn};

/// The parsed form of `{channel}:{org_ref}:{user_ref...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey {
    pub channel: String,
    pub org_ref: String,
    /// Everything after the second colon, further colons included
    pub user_ref: String,
}

/// Split a routing key into its three parts.
///
/// Returns `None` when the key has fewer than three segments.
pub fn parse_routing_key(key: &str) -> Option<RoutingKey> {
    let mut parts = key.splitn(3, ':');
    let channel = parts.next()?;
    let org_ref = parts.next()?;
    let user_ref = parts.next()?;

    Some(RoutingKey {
        channel: channel.to_string(),
        org_ref: org_ref.to_string(),
        user_ref: user_ref.to_string(),
    })
}

/// Looks up the instance bound to a channel identity. Read-only.
pub struct TenantResolver {
    store: Arc<dyn TenantStore>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self { store }
    }

    /// Exact-triple lookup.
    ///
    /// A missing binding is `Ok(None)`. A binding pointing at a missing
    /// instance is a data-integrity anomaly: it is logged and also yields
    /// `Ok(None)`.
    pub async fn resolve_user_instance(
        &self,
        channel_type: &str,
        org_ref: &str,
        user_ref: &str,
    ) -> Result<Option<UserInstance>, StoreError> {
        let Some(binding) = self
            .store
            .find_binding(channel_type, org_ref, user_ref)
            .await?
        else {
            debug!(channel_type, org_ref, user_ref, "No channel binding");
            return Ok(None);
        };

        let instance = self.store.get_instance(&binding.instance_id).await?;
        if instance.is_none() {
            warn!(
                instance_id = %binding.instance_id,
                channel_type,
                org_ref,
                user_ref,
                "Channel binding references a missing instance"
            );
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgclaw_core::tenant::ChannelBinding;
    use orgclaw_store::InMemoryStore;

    #[test]
    fn parses_three_segments() {
        let key = parse_routing_key("slack:T123:U456").unwrap();
        assert_eq!(key.channel, "slack");
        assert_eq!(key.org_ref, "T123");
        assert_eq!(key.user_ref, "U456");
    }

    #[test]
    fn user_ref_keeps_extra_colons() {
        let key = parse_routing_key("slack:T1:U1:thread:42").unwrap();
        assert_eq!(key.user_ref, "U1:thread:42");
    }

    #[test]
    fn too_few_segments_is_none() {
        assert!(parse_routing_key("slack:T1").is_none());
        assert!(parse_routing_key("slack").is_none());
        assert!(parse_routing_key("").is_none());
    }

    #[tokio::test]
    async fn resolves_bound_identity() {
        let store = Arc::new(InMemoryStore::new());
        let inst = UserInstance::new("alice", "acme", "ops", "operations");
        store.insert_instance(&inst).await.unwrap();
        store
            .insert_binding(&ChannelBinding::for_instance(&inst, "slack", "T1", "U1"))
            .await
            .unwrap();

        let resolver = TenantResolver::new(store);
        let found = resolver
            .resolve_user_instance("slack", "T1", "U1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.instance_id, inst.instance_id);
    }

    #[tokio::test]
    async fn unbound_identity_is_none() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = TenantResolver::new(store);
        assert!(
            resolver
                .resolve_user_instance("slack", "T1", "nobody")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn dangling_binding_is_none() {
        let store = Arc::new(InMemoryStore::new());
        let ghost = UserInstance::new("ghost", "acme", "ops", "operations");
        store
            .insert_binding(&ChannelBinding::for_instance(&ghost, "teams", "acme", "g1"))
            .await
            .unwrap();

        let resolver = TenantResolver::new(store);
        assert!(
            resolver
                .resolve_user_instance("teams", "acme", "g1")
                .await
                .unwrap()
                .is_none()
        );
    }
}
