//! Consent enforcement.
//!
//! A missing record means "not granted". Withdrawal keeps the record and
//! only flips it, so the grant history survives for audit.

use std::sync::Arc;

use chrono::Utc;
use orgclaw_core::consent::{ConsentRecord, ConsentType};
use orgclaw_core::error::ConsentError;
use orgclaw_core::store::ConsentStore;
use tracing::info;

const DEFAULT_CONSENT_VERSION: &str = "1.0";

pub struct ConsentManager {
    store: Arc<dyn ConsentStore>,
}

impl ConsentManager {
    pub fn new(store: Arc<dyn ConsentStore>) -> Self {
        Self { store }
    }

    /// Grant (or re-grant) consent. `version` defaults to `1.0`.
    pub async fn grant(
        &self,
        instance_id: &str,
        consent_type: ConsentType,
        version: Option<&str>,
    ) -> Result<ConsentRecord, ConsentError> {
        let record = ConsentRecord {
            instance_id: instance_id.to_string(),
            consent_type,
            granted: true,
            granted_at: Some(Utc::now()),
            withdrawn_at: None,
            version: version.unwrap_or(DEFAULT_CONSENT_VERSION).to_string(),
        };
        self.store.upsert_consent(&record).await?;
        info!(instance_id, consent_type = %consent_type, version = %record.version, "Consent granted");
        Ok(record)
    }

    /// Withdraw consent, keeping when and which version was granted.
    pub async fn withdraw(
        &self,
        instance_id: &str,
        consent_type: ConsentType,
    ) -> Result<ConsentRecord, ConsentError> {
        let existing = self.store.get_consent(instance_id, consent_type).await?;
        let record = ConsentRecord {
            instance_id: instance_id.to_string(),
            consent_type,
            granted: false,
            granted_at: existing.as_ref().and_then(|r| r.granted_at),
            withdrawn_at: Some(Utc::now()),
            version: existing
                .map(|r| r.version)
                .unwrap_or_else(|| DEFAULT_CONSENT_VERSION.to_string()),
        };
        self.store.upsert_consent(&record).await?;
        info!(instance_id, consent_type = %consent_type, "Consent withdrawn");
        Ok(record)
    }

    pub async fn has_consent(
        &self,
        instance_id: &str,
        consent_type: ConsentType,
    ) -> Result<bool, ConsentError> {
        Ok(self
            .store
            .get_consent(instance_id, consent_type)
            .await?
            .is_some_and(|r| r.granted))
    }

    pub async fn list(&self, instance_id: &str) -> Result<Vec<ConsentRecord>, ConsentError> {
        Ok(self.store.list_consents(instance_id).await?)
    }

    /// Fails with [`ConsentError::Required`] unless consent is granted.
    pub async fn require(
        &self,
        instance_id: &str,
        consent_type: ConsentType,
    ) -> Result<(), ConsentError> {
        if self.has_consent(instance_id, consent_type).await? {
            Ok(())
        } else {
            Err(ConsentError::Required {
                instance_id: instance_id.to_string(),
                consent_type: consent_type.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgclaw_store::InMemoryStore;

    fn manager() -> ConsentManager {
        ConsentManager::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn absent_record_is_not_granted() {
        let mgr = manager();
        assert!(!mgr.has_consent("inst-1", ConsentType::DataProcessing).await.unwrap());
        assert!(matches!(
            mgr.require("inst-1", ConsentType::DataProcessing).await,
            Err(ConsentError::Required { .. })
        ));
    }

    #[tokio::test]
    async fn grant_then_withdraw_keeps_record() {
        let mgr = manager();
        let granted = mgr
            .grant("inst-1", ConsentType::MemoryStorage, Some("2.0"))
            .await
            .unwrap();
        assert!(mgr.has_consent("inst-1", ConsentType::MemoryStorage).await.unwrap());
        mgr.require("inst-1", ConsentType::MemoryStorage).await.unwrap();

        let withdrawn = mgr.withdraw("inst-1", ConsentType::MemoryStorage).await.unwrap();
        assert!(!withdrawn.granted);
        assert_eq!(withdrawn.granted_at, granted.granted_at);
        assert_eq!(withdrawn.version, "2.0");
        assert!(withdrawn.withdrawn_at.is_some());
        assert!(!mgr.has_consent("inst-1", ConsentType::MemoryStorage).await.unwrap());

        let all = mgr.list("inst-1").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn regrant_clears_withdrawal() {
        let mgr = manager();
        mgr.withdraw("inst-1", ConsentType::PatternCollection).await.unwrap();
        let rec = mgr
            .grant("inst-1", ConsentType::PatternCollection, None)
            .await
            .unwrap();
        assert!(rec.withdrawn_at.is_none());
        assert_eq!(rec.version, "1.0");
        assert!(mgr.has_consent("inst-1", ConsentType::PatternCollection).await.unwrap());
    }

    #[tokio::test]
    async fn consent_is_per_type() {
        let mgr = manager();
        mgr.grant("inst-1", ConsentType::DataProcessing, None).await.unwrap();
        assert!(!mgr.has_consent("inst-1", ConsentType::PatternCollection).await.unwrap());
        assert!(!mgr.has_consent("inst-2", ConsentType::DataProcessing).await.unwrap());
    }
}
