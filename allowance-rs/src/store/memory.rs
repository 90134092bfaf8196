use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::QuotaStore;
use crate::error::{AllowanceError, Result};
use crate::quota::ParticipationQuota;

/// In-memory quota store
#[derive(Clone, Default)]
pub struct MemoryQuotaStore {
    quotas: Arc<RwLock<HashMap<String, ParticipationQuota>>>,
}

impl MemoryQuotaStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get quota count
    pub async fn quota_count(&self) -> usize {
        let quotas = self.quotas.read().await;
        quotas.len()
    }
}

fn check_version(
    quotas: &HashMap<String, ParticipationQuota>,
    quota: &ParticipationQuota,
) -> Result<()> {
    let stored = quotas
        .get(quota.participant_id())
        .map_or(0, ParticipationQuota::version);

    if stored != quota.version() {
        return Err(AllowanceError::Conflict {
            participant_id: quota.participant_id().to_string(),
        });
    }

    Ok(())
}

fn saved_copy(quota: &ParticipationQuota) -> ParticipationQuota {
    let mut saved = quota.clone();
    saved.mark_saved();
    saved
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load(&self, participant_id: &str) -> Result<Option<ParticipationQuota>> {
        let quotas = self.quotas.read().await;
        Ok(quotas.get(participant_id).cloned())
    }

    async fn save(&self, quota: &ParticipationQuota) -> Result<()> {
        let mut quotas = self.quotas.write().await;
        check_version(&quotas, quota)?;
        quotas.insert(quota.participant_id().to_string(), saved_copy(quota));
        Ok(())
    }

    async fn save_all(&self, batch: &[ParticipationQuota]) -> Result<()> {
        let mut quotas = self.quotas.write().await;
        for quota in batch {
            check_version(&quotas, quota)?;
        }
        for quota in batch {
            quotas.insert(quota.participant_id().to_string(), saved_copy(quota));
        }
        Ok(())
    }

    async fn delete(&self, participant_id: &str) -> Result<bool> {
        let mut quotas = self.quotas.write().await;
        Ok(quotas.remove(participant_id).is_some())
    }

    async fn list(&self) -> Result<Vec<ParticipationQuota>> {
        let quotas = self.quotas.read().await;
        let mut all: Vec<_> = quotas.values().cloned().collect();
        all.sort_by(|a, b| a.participant_id().cmp(b.participant_id()));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_new() {
        let store = MemoryQuotaStore::new();
        assert_eq!(store.quota_count().await, 0);
        assert!(store.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryQuotaStore::new();
        let quota = ParticipationQuota::with_allowance("alice", 3);

        store.save(&quota).await.unwrap();

        let loaded = store.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded, quota.with_version(1));
        assert_eq!(store.quota_count().await, 1);
    }

    #[tokio::test]
    async fn test_save_requires_current_version() {
        let store = MemoryQuotaStore::new();
        store
            .save(&ParticipationQuota::with_allowance("alice", 3))
            .await
            .unwrap();

        // A second fresh copy is stale
        let err = store
            .save(&ParticipationQuota::with_allowance("alice", 1))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let loaded = store.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded.allowance_left(), 3);

        // The loaded copy is current
        store.save(&loaded).await.unwrap();
        assert_eq!(store.load("alice").await.unwrap().unwrap().version(), 2);
        assert!(store.save(&loaded).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_save_all_and_list_sorted() {
        let store = MemoryQuotaStore::new();
        store
            .save_all(&[
                ParticipationQuota::new("carol"),
                ParticipationQuota::new("alice"),
                ParticipationQuota::new("bob"),
            ])
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.participant_id().to_string())
            .collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_save_all_is_all_or_nothing() {
        let store = MemoryQuotaStore::new();
        store.save(&ParticipationQuota::new("alice")).await.unwrap();

        let err = store
            .save_all(&[ParticipationQuota::new("bob"), ParticipationQuota::new("alice")])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.load("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryQuotaStore::new();
        store.save(&ParticipationQuota::new("alice")).await.unwrap();

        assert!(store.delete("alice").await.unwrap());
        assert!(!store.delete("alice").await.unwrap());
        assert!(store.load("alice").await.unwrap().is_none());
    }
}
