//! In-process store backed by `DashMap`
//!
//! Per-key atomicity comes from the shard write lock held by a `DashMap`
//! entry for the duration of the read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::database::store::{StrikeStore, WhitelistStore};
use crate::error::StoreError;
use crate::reputation::{ImmunityThresholds, LedgerOp, LedgerUpdate, MemberKey, StrikeRecord};
use crate::whitelist::WhitelistEntry;

#[derive(Default)]
pub struct MemoryStore {
    strikes: DashMap<MemberKey, StrikeRecord>,
    whitelist: DashMap<MemberKey, WhitelistEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.strikes.len()
    }
}

#[async_trait]
impl StrikeStore for MemoryStore {
    async fn get(&self, key: &MemberKey) -> Result<Option<StrikeRecord>, StoreError> {
        Ok(self.strikes.get(key).map(|r| r.value().clone()))
    }

    async fn apply(
        &self,
        key: &MemberKey,
        op: &LedgerOp,
        tiers: &ImmunityThresholds,
    ) -> Result<LedgerUpdate, StoreError> {
        let mut record = self
            .strikes
            .entry(key.clone())
            .or_insert_with(|| StrikeRecord::new(key, op.at()));
        Ok(record.transition(op, tiers))
    }

    async fn list(&self, community_id: &str) -> Result<Vec<StrikeRecord>, StoreError> {
        Ok(self
            .strikes
            .iter()
            .filter(|r| r.community_id == community_id)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        self.strikes.retain(|_, record| {
            let expired = record.window_reset_at <= cutoff && record.positive_points == 0;
            if expired {
                removed += 1;
            }
            !expired
        });
        Ok(removed)
    }
}

#[async_trait]
impl WhitelistStore for MemoryStore {
    async fn get(&self, key: &MemberKey) -> Result<Option<WhitelistEntry>, StoreError> {
        Ok(self.whitelist.get(key).map(|e| e.value().clone()))
    }

    async fn upsert(&self, entry: &WhitelistEntry) -> Result<bool, StoreError> {
        Ok(self.whitelist.insert(entry.key(), entry.clone()).is_none())
    }

    async fn remove(&self, key: &MemberKey) -> Result<bool, StoreError> {
        Ok(self.whitelist.remove(key).is_some())
    }

    async fn list(&self, community_id: &str) -> Result<Vec<WhitelistEntry>, StoreError> {
        Ok(self
            .whitelist
            .iter()
            .filter(|e| e.community_id == community_id)
            .map(|e| e.value().clone())
            .collect())
    }
}
