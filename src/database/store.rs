//! Persistence seams for the ledger and the whitelist

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::reputation::{ImmunityThresholds, LedgerOp, LedgerUpdate, MemberKey, StrikeRecord};
use crate::whitelist::WhitelistEntry;

#[async_trait]
pub trait StrikeStore: Send + Sync {
    async fn get(&self, key: &MemberKey) -> Result<Option<StrikeRecord>, StoreError>;

    /// Load-or-create the record for `key` and apply `op` to it atomically.
    /// Concurrent calls for the same key must serialise.
    async fn apply(
        &self,
        key: &MemberKey,
        op: &LedgerOp,
        tiers: &ImmunityThresholds,
    ) -> Result<LedgerUpdate, StoreError>;

    async fn list(&self, community_id: &str) -> Result<Vec<StrikeRecord>, StoreError>;

    /// Delete records with no points whose window ended at or before `cutoff`
    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait WhitelistStore: Send + Sync {
    async fn get(&self, key: &MemberKey) -> Result<Option<WhitelistEntry>, StoreError>;

    /// Returns true when a new entry was created, false when one was replaced
    async fn upsert(&self, entry: &WhitelistEntry) -> Result<bool, StoreError>;

    async fn remove(&self, key: &MemberKey) -> Result<bool, StoreError>;

    /// All entries of a community, expired ones included
    async fn list(&self, community_id: &str) -> Result<Vec<WhitelistEntry>, StoreError>;
}
