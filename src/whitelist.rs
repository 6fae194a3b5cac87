//! Whitelist Guard
//!
//! Exempt members skip analysis entirely. Entries are permanent or carry an
//! expiry; an expired entry is treated as absent without being deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::WhitelistStore;
use crate::error::{ModerationError, ModerationResult};
use crate::reputation::{validate_id, MemberKey};

const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub community_id: String,
    pub user_id: String,
    pub reason: Option<String>,
    pub granted_by: String,
    pub created_at: DateTime<Utc>,
    /// `None` means permanent
    pub expires_at: Option<DateTime<Utc>>,
}

impl WhitelistEntry {
    /// Active while there is no expiry or the expiry is still ahead of `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| expiry > now)
    }

    pub fn key(&self) -> MemberKey {
        MemberKey::from_stored(&self.community_id, &self.user_id)
    }
}

/// Result of an admin add
#[derive(Debug, Clone, Serialize)]
pub struct WhitelistChange {
    pub entry: WhitelistEntry,
    /// false when an existing entry was replaced
    pub inserted: bool,
}

#[derive(Clone)]
pub struct WhitelistGuard {
    store: Arc<dyn WhitelistStore>,
}

impl WhitelistGuard {
    pub fn new(store: Arc<dyn WhitelistStore>) -> Self {
        Self { store }
    }

    pub async fn is_exempt(&self, key: &MemberKey, now: DateTime<Utc>) -> ModerationResult<bool> {
        Ok(self.active_entry(key, now).await?.is_some())
    }

    pub async fn active_entry(
        &self,
        key: &MemberKey,
        now: DateTime<Utc>,
    ) -> ModerationResult<Option<WhitelistEntry>> {
        let entry = self.store.get(key).await?;
        Ok(entry.filter(|e| e.is_active(now)))
    }

    /// Create or replace the entry for `key`
    pub async fn add(
        &self,
        key: &MemberKey,
        reason: Option<String>,
        granted_by: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ModerationResult<WhitelistChange> {
        validate_id("granter id", granted_by)?;
        if let Some(expiry) = expires_at {
            if expiry <= now {
                return Err(ModerationError::Validation(format!(
                    "whitelist expiry {expiry} is not in the future"
                )));
            }
        }
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        if reason.as_ref().is_some_and(|r| r.chars().count() > MAX_REASON_LEN) {
            return Err(ModerationError::Validation(format!(
                "whitelist reason exceeds {MAX_REASON_LEN} characters"
            )));
        }

        let entry = WhitelistEntry {
            community_id: key.community_id().to_string(),
            user_id: key.user_id().to_string(),
            reason,
            granted_by: granted_by.to_string(),
            created_at: now,
            expires_at,
        };
        let inserted = self.store.upsert(&entry).await?;

        info!(
            member = %key,
            granted_by = %granted_by,
            expires_at = ?expires_at,
            inserted = inserted,
            "Whitelist entry saved"
        );

        Ok(WhitelistChange { entry, inserted })
    }

    pub async fn remove(&self, key: &MemberKey) -> ModerationResult<bool> {
        let removed = self.store.remove(key).await?;
        debug!(member = %key, removed = removed, "Whitelist removal");
        Ok(removed)
    }

    /// Active entries of a community, oldest first
    pub async fn list(&self, community_id: &str, now: DateTime<Utc>) -> ModerationResult<Vec<WhitelistEntry>> {
        validate_id("community id", community_id)?;
        let mut entries: Vec<WhitelistEntry> = self
            .store
            .list(community_id)
            .await?
            .into_iter()
            .filter(|e| e.is_active(now))
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(entries)
    }

    pub async fn count(&self, community_id: &str, now: DateTime<Utc>) -> ModerationResult<usize> {
        Ok(self.list(community_id, now).await?.len())
    }
}
