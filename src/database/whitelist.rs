//! Whitelist Repository - PostgreSQL persistence for whitelist entries

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::info;

use crate::database::store::WhitelistStore;
use crate::error::StoreError;
use crate::reputation::MemberKey;
use crate::whitelist::WhitelistEntry;

#[derive(Clone)]
pub struct WhitelistRepository {
    pool: PgPool,
}

impl WhitelistRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation.whitelist (
                community_id VARCHAR(64) NOT NULL,
                user_id VARCHAR(64) NOT NULL,
                reason TEXT,
                granted_by VARCHAR(64) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                expires_at TIMESTAMP WITH TIME ZONE,
                PRIMARY KEY (community_id, user_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Whitelist table ready");
        Ok(())
    }

    fn from_row(row: &PgRow) -> Result<WhitelistEntry, StoreError> {
        Ok(WhitelistEntry {
            community_id: row.try_get("community_id")?,
            user_id: row.try_get("user_id")?,
            reason: row.try_get("reason")?,
            granted_by: row.try_get("granted_by")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl WhitelistStore for WhitelistRepository {
    async fn get(&self, key: &MemberKey) -> Result<Option<WhitelistEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT community_id, user_id, reason, granted_by, created_at, expires_at
            FROM moderation.whitelist
            WHERE community_id = $1 AND user_id = $2
        "#,
        )
        .bind(key.community_id())
        .bind(key.user_id())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn upsert(&self, entry: &WhitelistEntry) -> Result<bool, StoreError> {
        // xmax is zero only for a freshly inserted row version
        let row = sqlx::query(
            r#"
            INSERT INTO moderation.whitelist
                (community_id, user_id, reason, granted_by, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (community_id, user_id) DO UPDATE SET
                reason = EXCLUDED.reason,
                granted_by = EXCLUDED.granted_by,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            RETURNING (xmax = 0) AS inserted
        "#,
        )
        .bind(&entry.community_id)
        .bind(&entry.user_id)
        .bind(&entry.reason)
        .bind(&entry.granted_by)
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("inserted")?)
    }

    async fn remove(&self, key: &MemberKey) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM moderation.whitelist WHERE community_id = $1 AND user_id = $2")
            .bind(key.community_id())
            .bind(key.user_id())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, community_id: &str) -> Result<Vec<WhitelistEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT community_id, user_id, reason, granted_by, created_at, expires_at
            FROM moderation.whitelist
            WHERE community_id = $1
            ORDER BY created_at
        "#,
        )
        .bind(community_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }
}
