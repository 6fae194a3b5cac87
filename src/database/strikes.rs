//! Strike Repository - PostgreSQL persistence for strike records
//!
//! `apply` runs insert-if-missing, row lock, state transition and update in
//! a single transaction, so two evaluations of the same member serialise on
//! the row lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info};

use crate::database::store::StrikeStore;
use crate::error::StoreError;
use crate::reputation::{
    ImmunityThresholds, LedgerOp, LedgerUpdate, MemberKey, StrikeRecord, ViolationEntry,
};

const RECORD_COLUMNS: &str = "community_id, user_id, violation_count, window_reset_at, positive_points, \
     immunity_tier, last_positive_update, last_violation_at, last_weekly_bonus_at, history, \
     created_at, updated_at";

#[derive(Clone)]
pub struct StrikeRepository {
    pool: PgPool,
}

impl StrikeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation.strike_records (
                community_id VARCHAR(64) NOT NULL,
                user_id VARCHAR(64) NOT NULL,
                violation_count INTEGER NOT NULL DEFAULT 0,
                window_reset_at TIMESTAMP WITH TIME ZONE NOT NULL,
                positive_points BIGINT NOT NULL DEFAULT 0,
                immunity_tier VARCHAR(16) NOT NULL DEFAULT 'none',
                last_positive_update TIMESTAMP WITH TIME ZONE,
                last_violation_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL,
                PRIMARY KEY (community_id, user_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_strike_records_cleanup \
             ON moderation.strike_records(window_reset_at) WHERE positive_points = 0",
        )
        .execute(&self.pool)
        .await?;

        // Columns added after the first release
        sqlx::query(
            "ALTER TABLE moderation.strike_records \
             ADD COLUMN IF NOT EXISTS last_weekly_bonus_at TIMESTAMP WITH TIME ZONE, \
             ADD COLUMN IF NOT EXISTS history JSONB NOT NULL DEFAULT '[]'::jsonb",
        )
        .execute(&self.pool)
        .await?;

        info!("Strike records table ready");
        Ok(())
    }

    fn from_row(row: &PgRow) -> Result<StrikeRecord, StoreError> {
        let community_id: String = row.try_get("community_id")?;
        let user_id: String = row.try_get("user_id")?;
        let corrupt = |detail: String| StoreError::Corrupt {
            key: format!("{community_id}:{user_id}"),
            detail,
        };

        let violation_count: i32 = row.try_get("violation_count")?;
        let positive_points: i64 = row.try_get("positive_points")?;
        let tier: String = row.try_get("immunity_tier")?;
        let Json(history): Json<Vec<ViolationEntry>> = row.try_get("history")?;

        Ok(StrikeRecord {
            violation_count: u32::try_from(violation_count)
                .map_err(|_| corrupt(format!("negative violation count {violation_count}")))?,
            window_reset_at: row.try_get("window_reset_at")?,
            positive_points: u64::try_from(positive_points)
                .map_err(|_| corrupt(format!("negative points {positive_points}")))?,
            immunity_tier: tier.parse().map_err(corrupt)?,
            last_positive_update: row.try_get("last_positive_update")?,
            last_violation_at: row.try_get("last_violation_at")?,
            last_weekly_bonus_at: row.try_get("last_weekly_bonus_at")?,
            history,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            community_id,
            user_id,
        })
    }
}

#[async_trait]
impl StrikeStore for StrikeRepository {
    async fn get(&self, key: &MemberKey) -> Result<Option<StrikeRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM moderation.strike_records WHERE community_id = $1 AND user_id = $2"
        ))
        .bind(key.community_id())
        .bind(key.user_id())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn apply(
        &self,
        key: &MemberKey,
        op: &LedgerOp,
        tiers: &ImmunityThresholds,
    ) -> Result<LedgerUpdate, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO moderation.strike_records
                (community_id, user_id, violation_count, window_reset_at, positive_points,
                 immunity_tier, created_at, updated_at)
            VALUES ($1, $2, 0, $3, 0, 'none', $3, $3)
            ON CONFLICT (community_id, user_id) DO NOTHING
        "#,
        )
        .bind(key.community_id())
        .bind(key.user_id())
        .bind(op.at())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM moderation.strike_records \
             WHERE community_id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(key.community_id())
        .bind(key.user_id())
        .fetch_one(&mut *tx)
        .await?;

        let mut record = Self::from_row(&row)?;
        let update = record.transition(op, tiers);
        let saved = &update.record;

        sqlx::query(
            r#"
            UPDATE moderation.strike_records SET
                violation_count = $3,
                window_reset_at = $4,
                positive_points = $5,
                immunity_tier = $6,
                last_positive_update = $7,
                last_violation_at = $8,
                last_weekly_bonus_at = $9,
                history = $10,
                updated_at = $11
            WHERE community_id = $1 AND user_id = $2
        "#,
        )
        .bind(key.community_id())
        .bind(key.user_id())
        .bind(i32::try_from(saved.violation_count).unwrap_or(i32::MAX))
        .bind(saved.window_reset_at)
        .bind(i64::try_from(saved.positive_points).unwrap_or(i64::MAX))
        .bind(saved.immunity_tier.as_str())
        .bind(saved.last_positive_update)
        .bind(saved.last_violation_at)
        .bind(saved.last_weekly_bonus_at)
        .bind(Json(&saved.history))
        .bind(saved.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(member = %key, outcome = ?update.outcome, "Strike record updated");
        Ok(update)
    }

    async fn list(&self, community_id: &str) -> Result<Vec<StrikeRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM moderation.strike_records WHERE community_id = $1"
        ))
        .bind(community_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM moderation.strike_records WHERE window_reset_at <= $1 AND positive_points = 0",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
