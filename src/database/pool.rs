//! Database Connection Pool using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::info;

use crate::database::store::{StrikeStore, WhitelistStore};
use crate::database::strikes::StrikeRepository;
use crate::database::whitelist::WhitelistRepository;
use crate::error::StoreError;

pub struct DatabasePool {
    pool: PgPool,
    strikes: StrikeRepository,
    whitelist: WhitelistRepository,
}

impl DatabasePool {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;

        info!(max_connections = max_connections, "Connected to PostgreSQL");

        let strikes = StrikeRepository::new(pool.clone());
        let whitelist = WhitelistRepository::new(pool.clone());

        Ok(Self {
            pool,
            strikes,
            whitelist,
        })
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        info!("Initializing database schema...");

        sqlx::query("CREATE SCHEMA IF NOT EXISTS moderation")
            .execute(&self.pool)
            .await?;

        self.strikes.init_schema().await?;
        self.whitelist.init_schema().await?;

        info!("Database schema initialized");
        Ok(())
    }

    pub fn strikes(&self) -> &StrikeRepository {
        &self.strikes
    }

    pub fn whitelist(&self) -> &WhitelistRepository {
        &self.whitelist
    }

    pub fn strike_store(&self) -> Arc<dyn StrikeStore> {
        Arc::new(self.strikes.clone())
    }

    pub fn whitelist_store(&self) -> Arc<dyn WhitelistStore> {
        Arc::new(self.whitelist.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
