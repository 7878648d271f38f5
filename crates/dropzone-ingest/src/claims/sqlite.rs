//! SQLite-backed claim store
//!
//! One row per claimed path. The claim is a single
//! `INSERT ... ON CONFLICT DO NOTHING`, so SQLite's write lock decides the
//! race: exactly one insert affects a row.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{ClaimRecord, ClaimStore};
use crate::error::Result;

const MAX_CONNECTIONS: u32 = 4;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqliteClaimStore {
    pool: SqlitePool,
}

impl SqliteClaimStore {
    /// Open (creating if needed) the database at `url` and apply migrations
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid claim store URL: {}", url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT);

        // Every connection to an in-memory database sees its own empty database
        if url.contains(":memory:") || url.contains("mode=memory") {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open claim store at {}", url))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run claim store migrations")?;

        info!(url = %url, "Claim store ready");
        Ok(Self { pool })
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ClaimStore for SqliteClaimStore {
    async fn try_claim(&self, path: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO claims (path, claimed_at) VALUES (?1, ?2) ON CONFLICT(path) DO NOTHING",
        )
        .bind(path)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        debug!(path = %path, claimed, "Claim attempt");
        Ok(claimed)
    }

    async fn claim_record(&self, path: &str) -> Result<Option<ClaimRecord>> {
        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT path, claimed_at FROM claims WHERE path = ?1")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(path, claimed_at)| ClaimRecord { path, claimed_at }))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
