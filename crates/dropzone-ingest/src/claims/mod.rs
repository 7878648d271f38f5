//! Persistent deduplication of remote files
//!
//! A claim marks a remote path as taken for processing. It is written before
//! the file is fetched and never released, so a file whose parse fails is
//! still "seen" and will not be fetched again.
//!
//! # Implementations
//!
//! - [`SqliteClaimStore`]: durable, survives restarts (production)
//! - [`MemoryClaimStore`]: process-local, for tests and throwaway runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

mod memory;
mod sqlite;

pub use memory::MemoryClaimStore;
pub use sqlite::SqliteClaimStore;

/// URL value selecting the in-memory store
pub const MEMORY_STORE_URL: &str = "memory";

/// A path that has been claimed for processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub path: String,
    pub claimed_at: DateTime<Utc>,
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Record a claim for `path` if none exists
    ///
    /// Returns `Ok(true)` for exactly one caller per path, across concurrent
    /// callers and across process restarts. An unreachable store is an
    /// `Err(ClaimStoreUnavailable)`, never `Ok(false)`.
    async fn try_claim(&self, path: &str) -> Result<bool>;

    /// Look up an existing claim
    async fn claim_record(&self, path: &str) -> Result<Option<ClaimRecord>>;

    /// Verify the store can be reached before a cycle starts claiming
    async fn health_check(&self) -> Result<()>;
}

/// Open the store selected by `url`: `memory` or a `sqlite:` URL
pub async fn connect(url: &str) -> anyhow::Result<Arc<dyn ClaimStore>> {
    if url.eq_ignore_ascii_case(MEMORY_STORE_URL) {
        tracing::warn!("Using in-memory claim store; claims will not survive a restart");
        return Ok(Arc::new(MemoryClaimStore::new()));
    }

    if url.starts_with("sqlite:") {
        let store = SqliteClaimStore::connect(url).await?;
        return Ok(Arc::new(store));
    }

    anyhow::bail!("Unsupported claim store URL '{}': expected 'memory' or 'sqlite:...'", url)
}
