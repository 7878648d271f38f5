//! In-memory claim store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ClaimRecord, ClaimStore};
use crate::error::{IngestError, Result};

/// Claim store held in process memory
///
/// Atomic within one process. Claims are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryClaimStore {
    claims: Mutex<HashMap<String, ClaimRecord>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.claims.lock().map(|claims| claims.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn try_claim(&self, path: &str) -> Result<bool> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|_| IngestError::claim_store("claim map lock poisoned"))?;

        if claims.contains_key(path) {
            return Ok(false);
        }

        claims.insert(
            path.to_string(),
            ClaimRecord {
                path: path.to_string(),
                claimed_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn claim_record(&self, path: &str) -> Result<Option<ClaimRecord>> {
        let claims = self
            .claims
            .lock()
            .map_err(|_| IngestError::claim_store("claim map lock poisoned"))?;
        Ok(claims.get(path).cloned())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_second_claim_is_denied() {
        let store = MemoryClaimStore::new();

        assert!(store.try_claim("upload/a.xml").await.unwrap());
        assert!(!store.try_claim("upload/a.xml").await.unwrap());
        assert!(store.try_claim("upload/b.xml").await.unwrap());
        assert_eq!(store.len(), 2);

        let record = store.claim_record("upload/a.xml").await.unwrap().unwrap();
        assert_eq!(record.path, "upload/a.xml");
        assert!(store.claim_record("upload/missing.xml").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_grant_exactly_one() {
        let store = Arc::new(MemoryClaimStore::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.try_claim("upload/race.xml").await.unwrap() })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 1);
    }
}
