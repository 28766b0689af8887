//! Generation lock manager
//!
//! A keyed, owner-scoped, TTL-bound mutual exclusion record. Acquisition
//! sweeps lapsed rows first and then inserts if absent; the store's
//! uniqueness constraint decides the single winner. Every acquisition gets a
//! fresh token, and release only removes the row carrying that token, so a
//! holder whose TTL lapsed can never delete its successor's lock.

mod memory;
mod postgres;

pub use memory::InMemoryLockStore;
pub use postgres::PgLockStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::metrics::record_lock_acquisition;
use studyforge_common::types::Address;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Storage primitive behind the lock manager
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Delete every row whose expiry is before `now`, returning the count
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Insert the row unless `lock_key` is already held; `true` if inserted
    async fn insert_if_absent(&self, row: &LockRow) -> Result<bool>;

    /// Delete the row if key, owner and token all match; `true` if removed
    async fn delete_held(&self, lock_key: &str, owner: &Address, token: &Uuid) -> Result<bool>;
}

/// One lock row as written by an acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRow {
    pub lock_key: String,
    pub owner: Address,
    pub token: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A held lock. Only the lease that inserted a row can release it.
#[derive(Debug, Clone)]
pub struct LockLease {
    row: LockRow,
}

impl LockLease {
    pub fn lock_key(&self) -> &str {
        &self.row.lock_key
    }

    pub fn owner(&self) -> &Address {
        &self.row.owner
    }

    pub fn token(&self) -> &Uuid {
        &self.row.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.row.expires_at
    }
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    ttl: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Configured lock lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to take `lock_key` for `owner`. Returns a lease only if this call
    /// inserted the row.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn acquire(&self, lock_key: &str, owner: &Address, ttl: Duration) -> Result<Option<LockLease>> {
        let now = Utc::now();
        let swept = self.store.sweep_expired(now).await?;
        if swept > 0 {
            debug!(swept, "Swept expired generation locks");
        }

        let ttl = chrono::Duration::from_std(ttl).map_err(|e| AppError::Internal {
            message: format!("lock ttl out of range: {}", e),
        })?;
        let row = LockRow {
            lock_key: lock_key.to_string(),
            owner: owner.clone(),
            token: Uuid::new_v4(),
            created_at: now,
            expires_at: now + ttl,
        };
        let acquired = self.store.insert_if_absent(&row).await?;

        record_lock_acquisition(acquired);
        if acquired {
            debug!(token = %row.token, "Generation lock acquired");
            Ok(Some(LockLease { row }))
        } else {
            info!("Generation lock held by another caller");
            Ok(None)
        }
    }

    /// Acquire with the configured TTL
    pub async fn try_acquire(&self, lock_key: &str, owner: &Address) -> Result<Option<LockLease>> {
        self.acquire(lock_key, owner, self.ttl).await
    }

    /// Release the row `lease` inserted; no-op if it already expired and was
    /// taken over or swept
    #[instrument(skip_all, fields(lock_key = %lease.lock_key(), token = %lease.token()))]
    pub async fn release(&self, lease: &LockLease) -> Result<()> {
        let removed = self
            .store
            .delete_held(lease.lock_key(), lease.owner(), lease.token())
            .await?;
        if removed {
            debug!("Generation lock released");
        } else {
            info!("Generation lock already lapsed before release");
        }
        Ok(())
    }
}
