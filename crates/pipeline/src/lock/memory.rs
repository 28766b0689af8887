//! In-process lock store for local runs and tests

use super::{LockRow, LockStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use studyforge_common::errors::Result;
use studyforge_common::types::Address;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct InMemoryLockStore {
    rows: Arc<Mutex<HashMap<String, LockRow>>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of `lock_key`, if any
    pub async fn holder(&self, lock_key: &str) -> Option<Address> {
        self.rows.lock().await.get(lock_key).map(|row| row.owner.clone())
    }

    /// Token of the acquisition currently holding `lock_key`
    pub async fn holder_token(&self, lock_key: &str) -> Option<Uuid> {
        self.rows.lock().await.get(lock_key).map(|row| row.token)
    }

    pub async fn held_count(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, row| row.expires_at >= now);
        Ok((before - rows.len()) as u64)
    }

    async fn insert_if_absent(&self, row: &LockRow) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&row.lock_key) {
            return Ok(false);
        }
        rows.insert(row.lock_key.clone(), row.clone());
        Ok(true)
    }

    async fn delete_held(&self, lock_key: &str, owner: &Address, token: &Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get(lock_key) {
            Some(row) if &row.owner == owner && &row.token == token => {
                rows.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
