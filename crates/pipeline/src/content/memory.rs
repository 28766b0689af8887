//! In-memory content store
//!
//! Backs both the fetcher and the staging store when running without
//! external gateways (local development, pipeline tests). Clones share state.

use super::{ContentFetcher, ContentRef};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use studyforge_common::errors::{AppError, Result};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct InMemoryContentStore {
    objects: Arc<RwLock<HashMap<ContentRef, Vec<u8>>>>,
    next_id: Arc<AtomicU64>,
    fetches: Arc<AtomicU64>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` under `reference`, replacing anything already there
    pub async fn put(&self, reference: ContentRef, bytes: Vec<u8>) {
        self.objects.write().await.insert(reference, bytes);
    }

    pub async fn get(&self, reference: &ContentRef) -> Option<Vec<u8>> {
        self.objects.read().await.get(reference).cloned()
    }

    pub async fn contains(&self, reference: &ContentRef) -> bool {
        self.objects.read().await.contains_key(reference)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of `fetch` calls served so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Fresh opaque id for a stored object
    pub(crate) fn allocate_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{:08}", prefix, n)
    }
}

#[async_trait]
impl ContentFetcher for InMemoryContentStore {
    async fn fetch(&self, reference: &ContentRef) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        match self.objects.read().await.get(reference) {
            Some(bytes) if !bytes.is_empty() => Ok(bytes.clone()),
            Some(_) => Err(AppError::ResolutionFailed {
                reference: reference.to_string(),
                attempts: 1,
                last_status: Some(200),
                message: "empty body".into(),
            }),
            None => Err(AppError::ResolutionFailed {
                reference: reference.to_string(),
                attempts: 1,
                last_status: Some(404),
                message: "not found in memory store".into(),
            }),
        }
    }
}
