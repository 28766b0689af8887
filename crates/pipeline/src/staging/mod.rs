//! Staging and anchoring
//!
//! Generated packs are uploaded to mutable staging storage, then anchored to
//! permanent content-addressed storage. The hash returned here is computed
//! over the exact staged bytes and is what gets written to the registry.

mod load;
mod memory;

pub use load::LoadS3Store;

use crate::content::ContentRef;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::metrics::record_staged_bytes;
use studyforge_common::types::{Hash256, UnitKey};
use studyforge_common::STUDY_SET_FORMAT;
use tracing::{info, instrument};

/// Content type of every staged pack
pub const PACK_CONTENT_TYPE: &str = "application/json";

/// Name/value metadata attached to an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Location of freshly staged bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpload {
    pub reference: ContentRef,
    pub url: String,
}

/// Location of anchored bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchoredItem {
    pub reference: ContentRef,
    pub url: String,
    /// Whether the permanent URL already serves the bytes
    pub available: bool,
}

/// Mutable staging store with promotion to permanent storage
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn stage(&self, bytes: &[u8], content_type: &str, tags: &[Tag]) -> Result<StagedUpload>;

    async fn anchor(&self, staged: &ContentRef) -> Result<AnchoredItem>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedArtifact {
    pub staging_ref: ContentRef,
    pub staging_url: String,
    pub permanent_ref: ContentRef,
    pub permanent_url: String,
    pub available: bool,
    pub hash: Hash256,
    pub size: usize,
}

#[derive(Clone)]
pub struct StagingService {
    store: Arc<dyn ArtifactStore>,
    max_bytes: usize,
}

impl StagingService {
    pub fn new(store: Arc<dyn ArtifactStore>, max_bytes: usize) -> Self {
        Self { store, max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Upload tags describing a pack for `key`
    pub fn tags_for(key: &UnitKey) -> Vec<Tag> {
        vec![
            Tag::new("Content-Type", PACK_CONTENT_TYPE),
            Tag::new("App-Name", "studyforge"),
            Tag::new("Format", STUDY_SET_FORMAT),
            Tag::new("Unit-Id", key.unit_id().to_string()),
            Tag::new("Language", key.language()),
            Tag::new("Version", key.version().to_string()),
        ]
    }

    /// Stage `bytes` and anchor them. Oversized payloads fail before any
    /// network call.
    #[instrument(skip_all, fields(size = bytes.len()))]
    pub async fn stage_and_anchor(&self, bytes: &[u8], tags: &[Tag]) -> Result<StagedArtifact> {
        if bytes.len() > self.max_bytes {
            return Err(AppError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let hash = Hash256::digest(bytes);
        let staged = self.store.stage(bytes, PACK_CONTENT_TYPE, tags).await?;
        let anchored = self.store.anchor(&staged.reference).await?;
        record_staged_bytes(bytes.len());

        info!(
            staging_ref = %staged.reference,
            permanent_ref = %anchored.reference,
            available = anchored.available,
            hash = %hash,
            "Artifact staged and anchored"
        );

        Ok(StagedArtifact {
            staging_ref: staged.reference,
            staging_url: staged.url,
            permanent_ref: anchored.reference,
            permanent_url: anchored.url,
            available: anchored.available,
            hash,
            size: bytes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentFetcher, InMemoryContentStore};

    #[tokio::test]
    async fn test_oversized_fails_before_store_is_touched() {
        let store = InMemoryContentStore::new();
        let service = StagingService::new(Arc::new(store.clone()), 768 * 1024);

        let err = service
            .stage_and_anchor(&vec![b'x'; 768 * 1024 + 1], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TooLarge { size: 786_433, limit: 786_432 }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_hash_covers_exact_bytes() {
        let store = InMemoryContentStore::new();
        let service = StagingService::new(Arc::new(store.clone()), 1024);

        let artifact = service.stage_and_anchor(b"{\"q\":1}", &[]).await.unwrap();
        assert_eq!(artifact.hash, Hash256::digest(b"{\"q\":1}"));
        assert!(matches!(artifact.staging_ref, ContentRef::Ls3(_)));
        assert!(matches!(artifact.permanent_ref, ContentRef::Arweave(_)));
        assert!(artifact.available);

        let anchored = store
            .fetch_and_verify(&artifact.permanent_ref, &artifact.hash)
            .await
            .unwrap();
        assert_eq!(anchored, b"{\"q\":1}");
    }

    #[test]
    fn test_tags_describe_the_unit() {
        let key = UnitKey::new(Hash256::digest(b"u"), "ja", 3).unwrap();
        let tags = StagingService::tags_for(&key);
        assert!(tags.contains(&Tag::new("Language", "ja")));
        assert!(tags.contains(&Tag::new("Version", "3")));
    }
}
