//! Staging backed by the in-memory content store

use super::{AnchoredItem, ArtifactStore, StagedUpload, Tag};
use crate::content::{ContentRef, InMemoryContentStore};
use async_trait::async_trait;
use studyforge_common::errors::{AppError, Result};

#[async_trait]
impl ArtifactStore for InMemoryContentStore {
    async fn stage(&self, bytes: &[u8], _content_type: &str, _tags: &[Tag]) -> Result<StagedUpload> {
        let id = self.allocate_id("staged");
        let reference = ContentRef::Ls3(id.clone());
        self.put(reference.clone(), bytes.to_vec()).await;
        Ok(StagedUpload {
            reference,
            url: format!("memory://ls3/{}", id),
        })
    }

    async fn anchor(&self, staged: &ContentRef) -> Result<AnchoredItem> {
        let bytes = self.get(staged).await.ok_or_else(|| AppError::StagingFailed {
            message: format!("nothing staged at {}", staged),
        })?;

        let id = self.allocate_id("anchored");
        let reference = ContentRef::Arweave(id.clone());
        self.put(reference.clone(), bytes).await;
        Ok(AnchoredItem {
            reference,
            url: format!("memory://ar/{}", id),
            available: true,
        })
    }
}
