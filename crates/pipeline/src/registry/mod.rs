//! Registry access
//!
//! Two registries sit behind these traits:
//! - the upstream input registry, holding approved canonical lyrics per unit
//! - the output registry, holding write-once study set records per `UnitKey`
//!   together with the credit ledger that gates writes
//!
//! `RegistryReader` is the read-only view the pipeline uses for cache checks
//! and canonical input resolution.

mod http;
mod memory;

pub use http::RegistryClient;
pub use memory::InMemoryRegistry;

use crate::content::ContentRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::types::{Address, Hash256, UnitKey};
use tracing::{debug, instrument};

/// Approved canonical input for a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalInputRecord {
    #[serde(rename = "ref")]
    pub reference: ContentRef,
    pub hash: Hash256,
    pub version: u8,
    pub submitter: Address,
    pub timestamp: u64,
}

/// Published study set record, write-once per `UnitKey`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedRecord {
    #[serde(rename = "ref")]
    pub reference: ContentRef,
    pub hash: Hash256,
    pub submitter: Address,
    /// Unix seconds at which the record was written
    pub created_at: u64,
}

/// Result of a credit-gated registry write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Confirmed { tx_id: String },
    AlreadyPublished,
    InsufficientCredits,
    Failed(String),
}

/// Upstream registry of approved canonical inputs
#[async_trait]
pub trait InputRegistry: Send + Sync {
    async fn get_input(&self, unit_id: &Hash256) -> Result<Option<CanonicalInputRecord>>;
}

/// Output registry and its credit ledger
#[async_trait]
pub trait OutputRegistry: Send + Sync {
    /// Published record for `key`, `None` when the slot is empty
    async fn get_output(&self, key: &UnitKey) -> Result<Option<PublishedRecord>>;

    async fn credits_of(&self, address: &Address) -> Result<u64>;

    async fn required_credits(&self) -> Result<u64>;

    /// Write-once publish with atomic credit deduction
    async fn fulfill_from_credit(
        &self,
        submitter: &Address,
        key: &UnitKey,
        reference: &ContentRef,
        hash: &Hash256,
    ) -> Result<PublishOutcome>;
}

/// Read-only view over both registries
#[derive(Clone)]
pub struct RegistryReader {
    inputs: Arc<dyn InputRegistry>,
    outputs: Arc<dyn OutputRegistry>,
}

impl RegistryReader {
    pub fn new(inputs: Arc<dyn InputRegistry>, outputs: Arc<dyn OutputRegistry>) -> Self {
        Self { inputs, outputs }
    }

    /// Published record for `key`. `None` is authoritative absence.
    #[instrument(skip(self), fields(unit_key = %key))]
    pub async fn resolve_published(&self, key: &UnitKey) -> Result<Option<PublishedRecord>> {
        let record = self.outputs.get_output(key).await?;
        debug!(exists = record.is_some(), "Resolved published record");
        Ok(record)
    }

    /// Canonical input for `unit_id`, `InputNotFound` when nothing is approved
    #[instrument(skip(self), fields(unit_id = %unit_id))]
    pub async fn resolve_canonical_input(&self, unit_id: &Hash256) -> Result<CanonicalInputRecord> {
        self.inputs
            .get_input(unit_id)
            .await?
            .ok_or(AppError::InputNotFound { unit_id: *unit_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Hash256 {
        Hash256::digest(b"track-1")
    }

    #[tokio::test]
    async fn test_missing_input_is_not_found() {
        let registry = Arc::new(InMemoryRegistry::new());
        let reader = RegistryReader::new(registry.clone(), registry);

        let err = reader.resolve_canonical_input(&unit()).await.unwrap_err();
        assert!(matches!(err, AppError::InputNotFound { .. }));
        assert_eq!(err.context()["needsUpstreamApproval"], true);
    }

    #[tokio::test]
    async fn test_absent_output_is_none() {
        let registry = Arc::new(InMemoryRegistry::new());
        let reader = RegistryReader::new(registry.clone(), registry);
        let key = UnitKey::new(unit(), "es", 1).unwrap();

        assert!(reader.resolve_published(&key).await.unwrap().is_none());
    }

    #[test]
    fn test_record_wire_shape() {
        let record = PublishedRecord {
            reference: ContentRef::Arweave("tx9".into()),
            hash: Hash256::digest(b"pack"),
            submitter: "0x00000000000000000000000000000000000000aa".parse().unwrap(),
            created_at: 1_700_000_000,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["ref"], "ar://tx9");
        assert_eq!(value["createdAt"], 1_700_000_000u64);
    }
}
