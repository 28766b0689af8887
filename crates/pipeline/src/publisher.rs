//! Credit-gated registry publisher
//!
//! Submits the write-once record. When the registry reports the slot is
//! already taken, the publisher re-reads it and hands back the winner's
//! record instead of failing.

use crate::content::ContentRef;
use crate::registry::{OutputRegistry, PublishOutcome, PublishedRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::metrics::record_race_resolution;
use studyforge_common::types::{Address, Hash256, UnitKey};
use tracing::{error, info, instrument, warn};

/// Successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    /// This caller's write landed
    Confirmed {
        tx_id: String,
        confirmed_at: DateTime<Utc>,
        record: PublishedRecord,
    },
    /// Another caller's write landed first; `record` is theirs
    RaceResolved { record: PublishedRecord },
}

impl PublishResult {
    pub fn record(&self) -> &PublishedRecord {
        match self {
            PublishResult::Confirmed { record, .. } => record,
            PublishResult::RaceResolved { record } => record,
        }
    }
}

#[derive(Clone)]
pub struct Publisher {
    registry: Arc<dyn OutputRegistry>,
}

impl Publisher {
    pub fn new(registry: Arc<dyn OutputRegistry>) -> Self {
        Self { registry }
    }

    /// Fail with `InsufficientCredits` unless `submitter` can pay for a write
    #[instrument(skip(self), fields(submitter = %submitter))]
    pub async fn ensure_credits(&self, submitter: &Address) -> Result<()> {
        let required = self.registry.required_credits().await?;
        let available = self.registry.credits_of(submitter).await?;
        if available < required {
            info!(available, required, "Submitter lacks credits");
            return Err(AppError::InsufficientCredits {
                submitter: submitter.to_string(),
                available,
                required,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, reference, hash), fields(unit_key = %key, submitter = %submitter))]
    pub async fn publish(
        &self,
        key: &UnitKey,
        reference: &ContentRef,
        hash: &Hash256,
        submitter: &Address,
    ) -> Result<PublishResult> {
        let outcome = self
            .registry
            .fulfill_from_credit(submitter, key, reference, hash)
            .await?;

        match outcome {
            PublishOutcome::Confirmed { tx_id } => {
                let confirmed_at = Utc::now();
                info!(tx_id = %tx_id, "Study set published");
                Ok(PublishResult::Confirmed {
                    tx_id,
                    confirmed_at,
                    record: PublishedRecord {
                        reference: reference.clone(),
                        hash: *hash,
                        submitter: submitter.clone(),
                        created_at: confirmed_at.timestamp().max(0) as u64,
                    },
                })
            }
            PublishOutcome::InsufficientCredits => {
                // Balance moved between the pre-check and the write
                let required = self.registry.required_credits().await?;
                let available = self.registry.credits_of(submitter).await?;
                Err(AppError::InsufficientCredits {
                    submitter: submitter.to_string(),
                    available,
                    required,
                })
            }
            PublishOutcome::AlreadyPublished => self.resolve_race(key).await,
            PublishOutcome::Failed(message) => {
                warn!(error = %message, "Registry write failed");
                Err(AppError::RegistryWriteFailed { message })
            }
        }
    }

    async fn resolve_race(&self, key: &UnitKey) -> Result<PublishResult> {
        match self.registry.get_output(key).await? {
            Some(record) => {
                record_race_resolution(true);
                info!(winner = %record.submitter, hash = %record.hash, "Lost publish race, returning winner's record");
                Ok(PublishResult::RaceResolved { record })
            }
            None => {
                record_race_resolution(false);
                error!(
                    anomaly = "race_resolution_failed",
                    "Registry reported already published but holds no record"
                );
                Err(AppError::RaceResolutionFailed {
                    unit_key: key.to_string(),
                })
            }
        }
    }
}
