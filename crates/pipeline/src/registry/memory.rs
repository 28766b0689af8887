//! In-memory registry
//!
//! Implements both registries behind one mutex so the write-once check and
//! the credit deduction happen atomically, like the on-chain contract.

use super::{CanonicalInputRecord, InputRegistry, OutputRegistry, PublishOutcome, PublishedRecord};
use crate::content::ContentRef;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use studyforge_common::errors::Result;
use studyforge_common::types::{Address, Hash256, UnitKey};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct RegistryState {
    inputs: HashMap<Hash256, CanonicalInputRecord>,
    outputs: HashMap<UnitKey, PublishedRecord>,
    credits: HashMap<Address, u64>,
    required: u64,
    write_attempts: u64,
    conflict_without_record: bool,
    fail_writes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InMemoryRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    /// Empty registry charging one credit per publish
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                required: 1,
                ..Default::default()
            })),
        }
    }

    pub async fn approve_input(&self, unit_id: Hash256, record: CanonicalInputRecord) {
        self.state.lock().await.inputs.insert(unit_id, record);
    }

    pub async fn set_credits(&self, address: &Address, credits: u64) {
        self.state.lock().await.credits.insert(address.clone(), credits);
    }

    pub async fn set_required_credits(&self, required: u64) {
        self.state.lock().await.required = required;
    }

    /// Seed a published record directly, bypassing credits
    pub async fn publish_record(&self, key: UnitKey, record: PublishedRecord) {
        self.state.lock().await.outputs.insert(key, record);
    }

    /// Number of `fulfill_from_credit` calls received
    pub async fn write_attempts(&self) -> u64 {
        self.state.lock().await.write_attempts
    }

    pub async fn published_count(&self) -> usize {
        self.state.lock().await.outputs.len()
    }

    /// Report `AlreadyPublished` on every write while keeping the slot empty
    pub async fn simulate_conflict_without_record(&self) {
        self.state.lock().await.conflict_without_record = true;
    }

    /// Fail every write with `reason`
    pub async fn fail_writes(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_writes = Some(reason.into());
    }
}

#[async_trait]
impl InputRegistry for InMemoryRegistry {
    async fn get_input(&self, unit_id: &Hash256) -> Result<Option<CanonicalInputRecord>> {
        Ok(self.state.lock().await.inputs.get(unit_id).cloned())
    }
}

#[async_trait]
impl OutputRegistry for InMemoryRegistry {
    async fn get_output(&self, key: &UnitKey) -> Result<Option<PublishedRecord>> {
        Ok(self.state.lock().await.outputs.get(key).cloned())
    }

    async fn credits_of(&self, address: &Address) -> Result<u64> {
        Ok(self.state.lock().await.credits.get(address).copied().unwrap_or(0))
    }

    async fn required_credits(&self) -> Result<u64> {
        Ok(self.state.lock().await.required)
    }

    async fn fulfill_from_credit(
        &self,
        submitter: &Address,
        key: &UnitKey,
        reference: &ContentRef,
        hash: &Hash256,
    ) -> Result<PublishOutcome> {
        let mut state = self.state.lock().await;
        state.write_attempts += 1;

        if let Some(reason) = &state.fail_writes {
            return Ok(PublishOutcome::Failed(reason.clone()));
        }
        if state.conflict_without_record || state.outputs.contains_key(key) {
            return Ok(PublishOutcome::AlreadyPublished);
        }

        let required = state.required;
        let balance = state.credits.get(submitter).copied().unwrap_or(0);
        if balance < required {
            return Ok(PublishOutcome::InsufficientCredits);
        }

        state.credits.insert(submitter.clone(), balance - required);
        state.outputs.insert(
            key.clone(),
            PublishedRecord {
                reference: reference.clone(),
                hash: *hash,
                submitter: submitter.clone(),
                created_at: chrono::Utc::now().timestamp().max(0) as u64,
            },
        );

        Ok(PublishOutcome::Confirmed {
            tx_id: format!("0x{}", Uuid::new_v4().simple()),
        })
    }
}
