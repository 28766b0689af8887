//! Study set pipeline orchestration
//!
//! `CacheCheck → CreditCheck → LockAcquire → InputFetch → Generate → Stage → Publish`
//!
//! A cache hit returns the verified published pack without taking the lock.
//! Once the lock is held, it is released on every exit path, panics included,
//! and the locked stages are cancelled when the lock's TTL runs out.

use crate::content::{ContentFetcher, ContentRef, GatewayResolver};
use crate::generation::{GenerationInput, GenerationOutput, LyricsDocument, StudySetGenerator, StudySetPack};
use crate::lock::LockManager;
use crate::publisher::{PublishResult, Publisher};
use crate::registry::{PublishedRecord, RegistryReader};
use crate::staging::{StagedArtifact, StagingService};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::metrics::{record_cache, record_pipeline_run, StageTimer};
use studyforge_common::types::{Address, Hash256, UnitKey};
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, instrument, warn, Span};

/// One generation request
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub key: UnitKey,
    /// Credit payer and lock owner; the configured sponsor when absent
    pub submitter: Option<Address>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryView {
    pub study_set_ref: ContentRef,
    pub study_set_hash: Hash256,
    pub submitter: Address,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_ref: Option<ContentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_url: Option<String>,
    pub permanent_ref: ContentRef,
    pub permanent_url: String,
    pub available: bool,
}

/// Successful pipeline result, serialized as the API response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySetResult {
    pub success: bool,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub race_resolved: Option<bool>,
    pub registry: RegistryView,
    pub storage: StorageView,
    pub pack: StudySetPack,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationOutput>,
}

/// Collaborators the pipeline is assembled from
pub struct PipelineComponents {
    pub reader: RegistryReader,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub locks: LockManager,
    pub generator: Arc<dyn StudySetGenerator>,
    pub staging: StagingService,
    pub publisher: Publisher,
    pub resolver: GatewayResolver,
    pub default_submitter: Address,
}

pub struct StudySetPipeline {
    reader: RegistryReader,
    fetcher: Arc<dyn ContentFetcher>,
    locks: LockManager,
    generator: Arc<dyn StudySetGenerator>,
    staging: StagingService,
    publisher: Publisher,
    resolver: GatewayResolver,
    default_submitter: Address,
}

impl StudySetPipeline {
    pub fn new(components: PipelineComponents) -> Self {
        Self {
            reader: components.reader,
            fetcher: components.fetcher,
            locks: components.locks,
            generator: components.generator,
            staging: components.staging,
            publisher: components.publisher,
            resolver: components.resolver,
            default_submitter: components.default_submitter,
        }
    }

    pub fn default_submitter(&self) -> &Address {
        &self.default_submitter
    }

    /// Generate, stage and publish the study set for `request.key`, or return
    /// the one already published
    #[instrument(skip_all, fields(unit_key = %request.key, submitter = tracing::field::Empty))]
    pub async fn run(&self, request: GenerateRequest) -> Result<StudySetResult> {
        let submitter = request.submitter.unwrap_or_else(|| self.default_submitter.clone());
        Span::current().record("submitter", tracing::field::display(&submitter));

        let result = self.execute(&request.key, &submitter).await;
        match &result {
            Ok(done) => {
                record_pipeline_run("ok", done.cached);
                info!(
                    cached = done.cached,
                    race_resolved = done.race_resolved.unwrap_or(false),
                    hash = %done.registry.study_set_hash,
                    "Pipeline finished"
                );
            }
            Err(e) => {
                record_pipeline_run(e.code().as_str(), false);
                warn!(code = e.code().as_str(), error = %e, "Pipeline failed");
            }
        }
        result
    }

    /// Published study set for `key`, verified; never generates
    #[instrument(skip(self), fields(unit_key = %key))]
    pub async fn lookup(&self, key: &UnitKey) -> Result<StudySetResult> {
        match self.reader.resolve_published(key).await? {
            Some(record) => self.serve_published(record).await,
            None => Err(AppError::StudySetNotFound {
                unit_key: key.to_string(),
            }),
        }
    }

    async fn execute(&self, key: &UnitKey, submitter: &Address) -> Result<StudySetResult> {
        // CacheCheck
        let timer = StageTimer::start("cache_check");
        let published = self.reader.resolve_published(key).await;
        timer.finish();
        if let Some(record) = published? {
            record_cache(true);
            return self.serve_published(record).await;
        }
        record_cache(false);

        // CreditCheck
        let timer = StageTimer::start("credit_check");
        let credits = self.publisher.ensure_credits(submitter).await;
        timer.finish();
        credits?;

        // LockAcquire
        let lock_key = key.lock_key();
        let ttl = self.locks.ttl();
        let deadline = Instant::now() + ttl;
        let Some(lease) = self.locks.acquire(&lock_key, submitter, ttl).await? else {
            return Err(AppError::GenerationInFlight {
                lock_key,
                retry_after_secs: ttl.as_secs(),
            });
        };

        // Locked work must end before the row can expire and be taken over
        let outcome = AssertUnwindSafe(timeout_at(deadline, self.locked(key, submitter)))
            .catch_unwind()
            .await;

        if let Err(e) = self.locks.release(&lease).await {
            // The TTL reclaims the row if this fails
            error!(lock_key = %lock_key, error = %e, "Failed to release generation lock");
        }

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => {
                warn!(lock_key = %lock_key, ttl_ms = ttl.as_millis() as u64, "Generation outlived its lock");
                Err(AppError::LockExpired {
                    lock_key,
                    ttl_secs: ttl.as_secs(),
                })
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Stages that run while the lock is held
    async fn locked(&self, key: &UnitKey, submitter: &Address) -> Result<StudySetResult> {
        // InputFetch
        let timer = StageTimer::start("input_fetch");
        let lyrics = self.fetch_input(key).await;
        timer.finish();
        let lyrics = lyrics?;

        // Generate
        let timer = StageTimer::start("generate");
        let generation = self
            .generator
            .generate(&GenerationInput {
                key: key.clone(),
                lyrics,
            })
            .await;
        timer.finish();
        let generation = generation?;

        // Stage
        let timer = StageTimer::start("stage");
        let staged = match generation.pack.to_bytes() {
            Ok(bytes) => {
                self.staging
                    .stage_and_anchor(&bytes, &StagingService::tags_for(key))
                    .await
            }
            Err(e) => Err(e),
        };
        timer.finish();
        let staged = staged?;

        // Publish
        let timer = StageTimer::start("publish");
        let published = self
            .publisher
            .publish(key, &staged.permanent_ref, &staged.hash, submitter)
            .await;
        timer.finish();

        match published? {
            PublishResult::Confirmed { tx_id, record, .. } => Ok(StudySetResult {
                success: true,
                cached: false,
                race_resolved: None,
                registry: registry_view(&record, Some(tx_id)),
                storage: StorageView {
                    staging_ref: Some(staged.staging_ref),
                    staging_url: Some(staged.staging_url),
                    permanent_ref: staged.permanent_ref,
                    permanent_url: staged.permanent_url,
                    available: staged.available,
                },
                pack: generation.pack.clone(),
                generation: Some(generation),
            }),
            PublishResult::RaceResolved { record } => self.serve_race_winner(record, staged, generation).await,
        }
    }

    #[instrument(skip(self), fields(unit_id = %key.unit_id()))]
    async fn fetch_input(&self, key: &UnitKey) -> Result<LyricsDocument> {
        let input = self.reader.resolve_canonical_input(key.unit_id()).await?;
        let bytes = self.fetcher.fetch_and_verify(&input.reference, &input.hash).await?;
        LyricsDocument::parse(&bytes)
    }

    async fn serve_published(&self, record: PublishedRecord) -> Result<StudySetResult> {
        let timer = StageTimer::start("cache_fetch");
        let bytes = self.fetcher.fetch_and_verify(&record.reference, &record.hash).await;
        timer.finish();
        let pack = StudySetPack::from_bytes(&bytes?)?;

        Ok(StudySetResult {
            success: true,
            cached: true,
            race_resolved: None,
            registry: registry_view(&record, None),
            storage: self.permanent_storage(&record.reference, true),
            pack,
            generation: None,
        })
    }

    /// Result for a caller whose write lost to `record`
    async fn serve_race_winner(
        &self,
        record: PublishedRecord,
        staged: StagedArtifact,
        generation: GenerationOutput,
    ) -> Result<StudySetResult> {
        let (pack, available) = if record.hash == staged.hash {
            let available = record.reference == staged.permanent_ref && staged.available;
            (generation.pack, available)
        } else {
            let bytes = self.fetcher.fetch_and_verify(&record.reference, &record.hash).await?;
            (StudySetPack::from_bytes(&bytes)?, true)
        };

        Ok(StudySetResult {
            success: true,
            cached: false,
            race_resolved: Some(true),
            registry: registry_view(&record, None),
            storage: self.permanent_storage(&record.reference, available),
            pack,
            generation: None,
        })
    }

    fn permanent_storage(&self, reference: &ContentRef, available: bool) -> StorageView {
        StorageView {
            staging_ref: None,
            staging_url: None,
            permanent_ref: reference.clone(),
            permanent_url: self
                .resolver
                .primary_url(reference)
                .unwrap_or_else(|| reference.to_string()),
            available,
        }
    }
}

fn registry_view(record: &PublishedRecord, tx_id: Option<String>) -> RegistryView {
    RegistryView {
        study_set_ref: record.reference.clone(),
        study_set_hash: record.hash,
        submitter: record.submitter.clone(),
        created_at: record.created_at,
        tx_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::InMemoryContentStore;
    use crate::generation::{GenerationEngine, MockCompletionProvider, NoAnnotations};
    use crate::lock::InMemoryLockStore;
    use crate::registry::{CanonicalInputRecord, InMemoryRegistry, OutputRegistry};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use studyforge_common::config::{ContentConfig, QuestionBounds};
    use studyforge_common::errors::ErrorResponse;
    use tokio::sync::Barrier;

    const LYRICS: &[u8] = b"{\"title\":\"Cancion\",\"lines\":[\"uno dos tres\",\"cuatro cinco\"]}";

    fn payer() -> Address {
        "0x00000000000000000000000000000000000000aa".parse().unwrap()
    }

    fn sponsor() -> Address {
        "0x00000000000000000000000000000000000000ff".parse().unwrap()
    }

    fn key() -> UnitKey {
        UnitKey::new(Hash256::digest(b"track-7"), "en", 1).unwrap()
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            key: key(),
            submitter: Some(payer()),
        }
    }

    struct Fixture {
        registry: InMemoryRegistry,
        content: InMemoryContentStore,
        locks: InMemoryLockStore,
    }

    impl Fixture {
        /// Approved lyrics, a funded payer, empty output slot
        async fn new() -> Self {
            let fixture = Self {
                registry: InMemoryRegistry::new(),
                content: InMemoryContentStore::new(),
                locks: InMemoryLockStore::new(),
            };
            fixture.approve_lyrics(LYRICS, LYRICS).await;
            fixture.registry.set_credits(&payer(), 5).await;
            fixture
        }

        /// Registry records the hash of `registered`, gateway serves `served`
        async fn approve_lyrics(&self, registered: &[u8], served: &[u8]) {
            let reference = ContentRef::Ipfs("bafylyrics".into());
            self.content.put(reference.clone(), served.to_vec()).await;
            self.registry
                .approve_input(
                    *key().unit_id(),
                    CanonicalInputRecord {
                        reference,
                        hash: Hash256::digest(registered),
                        version: 1,
                        submitter: payer(),
                        timestamp: 1_700_000_000,
                    },
                )
                .await;
        }

        fn pipeline(&self, generator: Arc<dyn StudySetGenerator>) -> StudySetPipeline {
            self.pipeline_with_locks(generator, self.locks.clone())
        }

        fn pipeline_with_locks(&self, generator: Arc<dyn StudySetGenerator>, locks: InMemoryLockStore) -> StudySetPipeline {
            self.pipeline_with_ttl(generator, locks, Duration::from_secs(120))
        }

        fn pipeline_with_ttl(
            &self,
            generator: Arc<dyn StudySetGenerator>,
            locks: InMemoryLockStore,
            ttl: Duration,
        ) -> StudySetPipeline {
            let registry = Arc::new(self.registry.clone());
            StudySetPipeline::new(PipelineComponents {
                reader: RegistryReader::new(registry.clone(), registry.clone()),
                fetcher: Arc::new(self.content.clone()),
                locks: LockManager::new(Arc::new(locks), ttl),
                generator,
                staging: StagingService::new(Arc::new(self.content.clone()), 768 * 1024),
                publisher: Publisher::new(registry),
                resolver: GatewayResolver::from_config(&ContentConfig::default()),
                default_submitter: sponsor(),
            })
        }
    }

    fn engine(provider: Arc<MockCompletionProvider>) -> Arc<dyn StudySetGenerator> {
        Arc::new(GenerationEngine::new(provider, Arc::new(NoAnnotations), QuestionBounds::default()))
    }

    /// Holds every caller at the generate stage until `n` have arrived
    struct GatedGenerator {
        inner: Arc<dyn StudySetGenerator>,
        gate: Arc<Barrier>,
    }

    #[async_trait]
    impl StudySetGenerator for GatedGenerator {
        async fn generate(&self, input: &GenerationInput) -> Result<GenerationOutput> {
            self.gate.wait().await;
            self.inner.generate(input).await
        }
    }

    /// Sleeps before generating and tracks how many generations overlap
    struct SlowGenerator {
        inner: Arc<dyn StudySetGenerator>,
        delay: Duration,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct ActiveGuard(Arc<AtomicUsize>);

    impl Drop for ActiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StudySetGenerator for SlowGenerator {
        async fn generate(&self, input: &GenerationInput) -> Result<GenerationOutput> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = ActiveGuard(self.active.clone());
            self.peak.fetch_max(now_active, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.generate(input).await
        }
    }

    struct PanickingGenerator;

    #[async_trait]
    impl StudySetGenerator for PanickingGenerator {
        async fn generate(&self, _input: &GenerationInput) -> Result<GenerationOutput> {
            panic!("provider client bug");
        }
    }

    #[tokio::test]
    async fn test_generates_once_then_serves_cache() {
        let fixture = Fixture::new().await;
        let provider = Arc::new(MockCompletionProvider::valid());
        let pipeline = fixture.pipeline(engine(provider.clone()));

        let first = pipeline.run(request()).await.unwrap();
        assert!(!first.cached);
        assert!(first.race_resolved.is_none());
        assert!(first.registry.tx_id.is_some());
        let staged_hash = Hash256::digest(&first.pack.to_bytes().unwrap());
        assert_eq!(first.registry.study_set_hash, staged_hash);
        assert!(first.storage.staging_ref.is_some());

        let second = pipeline.run(request()).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.registry.study_set_hash, staged_hash);
        assert_eq!(second.registry.study_set_ref, first.registry.study_set_ref);
        assert_eq!(second.pack, first.pack);

        assert_eq!(provider.calls(), 1);
        assert_eq!(fixture.registry.write_attempts().await, 1);
        assert_eq!(fixture.locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let fixture = Fixture::new().await;
        let pipeline = fixture.pipeline(engine(Arc::new(MockCompletionProvider::valid())));

        let body = serde_json::to_value(pipeline.run(request()).await.unwrap()).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["cached"], false);
        assert!(body.get("raceResolved").is_none());
        assert!(body["registry"]["studySetHash"].as_str().unwrap().starts_with("0x"));
        assert!(body["registry"]["studySetRef"].as_str().unwrap().starts_with("ar://"));
        assert!(body["storage"]["stagingRef"].as_str().unwrap().starts_with("ls3://"));
        assert_eq!(body["generation"]["model"], "mock");
        assert_eq!(body["pack"]["format"], "study-set-v1");
    }

    #[tokio::test]
    async fn test_second_caller_within_ttl_is_in_flight() {
        let fixture = Fixture::new().await;
        let pipeline = fixture.pipeline(engine(Arc::new(MockCompletionProvider::valid())));

        let holder = LockManager::new(Arc::new(fixture.locks.clone()), Duration::from_secs(120));
        assert!(holder.try_acquire(&key().lock_key(), &sponsor()).await.unwrap().is_some());

        let err = pipeline.run(request()).await.unwrap_err();
        assert!(matches!(err, AppError::GenerationInFlight { retry_after_secs: 120, .. }));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["code"], "generation_in_flight");
        assert_eq!(body["retryAfterSeconds"], 120);

        // The holder's lock is untouched
        assert_eq!(fixture.locks.holder(&key().lock_key()).await, Some(sponsor()));
    }

    #[tokio::test]
    async fn test_corrupted_input_is_hash_mismatch() {
        let fixture = Fixture::new().await;
        let served = b"{\"title\":\"Cancion\",\"lines\":[\"uno dos tres\",\"cuatro seis\"]}";
        fixture.approve_lyrics(LYRICS, served).await;
        let provider = Arc::new(MockCompletionProvider::valid());
        let pipeline = fixture.pipeline(engine(provider.clone()));

        let err = pipeline.run(request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["code"], "hash_mismatch");
        assert_eq!(body["expectedHash"], Hash256::digest(LYRICS).to_string());
        assert_eq!(body["actualHash"], Hash256::digest(served).to_string());

        assert_eq!(provider.calls(), 0);
        assert_eq!(fixture.registry.write_attempts().await, 0);
        assert_eq!(fixture.locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_insufficient_credits_never_writes() {
        let fixture = Fixture::new().await;
        fixture.registry.set_credits(&payer(), 0).await;
        let provider = Arc::new(MockCompletionProvider::valid());
        let pipeline = fixture.pipeline(engine(provider.clone()));

        let err = pipeline.run(request()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "insufficient_credits");
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(provider.calls(), 0);
        assert_eq!(fixture.registry.write_attempts().await, 0);
        // Only the canonical lyrics are stored; nothing was staged
        assert_eq!(fixture.content.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_input_needs_upstream_approval() {
        let fixture = Fixture {
            registry: InMemoryRegistry::new(),
            content: InMemoryContentStore::new(),
            locks: InMemoryLockStore::new(),
        };
        fixture.registry.set_credits(&payer(), 1).await;
        let pipeline = fixture.pipeline(engine(Arc::new(MockCompletionProvider::valid())));

        let err = pipeline.run(request()).await.unwrap_err();
        assert!(matches!(err, AppError::InputNotFound { .. }));
        assert!(!err.is_retryable());
        assert_eq!(fixture.locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_lock_released_after_failure_and_retry_succeeds() {
        let fixture = Fixture::new().await;
        let provider = Arc::new(MockCompletionProvider::valid());
        provider.push(Ok("not json at all".into())).await;
        let pipeline = fixture.pipeline(engine(provider.clone()));

        let err = pipeline.run(request()).await.unwrap_err();
        match &err {
            AppError::OutputValidation { raw_output, .. } => assert_eq!(raw_output, "not json at all"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fixture.locks.held_count().await, 0);

        let retried = pipeline.run(request()).await.unwrap();
        assert!(!retried.cached);
    }

    #[tokio::test]
    async fn test_lock_released_when_generation_panics() {
        let fixture = Fixture::new().await;
        let pipeline = Arc::new(fixture.pipeline(Arc::new(PanickingGenerator)));

        let task = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run(request()).await }
        });
        let joined = task.await;
        assert!(joined.unwrap_err().is_panic());
        assert_eq!(fixture.locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_publish_exactly_once() {
        let fixture = Fixture::new().await;
        let gate = Arc::new(Barrier::new(2));
        let generator = |gate: &Arc<Barrier>| -> Arc<dyn StudySetGenerator> {
            Arc::new(GatedGenerator {
                inner: engine(Arc::new(MockCompletionProvider::valid())),
                gate: gate.clone(),
            })
        };

        // Separate lock stores stand in for callers that both got past the lock
        let a = fixture.pipeline_with_locks(generator(&gate), InMemoryLockStore::new());
        let b = fixture.pipeline_with_locks(generator(&gate), InMemoryLockStore::new());

        let (ra, rb) = tokio::join!(a.run(request()), b.run(request()));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(fixture.registry.published_count().await, 1);
        assert_eq!(fixture.registry.write_attempts().await, 2);
        assert_eq!(ra.registry.study_set_ref, rb.registry.study_set_ref);
        assert_eq!(ra.registry.study_set_hash, rb.registry.study_set_hash);
        assert_eq!(ra.pack, rb.pack);

        let resolved = [&ra, &rb].iter().filter(|r| r.race_resolved == Some(true)).count();
        assert_eq!(resolved, 1);
        assert!(!ra.cached && !rb.cached);
        // Only the winner paid
        assert_eq!(fixture.registry.credits_of(&payer()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_race_loser_fetches_winners_pack_when_hashes_differ() {
        let fixture = Fixture::new().await;
        let gate = Arc::new(Barrier::new(2));

        let mut other_output: serde_json::Value = serde_json::from_str(&crate::generation::canned_questions()).unwrap();
        other_output["questions"][0]["prompt"] = "A different first question".into();

        let a = fixture.pipeline_with_locks(
            Arc::new(GatedGenerator {
                inner: engine(Arc::new(MockCompletionProvider::valid())),
                gate: gate.clone(),
            }),
            InMemoryLockStore::new(),
        );
        let b = fixture.pipeline_with_locks(
            Arc::new(GatedGenerator {
                inner: engine(Arc::new(MockCompletionProvider::new(other_output.to_string()))),
                gate: gate.clone(),
            }),
            InMemoryLockStore::new(),
        );

        let (ra, rb) = tokio::join!(a.run(request()), b.run(request()));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.registry.study_set_hash, rb.registry.study_set_hash);
        assert_eq!(ra.pack, rb.pack);
        let loser = if ra.race_resolved == Some(true) { &ra } else { &rb };
        assert!(loser.storage.available);
        assert!(loser.storage.staging_ref.is_none());
        assert!(loser.generation.is_none());
    }

    #[tokio::test]
    async fn test_race_resolution_failure_is_terminal_and_releases_lock() {
        let fixture = Fixture::new().await;
        fixture.registry.simulate_conflict_without_record().await;
        let pipeline = fixture.pipeline(engine(Arc::new(MockCompletionProvider::valid())));

        let err = pipeline.run(request()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "race_resolution_failed");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(fixture.locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_registry_write_failure_is_retryable() {
        let fixture = Fixture::new().await;
        fixture.registry.fail_writes("relay timeout").await;
        let pipeline = fixture.pipeline(engine(Arc::new(MockCompletionProvider::valid())));

        let err = pipeline.run(request()).await.unwrap_err();
        assert!(matches!(err, AppError::RegistryWriteFailed { .. }));
        assert!(err.is_retryable());
        assert_eq!(fixture.locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_default_submitter_pays() {
        let fixture = Fixture::new().await;
        fixture.registry.set_credits(&sponsor(), 1).await;
        let pipeline = fixture.pipeline(engine(Arc::new(MockCompletionProvider::valid())));

        let result = pipeline
            .run(GenerateRequest {
                key: key(),
                submitter: None,
            })
            .await
            .unwrap();
        assert_eq!(result.registry.submitter, sponsor());
        assert_eq!(fixture.registry.credits_of(&sponsor()).await.unwrap(), 0);
        assert_eq!(fixture.registry.credits_of(&payer()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_lookup_never_generates() {
        let fixture = Fixture::new().await;
        let provider = Arc::new(MockCompletionProvider::valid());
        let pipeline = fixture.pipeline(engine(provider.clone()));

        let err = pipeline.lookup(&key()).await.unwrap_err();
        assert!(matches!(err, AppError::StudySetNotFound { .. }));
        assert_eq!(provider.calls(), 0);

        pipeline.run(request()).await.unwrap();
        let found = pipeline.lookup(&key()).await.unwrap();
        assert!(found.cached);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_tampered_cached_artifact_is_hash_mismatch() {
        let fixture = Fixture::new().await;
        let pipeline = fixture.pipeline(engine(Arc::new(MockCompletionProvider::valid())));

        let first = pipeline.run(request()).await.unwrap();
        fixture
            .content
            .put(first.registry.study_set_ref.clone(), b"{\"tampered\":true}".to_vec())
            .await;

        let err = pipeline.run(request()).await.unwrap_err();
        assert!(matches!(err, AppError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn test_generation_outliving_lock_ttl_is_cut_off() {
        let fixture = Fixture::new().await;
        let generator = Arc::new(SlowGenerator {
            inner: engine(Arc::new(MockCompletionProvider::valid())),
            delay: Duration::from_millis(300),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        });
        let pipeline = fixture.pipeline_with_ttl(generator.clone(), fixture.locks.clone(), Duration::from_millis(50));

        let err = pipeline.run(request()).await.unwrap_err();
        assert!(matches!(err, AppError::LockExpired { .. }));
        assert!(err.is_retryable());
        assert_eq!(generator.active.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.registry.write_attempts().await, 0);
        assert_eq!(fixture.locks.held_count().await, 0);
    }

    #[tokio::test]
    async fn test_successor_lock_survives_expired_holder() {
        let fixture = Fixture::new().await;
        fixture.registry.set_credits(&sponsor(), 1).await;
        let ttl = Duration::from_millis(100);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let slow = |delay: u64| -> Arc<dyn StudySetGenerator> {
            Arc::new(SlowGenerator {
                inner: engine(Arc::new(MockCompletionProvider::valid())),
                delay: Duration::from_millis(delay),
                active: active.clone(),
                peak: peak.clone(),
            })
        };
        // Both callers fall back to the sponsor, so they share an owner
        let sponsored = || GenerateRequest {
            key: key(),
            submitter: None,
        };

        let first = fixture.pipeline_with_ttl(slow(250), fixture.locks.clone(), ttl);
        let second = fixture.pipeline_with_ttl(slow(60), fixture.locks.clone(), ttl);

        let observe = async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            fixture.locks.holder(&key().lock_key()).await
        };
        let late = async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            second.run(sponsored()).await
        };
        let (ra, rb, holder_mid_second) = tokio::join!(first.run(sponsored()), late, observe);

        assert!(matches!(ra.unwrap_err(), AppError::LockExpired { .. }));
        assert!(!rb.unwrap().cached);
        assert_eq!(holder_mid_second, Some(sponsor()));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.registry.published_count().await, 1);
        assert_eq!(fixture.locks.held_count().await, 0);
    }
}
