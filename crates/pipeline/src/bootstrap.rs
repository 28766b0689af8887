//! Pipeline assembly from configuration
//!
//! Each collaborator is picked by its `backend`/`provider` setting. The
//! in-memory backends exist for local development; when memory staging is
//! selected the same store also serves fetches, so staged packs can be read
//! back through the normal verification path.

use crate::content::{ContentFetcher, GatewayResolver, HttpFetcher, InMemoryContentStore};
use crate::generation::{
    AnnotationProvider, CompletionProvider, GenerationEngine, GeniusAnnotations,
    MockCompletionProvider, NoAnnotations, OpenAiProvider,
};
use crate::lock::{InMemoryLockStore, LockManager, LockStore, PgLockStore};
use crate::orchestrator::{PipelineComponents, StudySetPipeline};
use crate::publisher::Publisher;
use crate::registry::{InMemoryRegistry, InputRegistry, OutputRegistry, RegistryClient, RegistryReader};
use crate::staging::{ArtifactStore, LoadS3Store, StagingService};
use std::sync::Arc;
use std::time::Duration;
use studyforge_common::config::AppConfig;
use studyforge_common::db::DbPool;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::types::Address;
use tracing::{info, warn};

fn unknown(setting: &str, value: &str) -> AppError {
    AppError::Configuration {
        message: format!("unknown {}: {}", setting, value),
    }
}

/// Create the lock store for `lock.backend`
pub fn create_lock_store(backend: &str, db: Option<DbPool>) -> Result<Arc<dyn LockStore>> {
    match backend {
        "postgres" => {
            let db = db.ok_or_else(|| AppError::Configuration {
                message: "lock.backend=postgres needs a database connection".into(),
            })?;
            Ok(Arc::new(PgLockStore::new(db)))
        }
        "memory" => {
            warn!("Using in-memory generation locks; not shared across instances");
            Ok(Arc::new(InMemoryLockStore::new()))
        }
        other => Err(unknown("lock.backend", other)),
    }
}

/// Create the completion provider for `generation.provider`
pub fn create_completion_provider(config: &AppConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.generation.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::from_config(&config.generation)?)),
        "mock" => {
            warn!("Using mock completion provider");
            Ok(Arc::new(MockCompletionProvider::valid()))
        }
        other => Err(unknown("generation.provider", other)),
    }
}

/// Create the annotation provider for `enrichment.provider`
pub fn create_annotation_provider(config: &AppConfig) -> Result<Arc<dyn AnnotationProvider>> {
    match config.enrichment.provider.as_str() {
        "genius" => Ok(Arc::new(GeniusAnnotations::from_config(&config.enrichment)?)),
        "none" => Ok(Arc::new(NoAnnotations)),
        other => Err(unknown("enrichment.provider", other)),
    }
}

/// Assemble the pipeline. `db` is required only by the Postgres lock backend.
pub fn build_pipeline(config: &AppConfig, db: Option<DbPool>) -> Result<StudySetPipeline> {
    let default_submitter: Address = config.registry.sponsor_address.parse().map_err(|_| {
        AppError::Configuration {
            message: format!(
                "registry.sponsor_address is not an address: {}",
                config.registry.sponsor_address
            ),
        }
    })?;

    let (inputs, outputs): (Arc<dyn InputRegistry>, Arc<dyn OutputRegistry>) =
        match config.registry.backend.as_str() {
            "http" => {
                let client = Arc::new(RegistryClient::from_config(&config.registry)?);
                (client.clone(), client)
            }
            "memory" => {
                warn!("Using in-memory registry; nothing is published on-chain");
                let registry = Arc::new(InMemoryRegistry::new());
                (registry.clone(), registry)
            }
            other => return Err(unknown("registry.backend", other)),
        };

    let resolver = GatewayResolver::from_config(&config.content);
    let (store, fetcher): (Arc<dyn ArtifactStore>, Arc<dyn ContentFetcher>) =
        match config.staging.backend.as_str() {
            "load" => {
                let fetcher = HttpFetcher::new(
                    resolver.clone(),
                    Duration::from_secs(config.content.timeout_secs),
                )?;
                (Arc::new(LoadS3Store::new(&config.staging)?), Arc::new(fetcher))
            }
            "memory" => {
                warn!("Using in-memory staging; artifacts are lost on restart");
                let store = InMemoryContentStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
            other => return Err(unknown("staging.backend", other)),
        };

    let generator = GenerationEngine::new(
        create_completion_provider(config)?,
        create_annotation_provider(config)?,
        config.generation.bounds.clone(),
    );

    let locks = LockManager::new(create_lock_store(&config.lock.backend, db)?, config.lock_ttl());

    info!(
        lock = %config.lock.backend,
        registry = %config.registry.backend,
        provider = %config.generation.provider,
        enrichment = %config.enrichment.provider,
        staging = %config.staging.backend,
        sponsor = %default_submitter,
        "Pipeline assembled"
    );

    Ok(StudySetPipeline::new(PipelineComponents {
        reader: RegistryReader::new(inputs, outputs.clone()),
        fetcher,
        locks,
        generator: Arc::new(generator),
        staging: StagingService::new(store, config.staging.max_bytes),
        publisher: Publisher::new(outputs),
        resolver,
        default_submitter,
    }))
}
