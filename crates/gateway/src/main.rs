//! StudyForge API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Rate limiting
//! - Request routing to the study set pipeline
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use studyforge_common::{config::AppConfig, db::DbPool, metrics};
use studyforge_pipeline::{build_pipeline, StudySetPipeline};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<StudySetPipeline>,
    /// Lock database, when locks live in Postgres
    pub db: Option<DbPool>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    // Initialize tracing; RUST_LOG wins over the configured level
    init_tracing(&config);

    info!("Starting StudyForge API Gateway v{}", studyforge_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        prometheus_builder()?
            .with_http_listener(metrics_addr)
            .install()?;
        info!("Metrics exporter listening on {}", metrics_addr);
    }
    metrics::register_metrics();

    // Initialize database connection (lock table only)
    let db = if config.lock.backend == "postgres" {
        info!("Connecting to database...");
        let db = DbPool::new(&config.database).await?;
        db.apply_schema().await?;
        Some(db)
    } else {
        None
    };

    let pipeline = build_pipeline(&config, db.clone())?;

    // Create app state
    let state = AppState {
        config: config.clone(),
        pipeline: Arc::new(pipeline),
        db,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Exporter whose latency histograms use the pipeline's stage buckets
fn prometheus_builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Suffix("_duration_seconds".to_string()),
        metrics::LATENCY_BUCKETS,
    )
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let mut api_routes = Router::new()
        .route("/study-sets/generate", post(handlers::study_sets::generate))
        .route(
            "/study-sets/{unit_id}/{language}/{version}",
            get(handlers::study_sets::get_study_set),
        );

    let rate_limit = &state.config.rate_limit;
    if rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            rate_limit.requests_per_second,
            rate_limit.burst,
        );
        let limit = rate_limit.requests_per_second;
        api_routes = api_routes.layer(axum::middleware::from_fn(
            move |request: axum::extract::Request, next: axum::middleware::Next| {
                middleware::rate_limit::rate_limit_middleware(request, next, limiter.clone(), limit)
            },
        ));
    }

    // Compose the app
    Router::new()
        // Health endpoints (not rate limited)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use studyforge_common::config::{ContentConfig, QuestionBounds};
    use studyforge_common::types::{Address, Hash256};
    use studyforge_pipeline::content::{ContentRef, GatewayResolver, InMemoryContentStore};
    use studyforge_pipeline::generation::{GenerationEngine, MockCompletionProvider, NoAnnotations};
    use studyforge_pipeline::lock::{InMemoryLockStore, LockManager};
    use studyforge_pipeline::publisher::Publisher;
    use studyforge_pipeline::registry::{CanonicalInputRecord, InMemoryRegistry, RegistryReader};
    use studyforge_pipeline::staging::StagingService;
    use studyforge_pipeline::PipelineComponents;
    use tower::ServiceExt;

    const LYRICS: &[u8] = b"Hola mundo\nAdios amigo\n";

    fn payer() -> Address {
        "0x00000000000000000000000000000000000000aa".parse().unwrap()
    }

    fn unit_id() -> Hash256 {
        Hash256::digest(b"track-1")
    }

    async fn app_with(config: AppConfig) -> (Router, InMemoryRegistry) {
        let registry = InMemoryRegistry::new();
        let content = InMemoryContentStore::new();

        let reference = ContentRef::Ipfs("bafylyrics".into());
        content.put(reference.clone(), LYRICS.to_vec()).await;
        registry
            .approve_input(
                unit_id(),
                CanonicalInputRecord {
                    reference,
                    hash: Hash256::digest(LYRICS),
                    version: 1,
                    submitter: payer(),
                    timestamp: 1_700_000_000,
                },
            )
            .await;
        registry.set_credits(&payer(), 3).await;

        let shared = Arc::new(registry.clone());
        let pipeline = StudySetPipeline::new(PipelineComponents {
            reader: RegistryReader::new(shared.clone(), shared.clone()),
            fetcher: Arc::new(content.clone()),
            locks: LockManager::new(Arc::new(InMemoryLockStore::new()), Duration::from_secs(120)),
            generator: Arc::new(GenerationEngine::new(
                Arc::new(MockCompletionProvider::valid()),
                Arc::new(NoAnnotations),
                QuestionBounds::default(),
            )),
            staging: StagingService::new(Arc::new(content), 768 * 1024),
            publisher: Publisher::new(shared),
            resolver: GatewayResolver::from_config(&ContentConfig::default()),
            default_submitter: payer(),
        });

        let state = AppState {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            db: None,
        };
        (create_router(state), registry)
    }

    async fn app() -> (Router, InMemoryRegistry) {
        app_with(AppConfig::default()).await
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn generate_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/study-sets/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_latency_histograms_use_stage_buckets() {
        let recorder = prometheus_builder().unwrap().build_recorder();
        ::metrics::with_local_recorder(&recorder, || metrics::record_provider(42.0, "mock", true));

        let rendered = recorder.handle().render();
        assert!(rendered.contains("studyforge_provider_duration_seconds_bucket"));
        assert!(rendered.contains("le=\"120\""));
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_without_database() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ready");
        assert!(body["checks"].get("database").is_none());
    }

    #[tokio::test]
    async fn test_generate_then_lookup() {
        let (app, registry) = app().await;

        let response = app
            .clone()
            .oneshot(generate_request(json!({
                "unitId": unit_id().to_string(),
                "language": "en",
                "submitter": payer().to_string(),
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["cached"], false);
        assert!(body["registry"]["txId"].is_string());
        assert!(body["storage"]["permanentRef"].as_str().unwrap().starts_with("ar://"));
        assert_eq!(body["generation"]["model"], "mock");
        assert_eq!(registry.published_count().await, 1);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/study-sets/{}/en/1", unit_id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["cached"], true);
        assert!(body.get("generation").is_none());
    }

    #[tokio::test]
    async fn test_lookup_missing_is_404() {
        let (app, _) = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/study-sets/{}/fr/1", unit_id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "study_set_not_found");
    }

    #[tokio::test]
    async fn test_malformed_body_is_400_before_any_registry_call() {
        let (app, registry) = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/study-sets/generate")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"unitId\":"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "invalid_request");
        assert_eq!(registry.write_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_fields_are_400() {
        let (app, _) = app().await;
        let response = app
            .oneshot(generate_request(json!({ "unitId": "0xabc", "language": "en" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["field"], "unitId");
    }

    #[tokio::test]
    async fn test_unfunded_submitter_is_402() {
        let (app, registry) = app().await;
        let broke = "0x00000000000000000000000000000000000000bb";
        let response = app
            .oneshot(generate_request(json!({
                "unitId": unit_id().to_string(),
                "language": "en",
                "submitter": broke,
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["code"], "insufficient_credits");
        assert_eq!(body["availableCredits"], 0);
        assert_eq!(body["requiredCredits"], 1);
        assert_eq!(registry.write_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_api_only() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let (app, _) = app_with(config).await;

        let lookup = || {
            Request::builder()
                .uri(format!("/v1/study-sets/{}/fr/1", unit_id()))
                .body(Body::empty())
                .unwrap()
        };
        let first = app.clone().oneshot(lookup()).await.unwrap();
        assert_eq!(first.status(), StatusCode::NOT_FOUND);
        let second = app.clone().oneshot(lookup()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(second).await["code"], "rate_limited");

        let health = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }
}
