//! Configuration management for StudyForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (lock table)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Generation lock configuration
    #[serde(default)]
    pub lock: LockConfig,

    /// Content gateway configuration
    #[serde(default)]
    pub content: ContentConfig,

    /// Registry relay configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Generation provider configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Annotation enrichment configuration
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Staging and anchoring configuration
    #[serde(default)]
    pub staging: StagingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    /// Lock store backend: postgres, memory
    #[serde(default = "default_lock_backend")]
    pub backend: String,

    /// Lock time-to-live in seconds; must exceed worst-case generate+publish latency
    #[serde(default = "default_lock_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentConfig {
    /// IPFS gateways in priority order
    #[serde(default = "default_ipfs_gateways")]
    pub ipfs_gateways: Vec<String>,

    /// Arweave gateways in priority order
    #[serde(default = "default_arweave_gateways")]
    pub arweave_gateways: Vec<String>,

    /// Load S3 gateway (serves `ls3://` and cached Arweave items)
    #[serde(default = "default_ls3_gateway")]
    pub ls3_gateway: String,

    /// Per-candidate request timeout in seconds
    #[serde(default = "default_content_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Registry backend: http, memory
    #[serde(default = "default_registry_backend")]
    pub backend: String,

    /// Relay base URL
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    /// Relay API key
    pub api_key: Option<String>,

    /// Address that pays credits when a request names no submitter
    #[serde(default = "default_sponsor_address")]
    pub sponsor_address: String,

    /// Request timeout in seconds
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Provider: openai, mock
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// API key for the provider
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for transient provider failures
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,

    /// Question count bounds
    #[serde(default)]
    pub bounds: QuestionBounds,
}

/// Inclusive per-category question count bounds
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QuestionBounds {
    #[serde(default = "default_recall_min")]
    pub recall_min: usize,
    #[serde(default = "default_recall_max")]
    pub recall_max: usize,
    #[serde(default = "default_translation_min")]
    pub translation_min: usize,
    #[serde(default = "default_translation_max")]
    pub translation_max: usize,
    /// Trivia minimum, applied only when annotation context was available
    #[serde(default = "default_trivia_min")]
    pub trivia_min: usize,
    #[serde(default = "default_trivia_max")]
    pub trivia_max: usize,
    #[serde(default = "default_min_options")]
    pub min_options: usize,
    #[serde(default = "default_max_options")]
    pub max_options: usize,
    #[serde(default = "default_max_total")]
    pub max_total: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    /// Provider: genius, none
    #[serde(default = "default_enrichment_provider")]
    pub provider: String,

    /// API base URL
    #[serde(default = "default_enrichment_url")]
    pub base_url: String,

    /// Access token
    pub access_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,

    /// Maximum annotations fed into the prompt
    #[serde(default = "default_max_annotations")]
    pub max_annotations: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagingConfig {
    /// Staging backend: load, memory
    #[serde(default = "default_staging_backend")]
    pub backend: String,

    /// Load S3 agent URL
    #[serde(default = "default_agent_url")]
    pub agent_url: String,

    /// Upload path on the agent
    #[serde(default = "default_upload_path")]
    pub upload_path: String,

    /// Agent API key
    pub api_key: Option<String>,

    /// Gateway serving staged items
    #[serde(default = "default_ls3_gateway")]
    pub gateway_url: String,

    /// Gateway serving anchored items
    #[serde(default = "default_arweave_gateway")]
    pub arweave_gateway_url: String,

    /// Maximum artifact size in bytes
    #[serde(default = "default_max_artifact_bytes")]
    pub max_bytes: usize,

    /// Request timeout in seconds
    #[serde(default = "default_staging_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_database_url() -> String { "postgres://localhost/studyforge".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_lock_backend() -> String { "postgres".to_string() }
fn default_lock_ttl() -> u64 { 120 }
fn default_ipfs_gateways() -> Vec<String> {
    vec!["https://ipfs.filebase.io".to_string(), "https://ipfs.io".to_string()]
}
fn default_arweave_gateway() -> String { "https://arweave.net".to_string() }
fn default_arweave_gateways() -> Vec<String> { vec![default_arweave_gateway()] }
fn default_ls3_gateway() -> String { "https://gateway.s3-node-1.load.network".to_string() }
fn default_content_timeout() -> u64 { 20 }
fn default_registry_backend() -> String { "http".to_string() }
fn default_registry_url() -> String { "http://127.0.0.1:8787".to_string() }
fn default_sponsor_address() -> String { "0x0000000000000000000000000000000000000000".to_string() }
fn default_registry_timeout() -> u64 { 30 }
fn default_generation_provider() -> String { "openai".to_string() }
fn default_generation_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.4 }
fn default_generation_timeout() -> u64 { 60 }
fn default_generation_retries() -> u32 { 2 }
fn default_recall_min() -> usize { 4 }
fn default_recall_max() -> usize { 12 }
fn default_translation_min() -> usize { 4 }
fn default_translation_max() -> usize { 12 }
fn default_trivia_min() -> usize { 2 }
fn default_trivia_max() -> usize { 8 }
fn default_min_options() -> usize { 2 }
fn default_max_options() -> usize { 6 }
fn default_max_total() -> usize { 30 }
fn default_enrichment_provider() -> String { "genius".to_string() }
fn default_enrichment_url() -> String { "https://api.genius.com".to_string() }
fn default_enrichment_timeout() -> u64 { 10 }
fn default_max_annotations() -> usize { 12 }
fn default_staging_backend() -> String { "load".to_string() }
fn default_agent_url() -> String { "https://load-s3-agent.load.network".to_string() }
fn default_upload_path() -> String { "/upload".to_string() }
fn default_max_artifact_bytes() -> usize { 768 * 1024 }
fn default_staging_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "studyforge".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: default_lock_backend(),
            ttl_secs: default_lock_ttl(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            ipfs_gateways: default_ipfs_gateways(),
            arweave_gateways: default_arweave_gateways(),
            ls3_gateway: default_ls3_gateway(),
            timeout_secs: default_content_timeout(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: default_registry_backend(),
            base_url: default_registry_url(),
            api_key: None,
            sponsor_address: default_sponsor_address(),
            timeout_secs: default_registry_timeout(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_key: None,
            api_base: None,
            model: default_generation_model(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            bounds: QuestionBounds::default(),
        }
    }
}

impl Default for QuestionBounds {
    fn default() -> Self {
        Self {
            recall_min: default_recall_min(),
            recall_max: default_recall_max(),
            translation_min: default_translation_min(),
            translation_max: default_translation_max(),
            trivia_min: default_trivia_min(),
            trivia_max: default_trivia_max(),
            min_options: default_min_options(),
            max_options: default_max_options(),
            max_total: default_max_total(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            provider: default_enrichment_provider(),
            base_url: default_enrichment_url(),
            access_token: None,
            timeout_secs: default_enrichment_timeout(),
            max_annotations: default_max_annotations(),
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            backend: default_staging_backend(),
            agent_url: default_agent_url(),
            upload_path: default_upload_path(),
            api_key: None,
            gateway_url: default_ls3_gateway(),
            arweave_gateway_url: default_arweave_gateway(),
            max_bytes: default_max_artifact_bytes(),
            timeout_secs: default_staging_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            lock: LockConfig::default(),
            content: ContentConfig::default(),
            registry: RegistryConfig::default(),
            generation: GenerationConfig::default(),
            enrichment: EnrichmentConfig::default(),
            staging: StagingConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__LOCK__TTL_SECS=120
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("content.ipfs_gateways")
                    .with_list_parse_key("content.arweave_gateways")
                    .try_parsing(true)
            )

            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock.ttl_secs == 0 {
            return Err(ConfigError::Message("lock.ttl_secs must be positive".into()));
        }
        if self.staging.max_bytes == 0 {
            return Err(ConfigError::Message("staging.max_bytes must be positive".into()));
        }
        if self.content.ipfs_gateways.is_empty() {
            return Err(ConfigError::Message(
                "content.ipfs_gateways needs at least one gateway".into(),
            ));
        }
        let b = &self.generation.bounds;
        if b.recall_min > b.recall_max
            || b.translation_min > b.translation_max
            || b.trivia_min > b.trivia_max
            || b.min_options > b.max_options
            || b.min_options < 2
        {
            return Err(ConfigError::Message("generation.bounds are inconsistent".into()));
        }
        Ok(())
    }

    /// Get lock TTL as Duration
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock.ttl_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}
