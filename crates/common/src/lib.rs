//! StudyForge Common Library
//!
//! Shared code for the StudyForge services including:
//! - Core identifier types (hashes, addresses, unit keys)
//! - Error types and handling
//! - Configuration management
//! - Database pool and the generation lock entity
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, ErrorCode, Result};
pub use types::{Address, Hash256, UnitKey};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format tag written into every serialized study set
pub const STUDY_SET_FORMAT: &str = "study-set-v1";
