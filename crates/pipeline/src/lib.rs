//! StudyForge Pipeline
//!
//! Turns approved lyrics into a published study set:
//! - Registry reads for canonical inputs and published outputs
//! - Hash-verified content fetching across gateways
//! - Per-unit generation locks with TTL expiry
//! - Study set generation and validation
//! - Staging, anchoring and credit-gated publishing

pub mod bootstrap;
pub mod content;
pub mod generation;
pub mod lock;
pub mod orchestrator;
pub mod publisher;
pub mod registry;
pub mod staging;

pub use bootstrap::build_pipeline;
pub use content::ContentRef;
pub use generation::StudySetPack;
pub use orchestrator::{GenerateRequest, PipelineComponents, StudySetPipeline, StudySetResult};
