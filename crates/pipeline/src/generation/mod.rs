//! Study set generation
//!
//! Provides:
//! - Lyrics document parsing
//! - Best-effort annotation enrichment
//! - Deterministic prompt assembly and fingerprinting
//! - Provider invocation and structural validation of its output

mod enrichment;
mod lyrics;
mod pack;
mod prompt;
mod provider;
mod validate;

pub use enrichment::{Annotation, AnnotationProvider, GeniusAnnotations, NoAnnotations};
pub use lyrics::LyricsDocument;
pub use pack::{Question, QuestionKind, StudySetPack};
pub use prompt::Prompt;
pub use provider::{canned_questions, CompletionProvider, MockCompletionProvider, OpenAiProvider};
pub use validate::{strip_code_fence, validate_output};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use studyforge_common::config::QuestionBounds;
use studyforge_common::errors::Result;
use studyforge_common::types::{Hash256, UnitKey};
use tracing::{info, instrument, warn};

/// Everything needed to generate one study set
#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub key: UnitKey,
    pub lyrics: LyricsDocument,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    #[serde(skip)]
    pub pack: StudySetPack,
    pub model: String,
    /// Fingerprint of the exact provider inputs, for audit
    pub prompt_hash: Hash256,
    pub warnings: Vec<String>,
}

/// Boundary to whatever produces study sets
#[async_trait]
pub trait StudySetGenerator: Send + Sync {
    async fn generate(&self, input: &GenerationInput) -> Result<GenerationOutput>;
}

pub struct GenerationEngine {
    provider: Arc<dyn CompletionProvider>,
    annotations: Arc<dyn AnnotationProvider>,
    bounds: QuestionBounds,
}

impl GenerationEngine {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        annotations: Arc<dyn AnnotationProvider>,
        bounds: QuestionBounds,
    ) -> Self {
        Self {
            provider,
            annotations,
            bounds,
        }
    }

    async fn enrich(&self, lyrics: &LyricsDocument, warnings: &mut Vec<String>) -> Vec<Annotation> {
        let Some(title) = lyrics.title.as_deref() else {
            if self.annotations.name() != "none" {
                warnings.push("no title in lyrics document; skipped annotation lookup".into());
            }
            return Vec::new();
        };

        match self.annotations.annotations(title, lyrics.artist.as_deref()).await {
            Ok(found) => found,
            Err(e) => {
                warn!(provider = self.annotations.name(), error = %e, "Annotation lookup failed, continuing without");
                warnings.push(format!("annotations unavailable: {}", e));
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl StudySetGenerator for GenerationEngine {
    #[instrument(skip_all, fields(unit_key = %input.key, model = self.provider.model()))]
    async fn generate(&self, input: &GenerationInput) -> Result<GenerationOutput> {
        let mut warnings = Vec::new();
        let annotations = self.enrich(&input.lyrics, &mut warnings).await;

        let prompt = Prompt::build(&input.lyrics, input.key.language(), &annotations, &self.bounds);
        let model = self.provider.model().to_string();
        let prompt_hash = prompt.fingerprint(&model, self.provider.temperature());

        let raw = self.provider.complete(&prompt).await?;
        let pack = validate_output(
            &raw,
            &input.key,
            input.lyrics.title.clone(),
            input.lyrics.artist.clone(),
            !annotations.is_empty(),
            &self.bounds,
        )?;

        info!(
            questions = pack.questions.len(),
            annotations = annotations.len(),
            prompt_hash = %prompt_hash,
            "Study set generated"
        );

        Ok(GenerationOutput {
            pack,
            model,
            prompt_hash,
            warnings,
        })
    }
}
