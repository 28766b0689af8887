//! Study set pack types
//!
//! The serialized pack is the artifact that gets staged, hashed and
//! published. Field order is fixed by the struct definitions, so the same
//! pack always serializes to the same bytes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use studyforge_common::config::QuestionBounds;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::types::{Hash256, UnitKey};
use studyforge_common::STUDY_SET_FORMAT;
use validator::{Validate, ValidationError};

/// Question category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Fill in or recognize a lyric line
    Recall,
    /// Pick the right translation of a line
    #[serde(alias = "translation-choice", alias = "translation_choice")]
    Translation,
    /// Background knowledge about the song
    #[serde(alias = "trivia-choice", alias = "trivia_choice")]
    Trivia,
}

impl QuestionKind {
    pub const ALL: [QuestionKind; 3] = [QuestionKind::Recall, QuestionKind::Translation, QuestionKind::Trivia];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Recall => "recall",
            QuestionKind::Translation => "translation",
            QuestionKind::Trivia => "trivia",
        }
    }
}

/// One multiple-choice question. Option counts come from the configured
/// bounds, so validation takes them as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(context = QuestionBounds)]
pub struct Question {
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[validate(custom(function = "not_blank"))]
    pub prompt: String,
    #[validate(custom(function = "valid_options", use_context))]
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

fn not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message("missing or empty".into()));
    }
    Ok(())
}

fn valid_options(options: &[String], bounds: &QuestionBounds) -> std::result::Result<(), ValidationError> {
    if options.len() < bounds.min_options || options.len() > bounds.max_options {
        return Err(ValidationError::new("count").with_message(
            format!(
                "{} options, expected {}-{}",
                options.len(),
                bounds.min_options,
                bounds.max_options
            )
            .into(),
        ));
    }
    if options.iter().any(|o| o.trim().is_empty()) {
        return Err(ValidationError::new("blank").with_message("empty option".into()));
    }
    let distinct: HashSet<String> = options.iter().map(|o| o.trim().to_lowercase()).collect();
    if distinct.len() != options.len() {
        return Err(ValidationError::new("duplicate").with_message("duplicate options".into()));
    }
    Ok(())
}

/// Validated study set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySetPack {
    pub format: String,
    pub unit_id: Hash256,
    pub language: String,
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub questions: Vec<Question>,
}

impl StudySetPack {
    pub fn new(key: &UnitKey, title: Option<String>, artist: Option<String>, questions: Vec<Question>) -> Self {
        Self {
            format: STUDY_SET_FORMAT.to_string(),
            unit_id: *key.unit_id(),
            language: key.language().to_string(),
            version: key.version(),
            title,
            artist,
            questions,
        }
    }

    /// Serialized bytes, as staged and hashed
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a pack previously produced by `to_bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let pack: StudySetPack = serde_json::from_slice(bytes)?;
        if pack.format != STUDY_SET_FORMAT {
            return Err(AppError::Internal {
                message: format!("unsupported study set format: {}", pack.format),
            });
        }
        Ok(pack)
    }

    pub fn count(&self, kind: QuestionKind) -> usize {
        self.questions.iter().filter(|q| q.kind == kind).count()
    }
}
