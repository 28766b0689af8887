//! Study set handlers
//!
//! Request parsing and validation happen here, before the pipeline does any
//! I/O. Everything else is the pipeline's result or error, rendered as-is.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use validator::{Validate, ValidationErrors};

use crate::AppState;
use studyforge_common::{
    errors::{AppError, Result},
    types::{Address, Hash256, UnitKey},
};
use studyforge_pipeline::{GenerateRequest, StudySetResult};

fn default_version() -> u8 {
    1
}

/// Request to generate (or fetch the published) study set for one unit
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateStudySetRequest {
    /// 32-byte content id, hex with optional 0x prefix
    #[validate(length(min = 64, max = 66))]
    pub unit_id: String,

    #[validate(length(min = 1, max = 64))]
    pub language: String,

    #[serde(default = "default_version")]
    #[validate(range(min = 1))]
    pub version: u8,

    /// Credit payer and lock owner; defaults to the sponsor
    #[serde(default)]
    pub submitter: Option<String>,
}

impl GenerateStudySetRequest {
    fn into_pipeline_request(self) -> Result<GenerateRequest> {
        self.validate().map_err(validation_error)?;

        let key = parse_key(&self.unit_id, &self.language, self.version)?;
        let submitter = self
            .submitter
            .as_deref()
            .map(|raw| {
                raw.parse::<Address>().map_err(|e| AppError::InvalidRequest {
                    message: e.to_string(),
                    field: Some("submitter".into()),
                })
            })
            .transpose()?;

        Ok(GenerateRequest { key, submitter })
    }
}

/// Body field name as clients send it
fn wire_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn validation_error(errors: ValidationErrors) -> AppError {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by_key(|(name, _)| *name);

    let message = fields
        .iter()
        .map(|(name, errs)| {
            let reasons: Vec<String> = errs.iter().map(|e| e.code.to_string()).collect();
            format!("{}: {}", wire_name(name), reasons.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ");

    AppError::InvalidRequest {
        message,
        field: fields.first().map(|(name, _)| wire_name(name)),
    }
}

fn parse_key(unit_id: &str, language: &str, version: u8) -> Result<UnitKey> {
    let unit_id = unit_id
        .parse::<Hash256>()
        .map_err(|e| AppError::InvalidRequest {
            message: e.to_string(),
            field: Some("unitId".into()),
        })?;
    UnitKey::new(unit_id, language, version)
}

/// Generate, stage and publish a study set, or return the published one
pub async fn generate(
    State(state): State<AppState>,
    payload: std::result::Result<Json<GenerateStudySetRequest>, JsonRejection>,
) -> Result<Json<StudySetResult>> {
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest {
        message: e.body_text(),
        field: None,
    })?;
    let request = request.into_pipeline_request()?;

    tracing::info!(
        unit_key = %request.key,
        submitter = ?request.submitter,
        "Study set requested"
    );

    let result = state.pipeline.run(request).await?;
    Ok(Json(result))
}

/// Published study set for a unit; never generates
pub async fn get_study_set(
    State(state): State<AppState>,
    Path((unit_id, language, version)): Path<(String, String, String)>,
) -> Result<Json<StudySetResult>> {
    let version = version.parse::<u8>().map_err(|_| AppError::InvalidRequest {
        message: format!("version must be between 1 and 255, got {}", version),
        field: Some("version".into()),
    })?;
    let key = parse_key(&unit_id, &language, version)?;

    let result = state.pipeline.lookup(&key).await?;
    Ok(Json(result))
}
