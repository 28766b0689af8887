//! Song annotation enrichment
//!
//! Annotations feed the trivia questions. The engine treats any failure here
//! as a warning, never as a generation failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use studyforge_common::config::EnrichmentConfig;
use studyforge_common::errors::{AppError, Result};
use tracing::{debug, instrument};

/// A lyric fragment and what is known about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub fragment: String,
    pub body: String,
}

#[async_trait]
pub trait AnnotationProvider: Send + Sync {
    /// Annotations for the song, empty when nothing is known
    async fn annotations(&self, title: &str, artist: Option<&str>) -> Result<Vec<Annotation>>;

    fn name(&self) -> &str;
}

/// Provider used when enrichment is disabled
pub struct NoAnnotations;

#[async_trait]
impl AnnotationProvider for NoAnnotations {
    async fn annotations(&self, _title: &str, _artist: Option<&str>) -> Result<Vec<Annotation>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Genius API client
pub struct GeniusAnnotations {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    max_annotations: usize,
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    result: SearchResult,
}

#[derive(Deserialize)]
struct SearchResult {
    id: u64,
}

#[derive(Deserialize)]
struct ReferentsResponse {
    #[serde(default)]
    referents: Vec<Referent>,
}

#[derive(Deserialize)]
struct Referent {
    #[serde(default)]
    fragment: String,
    #[serde(default)]
    annotations: Vec<RawAnnotation>,
}

#[derive(Deserialize)]
struct RawAnnotation {
    body: AnnotationBody,
}

#[derive(Deserialize)]
struct AnnotationBody {
    #[serde(default)]
    plain: String,
}

fn enrichment_error(message: String) -> AppError {
    AppError::Internal {
        message: format!("enrichment failed: {}", message),
    }
}

impl GeniusAnnotations {
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        max_annotations: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            max_annotations,
        })
    }

    pub fn from_config(config: &EnrichmentConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.access_token.clone(),
            config.max_annotations,
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let mut request = self.client.get(format!("{}{}", self.base_url, path)).query(query);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| enrichment_error(format!("{} request failed: {}", path, e)))?;
        if !response.status().is_success() {
            return Err(enrichment_error(format!("{} returned {}", path, response.status())));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| enrichment_error(format!("{} returned malformed body: {}", path, e)))?;
        Ok(envelope.response)
    }
}

#[async_trait]
impl AnnotationProvider for GeniusAnnotations {
    #[instrument(skip(self))]
    async fn annotations(&self, title: &str, artist: Option<&str>) -> Result<Vec<Annotation>> {
        let q = match artist {
            Some(artist) => format!("{} {}", title, artist),
            None => title.to_string(),
        };

        let search: SearchResponse = self.get("/search", &[("q", q)]).await?;
        let Some(hit) = search.hits.into_iter().next() else {
            debug!("No song match for annotations");
            return Ok(Vec::new());
        };

        let referents: ReferentsResponse = self
            .get(
                "/referents",
                &[
                    ("song_id", hit.result.id.to_string()),
                    ("text_format", "plain".to_string()),
                ],
            )
            .await?;

        let annotations: Vec<Annotation> = referents
            .referents
            .into_iter()
            .flat_map(|r| {
                let fragment = r.fragment.trim().to_string();
                r.annotations.into_iter().map(move |a| Annotation {
                    fragment: fragment.clone(),
                    body: a.body.plain.trim().to_string(),
                })
            })
            .filter(|a| !a.fragment.is_empty() && !a.body.is_empty())
            .take(self.max_annotations)
            .collect();

        debug!(count = annotations.len(), song_id = hit.result.id, "Fetched annotations");
        Ok(annotations)
    }

    fn name(&self) -> &str {
        "genius"
    }
}
