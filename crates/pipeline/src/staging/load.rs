//! Load S3 agent client
//!
//! Uploads go to the agent as multipart forms; anchoring asks the agent to
//! post the staged data item to Arweave.

use super::{AnchoredItem, ArtifactStore, StagedUpload, Tag};
use crate::content::ContentRef;
use async_trait::async_trait;
use reqwest::multipart;
use serde_json::Value;
use std::time::Duration;
use studyforge_common::config::StagingConfig;
use studyforge_common::errors::{AppError, Result};
use tracing::{debug, instrument, warn};

pub struct LoadS3Store {
    client: reqwest::Client,
    agent_url: String,
    upload_path: String,
    api_key: Option<String>,
    gateway_url: String,
    arweave_gateway_url: String,
}

fn staging_failed(message: String) -> AppError {
    AppError::StagingFailed { message }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Item id from any of the response shapes the agent has used
fn extract_id(v: &Value, extra: &[&str]) -> Option<String> {
    let mut candidates: Vec<Option<&Value>> = extra.iter().map(|k| v.get(*k)).collect();
    candidates.extend([
        v.get("id"),
        v.get("dataitemId"),
        v.get("dataitem_id"),
        v.get("receipt").and_then(|r| r.get("id")),
        v.get("result").and_then(|r| r.get("id")),
        v.get("result").and_then(|r| r.get("receipt")).and_then(|r| r.get("id")),
    ]);

    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

impl LoadS3Store {
    pub fn new(config: &StagingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let upload_path = if config.upload_path.starts_with('/') {
            config.upload_path.clone()
        } else {
            format!("/{}", config.upload_path)
        };

        Ok(Self {
            client,
            agent_url: config.agent_url.trim_end_matches('/').to_string(),
            upload_path,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            arweave_gateway_url: config.arweave_gateway_url.trim_end_matches('/').to_string(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send_json(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| staging_failed(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(staging_failed(format!(
                "{} failed ({}) {}",
                what,
                status.as_u16(),
                truncate(&body, 400)
            )));
        }

        serde_json::from_str(&body)
            .map_err(|_| staging_failed(format!("{} response not JSON: {}", what, truncate(&body, 400))))
    }

    /// HEAD the permanent URL to see whether it already serves the item
    async fn probe(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "Availability probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl ArtifactStore for LoadS3Store {
    #[instrument(skip(self, bytes, tags), fields(size = bytes.len()))]
    async fn stage(&self, bytes: &[u8], content_type: &str, tags: &[Tag]) -> Result<StagedUpload> {
        let part = multipart::Part::bytes(bytes.to_vec())
            .mime_str(content_type)
            .map_err(|e| staging_failed(format!("invalid content type {}: {}", content_type, e)))?
            .file_name("study-set.json");

        let form = multipart::Form::new()
            .part("file", part)
            .text("content_type", content_type.to_string())
            .text("tags", serde_json::to_string(tags)?);

        let url = format!("{}{}", self.agent_url, self.upload_path);
        let json = self.send_json(self.client.post(url).multipart(form), "upload").await?;
        let id = extract_id(&json, &[])
            .ok_or_else(|| staging_failed(format!("upload response missing id: {}", json)))?;

        debug!(id = %id, "Staged data item");
        Ok(StagedUpload {
            url: format!("{}/resolve/{}", self.gateway_url, id),
            reference: ContentRef::Ls3(id),
        })
    }

    #[instrument(skip(self), fields(staged = %staged))]
    async fn anchor(&self, staged: &ContentRef) -> Result<AnchoredItem> {
        let ContentRef::Ls3(id) = staged else {
            return Err(staging_failed(format!("cannot anchor non-staging ref {}", staged)));
        };

        let url = format!("{}/post/{}", self.agent_url, id);
        let json = self.send_json(self.client.post(url), "anchor").await?;
        let arweave_id = extract_id(&json, &["arweaveId", "arweave_id"])
            .ok_or_else(|| staging_failed(format!("anchor response missing id: {}", json)))?;

        let permanent_url = format!("{}/{}", self.arweave_gateway_url, arweave_id);
        let available = match json.get("available").and_then(Value::as_bool) {
            Some(flag) => flag,
            None => self.probe(&permanent_url).await,
        };
        if !available {
            warn!(arweave_id = %arweave_id, "Anchored item not yet served by gateway");
        }

        Ok(AnchoredItem {
            reference: ContentRef::Arweave(arweave_id),
            url: permanent_url,
            available,
        })
    }
}
