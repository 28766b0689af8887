//! Registry relay client
//!
//! The relay holds the signing keys and exposes both registries over JSON.
//! Write outcomes are decided by HTTP status alone.

use super::{CanonicalInputRecord, InputRegistry, OutputRegistry, PublishOutcome, PublishedRecord};
use crate::content::ContentRef;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use studyforge_common::config::RegistryConfig;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::types::{Address, Hash256, UnitKey};
use tracing::{debug, instrument, warn};

/// HTTP client for the registry relay
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayInput {
    #[serde(rename = "ref")]
    reference: String,
    hash: Hash256,
    version: u8,
    submitter: Address,
    timestamp: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayOutput {
    exists: bool,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
    hash: Option<Hash256>,
    submitter: Option<Address>,
    #[serde(default)]
    created_at: u64,
}

#[derive(Deserialize)]
struct RelayCredits {
    credits: u64,
}

#[derive(Deserialize)]
struct RelayRequired {
    required: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FulfillRequest<'a> {
    submitter: &'a Address,
    unit_id: &'a Hash256,
    language: &'a str,
    version: u8,
    #[serde(rename = "ref")]
    reference: String,
    hash: &'a Hash256,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FulfillResponse {
    tx_id: String,
}

fn read_failed(message: impl Into<String>) -> AppError {
    AppError::RegistryReadFailed {
        message: message.into(),
    }
}

impl RegistryClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim()).map_err(|e| AppError::Configuration {
            message: format!("invalid registry base URL {}: {}", base_url, e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Configuration {
                message: format!("registry base URL cannot carry paths: {}", base_url),
            });
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// GET returning `None` on 404
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<Option<T>> {
        let response = self
            .authorized(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| read_failed(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(read_failed(format!("GET {} returned {}: {}", url, status, body)));
        }

        let value = response
            .json::<T>()
            .await
            .map_err(|e| read_failed(format!("GET {} returned malformed body: {}", url, e)))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl InputRegistry for RegistryClient {
    #[instrument(skip(self), fields(unit_id = %unit_id))]
    async fn get_input(&self, unit_id: &Hash256) -> Result<Option<CanonicalInputRecord>> {
        let url = self.endpoint(&["inputs", &unit_id.to_string()]);
        let Some(raw) = self.get_json::<RelayInput>(url).await? else {
            return Ok(None);
        };

        let reference = raw
            .reference
            .parse::<ContentRef>()
            .map_err(|_| AppError::InputUnreadable {
                message: format!("unsupported input reference: {}", raw.reference),
            })?;

        Ok(Some(CanonicalInputRecord {
            reference,
            hash: raw.hash,
            version: raw.version,
            submitter: raw.submitter,
            timestamp: raw.timestamp,
        }))
    }
}

#[async_trait]
impl OutputRegistry for RegistryClient {
    #[instrument(skip(self), fields(unit_key = %key))]
    async fn get_output(&self, key: &UnitKey) -> Result<Option<PublishedRecord>> {
        let url = self.endpoint(&[
            "outputs",
            &key.unit_id().to_string(),
            key.language(),
            &key.version().to_string(),
        ]);
        let Some(raw) = self.get_json::<RelayOutput>(url).await? else {
            return Ok(None);
        };
        if !raw.exists {
            return Ok(None);
        }

        match (raw.reference, raw.hash, raw.submitter) {
            (Some(reference), Some(hash), Some(submitter)) => {
                let reference = reference
                    .parse::<ContentRef>()
                    .map_err(|e| read_failed(format!("published ref is malformed: {}", e)))?;
                Ok(Some(PublishedRecord {
                    reference,
                    hash,
                    submitter,
                    created_at: raw.created_at,
                }))
            }
            _ => Err(read_failed("published record is missing ref, hash or submitter")),
        }
    }

    async fn credits_of(&self, address: &Address) -> Result<u64> {
        let url = self.endpoint(&["credits", address.as_str()]);
        let credits = self.get_json::<RelayCredits>(url).await?;
        // Unknown accounts hold nothing
        Ok(credits.map(|c| c.credits).unwrap_or(0))
    }

    async fn required_credits(&self) -> Result<u64> {
        let url = self.endpoint(&["credits", "required"]);
        self.get_json::<RelayRequired>(url)
            .await?
            .map(|r| r.required)
            .ok_or_else(|| read_failed("relay does not report required credits"))
    }

    #[instrument(skip(self, reference, hash), fields(unit_key = %key, submitter = %submitter))]
    async fn fulfill_from_credit(
        &self,
        submitter: &Address,
        key: &UnitKey,
        reference: &ContentRef,
        hash: &Hash256,
    ) -> Result<PublishOutcome> {
        let url = self.endpoint(&["outputs", "fulfill"]);
        let body = FulfillRequest {
            submitter,
            unit_id: key.unit_id(),
            language: key.language(),
            version: key.version(),
            reference: reference.to_string(),
            hash,
        };

        let response = match self.authorized(self.client.post(url)).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Registry write request failed");
                return Ok(PublishOutcome::Failed(e.to_string()));
            }
        };

        let status = response.status();
        let outcome = match status {
            StatusCode::OK | StatusCode::CREATED => match response.json::<FulfillResponse>().await {
                Ok(body) => PublishOutcome::Confirmed { tx_id: body.tx_id },
                Err(e) => PublishOutcome::Failed(format!("confirmed write with unreadable receipt: {}", e)),
            },
            StatusCode::CONFLICT => PublishOutcome::AlreadyPublished,
            StatusCode::PAYMENT_REQUIRED => PublishOutcome::InsufficientCredits,
            _ => {
                let text = response.text().await.unwrap_or_default();
                PublishOutcome::Failed(format!("HTTP {}: {}", status.as_u16(), text))
            }
        };

        debug!(status = status.as_u16(), outcome = ?outcome, "Registry write finished");
        Ok(outcome)
    }
}
