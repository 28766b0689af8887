//! Hash-verified fetcher
//!
//! `fetch` walks the resolver's candidates until one returns a non-empty 2xx
//! body. `fetch_and_verify` adds a SHA-256 check over the raw bytes.

use super::{ContentRef, GatewayResolver};
use async_trait::async_trait;
use std::time::Duration;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::types::Hash256;
use tracing::{debug, error, instrument, warn};

/// Anything that can produce bytes for a content reference
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Retrieve the bytes behind `reference`
    async fn fetch(&self, reference: &ContentRef) -> Result<Vec<u8>>;

    /// Retrieve and check `sha256(bytes) == expected`
    async fn fetch_and_verify(&self, reference: &ContentRef, expected: &Hash256) -> Result<Vec<u8>> {
        let bytes = self.fetch(reference).await?;
        verify_bytes(reference, &bytes, expected)?;
        Ok(bytes)
    }
}

/// Compare the digest of `bytes` against `expected`
pub fn verify_bytes(reference: &ContentRef, bytes: &[u8], expected: &Hash256) -> Result<()> {
    let actual = Hash256::digest(bytes);
    if &actual != expected {
        error!(
            reference = %reference,
            expected = %expected,
            actual = %actual,
            size = bytes.len(),
            "Content hash mismatch"
        );
        return Err(AppError::HashMismatch {
            reference: reference.to_string(),
            expected: *expected,
            actual,
        });
    }
    Ok(())
}

/// Gateway-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
    resolver: GatewayResolver,
}

impl HttpFetcher {
    pub fn new(resolver: GatewayResolver, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, resolver })
    }

    pub fn resolver(&self) -> &GatewayResolver {
        &self.resolver
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    #[instrument(skip_all, fields(reference = %reference))]
    async fn fetch(&self, reference: &ContentRef) -> Result<Vec<u8>> {
        let candidates = self.resolver.candidates(reference);
        let mut last_status = None;
        let mut last_message = "no candidate URLs".to_string();

        for url in &candidates {
            let response = match self.client.get(url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "Gateway request failed, trying next");
                    last_message = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                warn!(url = %url, status = status.as_u16(), "Gateway returned error status, trying next");
                last_status = Some(status.as_u16());
                last_message = format!("HTTP {}", status.as_u16());
                continue;
            }

            match response.bytes().await {
                Ok(body) if !body.is_empty() => {
                    debug!(url = %url, size = body.len(), "Fetched content");
                    return Ok(body.to_vec());
                }
                Ok(_) => {
                    warn!(url = %url, "Gateway returned empty body, trying next");
                    last_status = Some(status.as_u16());
                    last_message = "empty body".to_string();
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed reading gateway body, trying next");
                    last_status = Some(status.as_u16());
                    last_message = e.to_string();
                }
            }
        }

        Err(AppError::ResolutionFailed {
            reference: reference.to_string(),
            attempts: candidates.len(),
            last_status,
            message: last_message,
        })
    }
}
