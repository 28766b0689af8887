//! Content addressing and hash-verified retrieval
//!
//! Provides:
//! - `ContentRef`: parsed storage references (`ipfs://`, `ar://`, `ls3://`, http)
//! - `GatewayResolver`: reference → candidate URLs in fallback order
//! - `ContentFetcher`: fetch with gateway fallback, optional hash verification

mod fetcher;
mod memory;
mod resolver;

pub use fetcher::{verify_bytes, ContentFetcher, HttpFetcher};
pub use memory::InMemoryContentStore;
pub use resolver::GatewayResolver;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use studyforge_common::errors::{AppError, Result};

/// A storage reference with its addressing scheme made explicit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentRef {
    /// IPFS CID
    Ipfs(String),
    /// Arweave transaction / data item id (permanent)
    Arweave(String),
    /// Load S3 data item id (staging)
    Ls3(String),
    /// Plain HTTP(S) URL
    Http(String),
}

impl ContentRef {
    /// Scheme name, as used in logs and metrics labels
    pub fn scheme(&self) -> &'static str {
        match self {
            ContentRef::Ipfs(_) => "ipfs",
            ContentRef::Arweave(_) => "ar",
            ContentRef::Ls3(_) => "ls3",
            ContentRef::Http(_) => "http",
        }
    }
}

fn looks_like_cid(raw: &str) -> bool {
    (raw.starts_with("Qm") && raw.len() == 46) || (raw.starts_with("baf") && raw.len() > 50)
}

fn non_empty(id: &str, raw: &str) -> Result<String> {
    let id = id.trim().trim_matches('/');
    if id.is_empty() || id.contains(char::is_whitespace) {
        return Err(AppError::InvalidRequest {
            message: format!("empty or malformed content reference: {}", raw),
            field: None,
        });
    }
    Ok(id.to_string())
}

impl FromStr for ContentRef {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();

        if let Some(cid) = raw.strip_prefix("ipfs://") {
            return Ok(ContentRef::Ipfs(non_empty(cid, raw)?));
        }
        if let Some(id) = raw.strip_prefix("ar://") {
            return Ok(ContentRef::Arweave(non_empty(id, raw)?));
        }
        if let Some(id) = raw
            .strip_prefix("ls3://")
            .or_else(|| raw.strip_prefix("load-s3://"))
        {
            return Ok(ContentRef::Ls3(non_empty(id, raw)?));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(ContentRef::Http(raw.to_string()));
        }
        if looks_like_cid(raw) {
            return Ok(ContentRef::Ipfs(raw.to_string()));
        }

        Err(AppError::InvalidRequest {
            message: format!("unsupported content reference: {}", raw),
            field: None,
        })
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRef::Ipfs(cid) => write!(f, "ipfs://{}", cid),
            ContentRef::Arweave(id) => write!(f, "ar://{}", id),
            ContentRef::Ls3(id) => write!(f, "ls3://{}", id),
            ContentRef::Http(url) => f.write_str(url),
        }
    }
}

impl Serialize for ContentRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
