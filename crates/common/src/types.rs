//! Core identifier types shared by every StudyForge service
//!
//! - `Hash256`: SHA-256 digests, rendered as `0x`-prefixed lowercase hex
//! - `Address`: 20-byte account addresses (credit payers, lock owners)
//! - `UnitKey`: the `(unitId, language, version)` slot a study set lives in

use crate::errors::{AppError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted length of a language tag
pub const MAX_LANGUAGE_LEN: usize = 64;

/// 32-byte SHA-256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash the exact byte sequence, with no normalization
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without the `0x` prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl FromStr for Hash256 {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let clean = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if clean.len() != 64 {
            return Err(AppError::InvalidRequest {
                message: format!("expected 32-byte hex hash, got {} hex chars", clean.len()),
                field: None,
            });
        }

        let mut out = [0u8; 32];
        hex::decode_to_slice(clean, &mut out).map_err(|e| AppError::InvalidRequest {
            message: format!("invalid hex hash: {}", e),
            field: None,
        })?;
        Ok(Self(out))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 20-byte account address, normalized to lowercase `0x` hex
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl FromStr for Address {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let valid = trimmed.len() == 42
            && trimmed.starts_with("0x")
            && trimmed.bytes().skip(2).all(|b| b.is_ascii_hexdigit());

        if !valid {
            return Err(AppError::InvalidRequest {
                message: format!("invalid address: {}", trimmed),
                field: None,
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity of one generation task and one registry slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitKey {
    unit_id: Hash256,
    language: String,
    version: u8,
}

impl UnitKey {
    /// Build a key, rejecting empty or oversized language tags and version 0.
    ///
    /// The language tag is trimmed and lowercased so `"ES "` and `"es"` name
    /// the same slot.
    pub fn new(unit_id: Hash256, language: &str, version: u8) -> Result<Self> {
        let language = language.trim().to_ascii_lowercase();
        if language.is_empty() {
            return Err(AppError::InvalidRequest {
                message: "language must not be empty".into(),
                field: Some("language".into()),
            });
        }
        if language.len() > MAX_LANGUAGE_LEN {
            return Err(AppError::InvalidRequest {
                message: format!("language tag longer than {} bytes", MAX_LANGUAGE_LEN),
                field: Some("language".into()),
            });
        }
        if language.chars().any(|c| c.is_control() || c == '/') {
            return Err(AppError::InvalidRequest {
                message: "language contains reserved characters".into(),
                field: Some("language".into()),
            });
        }
        if version == 0 {
            return Err(AppError::InvalidRequest {
                message: "version must be between 1 and 255".into(),
                field: Some("version".into()),
            });
        }

        Ok(Self {
            unit_id,
            language,
            version,
        })
    }

    pub fn unit_id(&self) -> &Hash256 {
        &self.unit_id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Key of the generation lock guarding this slot
    pub fn lock_key(&self) -> String {
        format!("studyset:{}:{}:{}", self.unit_id, self.language, self.version)
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/v{}", self.unit_id, self.language, self.version)
    }
}
