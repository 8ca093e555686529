//! LLM response cache with integrity validation.
//!
//! Entries are stored together with a SHA-256 checksum of the response text
//! and re-validated on every read; a mismatching entry is treated as a miss
//! so the stage is sent to the LLM again.

use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::llm_client::LlmRequest;

/// Wrapper for cached data with integrity validation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatedCacheEntry {
    /// The cached LLM response text
    pub data: String,
    /// SHA-256 checksum of the data (hex encoded)
    pub checksum: String,
}

impl ValidatedCacheEntry {
    /// Creates a new validated cache entry with computed checksum
    pub fn new(data: String) -> Self {
        let checksum = sha256_hex(data.as_bytes());
        Self { data, checksum }
    }

    /// Returns true if the checksum matches, false if tampered
    pub fn is_valid(&self) -> bool {
        sha256_hex(self.data.as_bytes()) == self.checksum
    }

    /// Serializes the entry for storage in cache
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Returns Some(data) if valid, None if corrupted or invalid JSON
    pub fn deserialize_and_validate(serialized: &str) -> Option<String> {
        let entry: ValidatedCacheEntry = serde_json::from_str(serialized).ok()?;

        if entry.is_valid() {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Cache validation failed: checksum mismatch. Expected: {}, Data length: {}",
                entry.checksum,
                entry.data.len()
            );
            None
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Completed LLM responses keyed by a digest of model + request.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Cache<String, String>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    /// Stable key for a request against a given model.
    pub fn key(model: &str, request: &LlmRequest) -> String {
        let body = serde_json::to_vec(request).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(&body);
        format!("llm:{}", hex::encode(hasher.finalize()))
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let cached = self.inner.get(key).await?;
        let valid = ValidatedCacheEntry::deserialize_and_validate(&cached);
        if valid.is_none() {
            self.inner.invalidate(key).await;
        }
        valid
    }

    pub async fn insert(&self, key: String, response: &str) {
        let entry = ValidatedCacheEntry::new(response.to_string());
        self.inner.insert(key, entry.serialize()).await;
    }

    #[cfg(test)]
    async fn insert_raw(&self, key: String, serialized: String) {
        self.inner.insert(key, serialized).await;
    }
}
