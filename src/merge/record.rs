//! Canonical records — the hash-addressed unit of curated content
//!
//! `content_sha256` is computed over whitespace-normalized text and is the
//! dedupe key. A record is immutable once written to a shard except for
//! the provenance fields merged in for duplicates.

use crate::evidence::normalize::collapse_whitespace;
use crate::evidence::sha256_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provenance of the originating source row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub target_id: String,
    pub license_profile: String,
    pub license_spdx: String,
    pub source_url: String,
    pub retrieved_at: DateTime<Utc>,
}

/// One merged-away duplicate, kept on the canonical record for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub content_sha256: String,
    /// URL or identifier the duplicate arrived from.
    pub source: String,
    /// Pipeline/stage kind that produced the duplicate (`green`,
    /// `screened_yellow`, …).
    pub source_kind: String,
    pub seen_at: DateTime<Utc>,
}

/// The normalized, hash-addressed unit written to shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub record_id: String,
    pub text: String,
    pub content_sha256: String,
    pub source: SourceInfo,
    pub source_urls: Vec<String>,
    #[serde(default)]
    pub duplicates: Vec<DuplicateEntry>,
    pub pool: String,
    pub pipeline: String,
    pub dataset_id: String,
    #[serde(default)]
    pub config: serde_json::Value,
    pub timestamp_created: DateTime<Utc>,
    pub timestamp_updated: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Canonicalize a raw row into a record. The dedupe hash is taken
    /// over whitespace-normalized text so formatting variants collapse.
    pub fn canonicalize(
        text: &str,
        source: SourceInfo,
        pool: &str,
        pipeline: &str,
        dataset_id: &str,
        config: serde_json::Value,
    ) -> Result<Self, String> {
        let normalized = collapse_whitespace(text);
        if normalized.is_empty() {
            return Err("record text is empty after normalization".to_string());
        }

        let now = Utc::now();
        let record = Self {
            record_id: Uuid::new_v4().to_string(),
            content_sha256: content_hash(text),
            source_urls: vec![source.source_url.clone()],
            duplicates: Vec::new(),
            text: text.to_string(),
            source,
            pool: pool.to_string(),
            pipeline: pipeline.to_string(),
            dataset_id: dataset_id.to_string(),
            config,
            timestamp_created: now,
            timestamp_updated: now,
        };
        record.validate()?;
        Ok(record)
    }

    /// Output-contract validation, run on every write. Failure is a hard
    /// error, never a silent drop.
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("record_id", &self.record_id),
            ("text", &self.text),
            ("content_sha256", &self.content_sha256),
            ("license_profile", &self.source.license_profile),
            ("license_spdx", &self.source.license_spdx),
            ("pool", &self.pool),
            ("pipeline", &self.pipeline),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(format!("required field '{}' is empty", field));
            }
        }
        if self.source_urls.is_empty() {
            return Err("source_urls must not be empty".to_string());
        }
        if self.content_sha256 != content_hash(&self.text) {
            return Err("content_sha256 does not match normalized text".to_string());
        }
        Ok(())
    }
}

/// Dedupe key: SHA-256 over whitespace-normalized text.
pub fn content_hash(text: &str) -> String {
    sha256_hex(collapse_whitespace(text).as_bytes())
}
