//! Evidence change detection — raw vs. normalized hashing
//!
//! Naive raw-hash comparison flags nearly every re-fetch as changed (ads,
//! dates, nonces in the markup). Detection therefore hashes both the raw
//! bytes and the normalized text, and a two-axis policy decides which
//! differences count:
//!
//! - `evidence_change_policy`: `raw` | `normalized` (default) | `either`
//! - `cosmetic_change_policy`: `warn_only` (default) | `treat_as_changed`
//!
//! `changed_from_previous` is resolved here exactly once; no caller
//! recomputes it ad hoc.

use super::normalize::normalize_evidence;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which hash axis counts as "changed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceChangePolicy {
    /// Any byte-level difference counts.
    Raw,
    /// Only substantive (normalized-text) differences count.
    #[default]
    Normalized,
    /// Either axis counts.
    Either,
}

/// Whether a cosmetic-only change (raw differs, normalized identical)
/// also flips `changed_from_previous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CosmeticChangePolicy {
    /// Log a warning, do not flip the change flag.
    #[default]
    WarnOnly,
    /// Cosmetic-only changes also count as changed.
    TreatAsChanged,
}

/// Result of diffing freshly fetched evidence against the prior snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    pub sha256_raw: String,
    /// Hash of normalized text; falls back to the raw hash when text
    /// extraction failed so a change signal is never silently lost.
    pub sha256_normalized_text: String,
    pub raw_changed: bool,
    pub normalized_changed: bool,
    pub cosmetic_change: bool,
    pub changed_from_previous: bool,
    pub extraction_failed: bool,
}

/// Diffs evidence payloads against their previous snapshot hashes.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    pub change_policy: EvidenceChangePolicy,
    pub cosmetic_policy: CosmeticChangePolicy,
}

impl ChangeDetector {
    pub fn new(change_policy: EvidenceChangePolicy, cosmetic_policy: CosmeticChangePolicy) -> Self {
        Self {
            change_policy,
            cosmetic_policy,
        }
    }

    /// Hash `new_bytes` on both axes and classify the difference from the
    /// previous snapshot. With no previous hashes (first fetch) nothing is
    /// considered changed.
    pub fn detect(
        &self,
        new_bytes: &[u8],
        content_type: &str,
        previous_raw: Option<&str>,
        previous_normalized: Option<&str>,
    ) -> ChangeReport {
        let sha256_raw = sha256_hex(new_bytes);

        let normalized = normalize_evidence(new_bytes, content_type);
        let sha256_normalized_text = match &normalized.text {
            Some(text) => sha256_hex(text.as_bytes()),
            // Extraction failure: fall back to raw-byte comparison.
            None => sha256_raw.clone(),
        };

        let raw_changed = previous_raw.is_some_and(|prev| prev != sha256_raw);
        let normalized_changed =
            previous_normalized.is_some_and(|prev| prev != sha256_normalized_text);
        let cosmetic_change = raw_changed && !normalized_changed;

        let mut changed_from_previous = match self.change_policy {
            EvidenceChangePolicy::Raw => raw_changed,
            EvidenceChangePolicy::Normalized => normalized_changed,
            EvidenceChangePolicy::Either => raw_changed || normalized_changed,
        };

        if cosmetic_change {
            match self.cosmetic_policy {
                CosmeticChangePolicy::TreatAsChanged => changed_from_previous = true,
                CosmeticChangePolicy::WarnOnly => {
                    tracing::warn!("cosmetic-only evidence change (raw bytes differ, normalized text identical)");
                }
            }
        }

        ChangeReport {
            sha256_raw,
            sha256_normalized_text,
            raw_changed,
            normalized_changed,
            cosmetic_change,
            changed_from_previous,
            extraction_failed: normalized.extraction_failed,
        }
    }
}

/// SHA-256 of a byte slice, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
