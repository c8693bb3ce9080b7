//! License classification — targets, policy, and bucket decisions
//!
//! Turns a target's declared license, fetched evidence, and policy gates
//! into a single auditable GREEN/YELLOW/RED decision:
//!
//! - `spdx` — declared-hint + ordered keyword rules → SPDX id + confidence
//! - `denylist` — substring/regex/domain/publisher screening with severity
//! - `restriction` — restriction-phrase scan over normalized evidence
//! - `bucket` — the pure nine-step decision function

pub mod spdx;
pub mod denylist;
pub mod restriction;
pub mod bucket;

pub use spdx::{SpdxResolution, SpdxResolver, SpdxRule};
pub use denylist::{DenylistHit, DenylistMatcher, DenylistPattern, PatternKind, Severity, TargetHaystack};
pub use restriction::RestrictionScanner;
pub use bucket::{BucketResolver, EvidenceSignals, ResolverInput, Signals};

use crate::evidence::{CosmeticChangePolicy, EvidenceChangePolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ─── Buckets ────────────────────────────────────────────────────────

/// The output of classification: clear to use, needs screening, rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Bucket {
    Green,
    Yellow,
    Red,
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "GREEN"),
            Self::Yellow => write!(f, "YELLOW"),
            Self::Red => write!(f, "RED"),
        }
    }
}

// ─── Target model ───────────────────────────────────────────────────

/// Where a target's declared license can be corroborated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseEvidence {
    /// Declared SPDX hint; sentinel values MIXED/UNKNOWN/DERIVED defer to
    /// evidence-text resolution.
    #[serde(default)]
    pub spdx_hint: Option<String>,
    /// Terms/license URL to fetch and snapshot.
    #[serde(default)]
    pub url: Option<String>,
}

/// Policy gates that can force a target toward manual screening.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Gates {
    /// Evidence must be fetched and snapshotted this run.
    #[serde(default)]
    pub snapshot_terms: bool,
    /// Restriction phrases in evidence force YELLOW.
    #[serde(default)]
    pub restriction_phrases: bool,
    /// Unconditional manual-review gate.
    #[serde(default)]
    pub manual_review: bool,
}

/// Human review signoff state for a target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReviewState {
    #[default]
    Pending,
    Approved {
        #[serde(default)]
        promote_to: Option<Bucket>,
    },
    Rejected,
}

/// One curation target, created from static configuration and immutable
/// for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    /// Coarse license category this target is expected to land in
    /// (`permissive`, `copyleft`, `quarantine`).
    pub license_profile: String,
    #[serde(default)]
    pub license_evidence: LicenseEvidence,
    /// Opaque download spec, passed through to acquisition handlers.
    #[serde(default)]
    pub download: serde_json::Value,
    #[serde(default)]
    pub gates: Gates,
    #[serde(default)]
    pub review_required: bool,
    #[serde(default)]
    pub review: ReviewState,
    #[serde(default)]
    pub routing: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub publisher: Option<String>,
}

impl Target {
    /// Download URLs extracted from the opaque download spec, for denylist
    /// screening.
    pub fn download_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        collect_urls(&self.download, &mut urls);
        urls
    }
}

fn collect_urls(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) if s.starts_with("http://") || s.starts_with("https://") => {
            out.push(s.clone());
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_urls(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_urls(v, out)),
        _ => {}
    }
}

// ─── Classification result ──────────────────────────────────────────

/// Pure function output, one per target per run. Never mutated after
/// creation; written once to `evaluation.json` and the bucket queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub target_id: String,
    pub resolved_spdx: String,
    pub confidence: f64,
    pub restriction_hits: Vec<String>,
    pub denylist_hits: Vec<DenylistHit>,
    pub effective_bucket: Bucket,
    /// The one canonical cause of the effective bucket.
    pub bucket_reason: String,
    pub signals: Signals,
}

// ─── Curation policy (greenlit.toml) ────────────────────────────────

fn default_min_confidence() -> f64 {
    0.75
}
fn default_low_confidence_bucket() -> Bucket {
    Bucket::Yellow
}
fn default_max_history() -> usize {
    5
}
fn default_true() -> bool {
    true
}

/// Project-level curation policy, loaded from `greenlit.toml`.
///
/// Works with zero configuration: the built-in SPDX rule table and
/// restriction phrase list apply when the file is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationPolicy {
    /// Below this SPDX confidence, a GREEN target is downgraded.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Bucket for low-confidence downgrades.
    #[serde(default = "default_low_confidence_bucket")]
    pub low_confidence_bucket: Bucket,

    #[serde(default)]
    pub evidence_change_policy: EvidenceChangePolicy,

    #[serde(default)]
    pub cosmetic_change_policy: CosmeticChangePolicy,

    /// Ordered SPDX keyword rules; empty means built-in defaults.
    #[serde(default)]
    pub spdx_rules: Vec<SpdxRule>,

    #[serde(default)]
    pub denylist: Vec<DenylistPattern>,

    /// Restriction phrases; empty means built-in defaults.
    #[serde(default)]
    pub restriction_phrases: Vec<String>,

    /// Previous evidence payloads kept per target.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Whether HTTP 429 is retried as transient.
    #[serde(default = "default_true")]
    pub retry_rate_limited: bool,
}

impl Default for CurationPolicy {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            low_confidence_bucket: default_low_confidence_bucket(),
            evidence_change_policy: EvidenceChangePolicy::default(),
            cosmetic_change_policy: CosmeticChangePolicy::default(),
            spdx_rules: Vec::new(),
            denylist: Vec::new(),
            restriction_phrases: Vec::new(),
            max_history: default_max_history(),
            retry_rate_limited: true,
        }
    }
}

impl CurationPolicy {
    /// Load policy from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read policy file: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse policy: {}", e))
    }

    /// Try to load `greenlit.toml` from a directory, fall back to defaults.
    pub fn from_project_root(root: &Path) -> Self {
        let policy_path = root.join("greenlit.toml");
        if policy_path.exists() {
            match Self::from_file(&policy_path) {
                Ok(policy) => {
                    tracing::info!("Loaded curation policy from {}", policy_path.display());
                    return policy;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load {}: {} — using defaults",
                        policy_path.display(),
                        e
                    );
                }
            }
        }
        Self::default()
    }
}
