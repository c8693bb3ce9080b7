//! # greenlit — License-Segregated Corpus Curation Engine
//!
//! Curates third-party content into license-segregated, deduplicated
//! training-corpus shards. Every domain (math, physics, code, biology, …)
//! runs the same pipeline shape: classify targets into GREEN/YELLOW/RED
//! license buckets → acquire payloads → screen/canonicalize → merge with
//! deduplication → shard.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Classification run                        │
//! │  ┌──────────────┐ ┌──────────────┐ ┌───────────────────┐     │
//! │  │EvidenceFetch │ │ChangeDetector│ │ SpdxResolver      │     │
//! │  │(SSRF-guarded)│ │(raw/normal.) │ │ DenylistMatcher   │     │
//! │  └──────┬───────┘ └──────┬───────┘ └────────┬──────────┘     │
//! │         └────────────────┴──────────────────┘                │
//! │                          │                                   │
//! │                 ┌────────▼────────┐                          │
//! │                 │  BucketResolver │──▶ queue rows (JSONL)    │
//! │                 └─────────────────┘                          │
//! └──────────────────────────────────────────────────────────────┘
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Merge run                             │
//! │  canonical records ──▶ DedupeIndex ──▶ Sharder ──▶ shards    │
//! │                          │ dup            │ flushed          │
//! │                 ┌────────▼─────────┐      │                  │
//! │                 │ ProvenanceMerger │◀─────┘                  │
//! │                 │ (in-mem/deferred)│──▶ shard rewrite pass   │
//! │                 └──────────────────┘                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Capabilities
//!
//! - **License classification**: declared-hint + keyword-rule SPDX
//!   resolution, denylist screening, restriction-phrase detection, and a
//!   pure nine-step bucket decision with a machine-readable reason
//! - **Safe evidence fetching**: SSRF-guarded (every redirect hop checked),
//!   size-capped streaming, exponential-backoff retries, single-flight
//!   dedup of concurrent fetches of the same URL
//! - **Change detection**: raw vs. normalized-text hashing with a two-axis
//!   policy so cosmetic churn (timestamps, nonces) does not flip targets
//! - **Merge/dedupe**: content-addressed at-most-once dedup backed by a WAL
//!   SQLite store, bounded-memory sharding, and provenance merging for
//!   duplicates — including duplicates that arrive after their canonical
//!   copy was already flushed to disk
//! - **Audit surface**: secrets redacted before anything is logged or
//!   persisted; append-only JSONL ledgers for every write and skip

pub mod redact;
pub mod evidence;
pub mod classify;
pub mod merge;
pub mod pipeline;

// Re-exports for convenience
pub use redact::SecretRedactor;
pub use evidence::{
    ChangeDetector, ChangeReport, EvidenceFetcher, EvidenceSnapshot, FetchOutcome,
};
pub use classify::{
    Bucket, BucketResolver, ClassificationResult, CurationPolicy, DenylistMatcher, SpdxResolver,
    Target,
};
pub use merge::{CanonicalRecord, DedupeIndex, MergeEngine, MergeStats, Sharder};
pub use pipeline::{ClassificationRun, PipelineSpec};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GreenlitError {
    #[error("Policy configuration error: {0}")]
    PolicyError(String),

    #[error("Evidence error: {0}")]
    EvidenceError(String),

    #[error("Record validation failed: {0}")]
    RecordError(String),

    #[error("Dedupe store error: {0}")]
    DedupeError(String),

    #[error("Shard error: {0}")]
    ShardError(String),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

pub type GreenlitResult<T> = Result<T, GreenlitError>;
