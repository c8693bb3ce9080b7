//! Evidence acquisition and change tracking
//!
//! - `fetcher` — SSRF-guarded, size-capped, single-flight HTTP fetching
//! - `normalize` — HTML stripping / PDF extraction to comparable text
//! - `change` — raw vs. normalized hash diffing under a two-axis policy
//! - `manifest` — per-target snapshot persistence with bounded history

pub mod fetcher;
pub mod normalize;
pub mod change;
pub mod manifest;

pub use fetcher::{EvidenceFetcher, FetchLimits, FetchOutcome, FetchResult, FetcherConfig};
pub use normalize::{normalize_evidence, strip_html, NormalizedEvidence};
pub use change::{
    sha256_hex, ChangeDetector, ChangeReport, CosmeticChangePolicy, EvidenceChangePolicy,
};
pub use manifest::{atomic_write, EvidenceManifest, EvidenceSnapshot, HistoryEntry};
