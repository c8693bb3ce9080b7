//! Merge/dedupe engine — content-addressed, size-bounded sharding
//!
//! - `record` — the canonical record schema and its validation
//! - `dedupe` — WAL-SQLite at-most-once hash store
//! - `shard` — fixed-size compressed JSONL batch writer
//! - `provenance` — duplicate folding, in-memory and deferred
//! - `ledger` — append-only JSONL audit files
//! - `engine` — the sequential orchestrator tying it together

pub mod record;
pub mod dedupe;
pub mod shard;
pub mod provenance;
pub mod ledger;
pub mod engine;

pub use record::{content_hash, CanonicalRecord, DuplicateEntry, SourceInfo};
pub use dedupe::DedupeIndex;
pub use shard::{open_shard_lines, shard_file_name, FlushedShard, Sharder};
pub use provenance::{merge_into, rewrite_shard, PendingUpdates, ProvenanceLimits, ProvenanceUpdate};
pub use ledger::{DedupeEvent, IndexEntry, LedgerWriter, MergeLedgers, SkipEvent};
pub use engine::{MergeConfig, MergeEngine, MergeStats};
