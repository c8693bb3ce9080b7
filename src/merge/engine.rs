//! Merge engine — lean orchestrator over dedupe, sharding, provenance
//!
//! For each incoming canonical record:
//!
//! 1. validate against the output contract (failure is a hard error)
//! 2. `DedupeIndex::add_if_new` on its content hash
//!    - new → route to the pool's sharder; track the hash as buffered,
//!      then as flushed the moment its shard closes
//!    - duplicate → merge provenance into the buffered copy, or queue a
//!      pending update when the canonical copy already hit disk
//! 3. `finalize()` flushes final undersized shards, then groups pending
//!    updates by owning shard and rewrites each affected shard once
//!
//! The iteration is strictly sequential within one run; shard files and
//! the dedupe store are exclusively owned by this engine for the run.

use crate::merge::dedupe::DedupeIndex;
use crate::merge::ledger::{DedupeEvent, IndexEntry, MergeLedgers, SkipEvent};
use crate::merge::provenance::{
    merge_into, rewrite_shard, PendingUpdates, ProvenanceLimits, ProvenanceUpdate,
};
use crate::merge::record::CanonicalRecord;
use crate::merge::shard::Sharder;
use crate::{GreenlitError, GreenlitResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Merge run configuration.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Root for pools, shards, ledgers, and the dedupe store.
    pub combined_root: PathBuf,
    pub max_records_per_shard: usize,
    pub compress: bool,
    /// Dedupe store partitions, fixed per store file set.
    pub dedupe_partitions: usize,
    pub provenance_limits: ProvenanceLimits,
}

impl MergeConfig {
    pub fn new(combined_root: impl Into<PathBuf>) -> Self {
        Self {
            combined_root: combined_root.into(),
            max_records_per_shard: 10_000,
            compress: true,
            dedupe_partitions: 1,
            provenance_limits: ProvenanceLimits::default(),
        }
    }
}

/// Run counters, reported at finalize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeStats {
    pub written: u64,
    pub deduped: u64,
    pub skipped: u64,
    pub shards_flushed: u64,
    pub shards_rewritten: u64,
}

/// Where a known hash currently lives.
enum HashLocation {
    Buffered { pool: String },
    Flushed { shard: PathBuf },
}

/// Orchestrates one merge run. Not designed for concurrent runs against
/// the same output roots.
pub struct MergeEngine {
    config: MergeConfig,
    dedupe: DedupeIndex,
    sharders: HashMap<String, Sharder>,
    locations: HashMap<String, HashLocation>,
    pending: PendingUpdates,
    ledgers: MergeLedgers,
    stats: MergeStats,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> GreenlitResult<Self> {
        std::fs::create_dir_all(&config.combined_root)?;
        let dedupe = DedupeIndex::open(
            &config.combined_root.join("dedupe"),
            config.dedupe_partitions,
        )?;
        let ledgers = MergeLedgers::open(&config.combined_root)?;
        Ok(Self {
            config,
            dedupe,
            sharders: HashMap::new(),
            locations: HashMap::new(),
            pending: PendingUpdates::default(),
            ledgers,
            stats: MergeStats::default(),
        })
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// Record a row that failed canonicalization upstream.
    pub fn record_skip(&mut self, reason: &str, source_url: &str, dataset_id: &str) -> GreenlitResult<()> {
        self.stats.skipped += 1;
        self.ledgers.skipped.append(&SkipEvent {
            reason: reason.to_string(),
            source_url: source_url.to_string(),
            dataset_id: dataset_id.to_string(),
            seen_at: Utc::now(),
        })
    }

    /// Ingest one canonical record.
    pub fn ingest(&mut self, record: CanonicalRecord) -> GreenlitResult<()> {
        record
            .validate()
            .map_err(GreenlitError::RecordError)?;

        let hash = record.content_sha256.clone();
        if self.dedupe.add_if_new(&hash)? {
            self.ingest_new(record, hash)
        } else {
            self.ingest_duplicate(record, hash)
        }
    }

    fn ingest_new(&mut self, record: CanonicalRecord, hash: String) -> GreenlitResult<()> {
        let pool = record.pool.clone();
        let sharder = match self.sharders.entry(pool.clone()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let dir = self.config.combined_root.join(&pool).join("shards");
                e.insert(Sharder::new(
                    dir,
                    &pool,
                    self.config.max_records_per_shard,
                    self.config.compress,
                )?)
            }
        };

        self.locations
            .insert(hash, HashLocation::Buffered { pool: pool.clone() });
        self.stats.written += 1;

        if let Some(flushed) = sharder.add(record)? {
            self.stats.shards_flushed += 1;
            for flushed_record in &flushed.records {
                self.locations.insert(
                    flushed_record.content_sha256.clone(),
                    HashLocation::Flushed {
                        shard: flushed.path.clone(),
                    },
                );
                self.ledgers.index.append(&IndexEntry {
                    content_sha256: flushed_record.content_sha256.clone(),
                    pool: pool.clone(),
                    shard: flushed
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                })?;
            }
        }
        Ok(())
    }

    fn ingest_duplicate(&mut self, record: CanonicalRecord, hash: String) -> GreenlitResult<()> {
        let update = ProvenanceUpdate::from_duplicate(&record);
        self.stats.deduped += 1;
        self.ledgers.deduped.append(&DedupeEvent {
            content_sha256: hash.clone(),
            source_url: record.source.source_url.clone(),
            target_id: record.source.target_id.clone(),
            seen_at: Utc::now(),
        })?;

        match self.locations.get(&hash) {
            Some(HashLocation::Buffered { pool }) => {
                let pool = pool.clone();
                let sharder = self
                    .sharders
                    .get_mut(&pool)
                    .expect("buffered location implies live sharder");
                match sharder.buffered_mut(&hash) {
                    Some(canonical) => {
                        merge_into(canonical, &update, &self.config.provenance_limits)
                    }
                    // Buffered marker can trail an interleaved flush.
                    None => self.pending.add(&hash, update),
                }
            }
            Some(HashLocation::Flushed { .. }) => {
                self.pending.add(&hash, update);
            }
            // Hash known from a previous run against the same store: the
            // canonical copy lives outside this run's shards, so the
            // dedupe event above is the whole story.
            None => {
                tracing::debug!(hash = %hash, "duplicate of record from a previous run");
            }
        }
        Ok(())
    }

    /// End of run: flush final shards, then apply pending provenance
    /// updates by rewriting each affected shard once.
    pub fn finalize(mut self) -> GreenlitResult<MergeStats> {
        // Final, possibly-undersized shards.
        let pools: Vec<String> = self.sharders.keys().cloned().collect();
        for pool in pools {
            let sharder = self.sharders.get_mut(&pool).expect("pool key");
            if let Some(flushed) = sharder.flush()? {
                self.stats.shards_flushed += 1;
                for record in &flushed.records {
                    self.locations.insert(
                        record.content_sha256.clone(),
                        HashLocation::Flushed {
                            shard: flushed.path.clone(),
                        },
                    );
                    self.ledgers.index.append(&IndexEntry {
                        content_sha256: record.content_sha256.clone(),
                        pool: pool.clone(),
                        shard: flushed
                            .path
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default(),
                    })?;
                }
            }
        }

        // Group pending updates by owning shard.
        let pending = std::mem::take(&mut self.pending).into_map();
        let mut by_shard: HashMap<PathBuf, HashMap<String, ProvenanceUpdate>> = HashMap::new();
        for (hash, update) in pending {
            match self.locations.get(&hash) {
                Some(HashLocation::Flushed { shard }) => {
                    by_shard
                        .entry(shard.clone())
                        .or_default()
                        .insert(hash, update);
                }
                _ => {
                    tracing::warn!(hash = %hash, "pending update without an owning shard, dropped");
                }
            }
        }

        for (shard, updates) in &by_shard {
            let applied = rewrite_shard(
                shard,
                updates,
                &self.config.provenance_limits,
                self.config.compress,
            )?;
            self.stats.shards_rewritten += 1;
            tracing::info!(
                shard = %shard.display(),
                applied,
                "applied deferred provenance updates"
            );
        }

        tracing::info!(
            written = self.stats.written,
            deduped = self.stats.deduped,
            skipped = self.stats.skipped,
            shards_flushed = self.stats.shards_flushed,
            shards_rewritten = self.stats.shards_rewritten,
            "merge run complete"
        );
        Ok(self.stats.clone())
    }
}
