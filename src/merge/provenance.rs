//! Provenance merging — folding duplicates into their canonical record
//!
//! When a record's content hash is already known, its source URLs and a
//! bounded duplicates entry are merged into the retained record:
//!
//! - still buffered in memory → merged directly, capped with oldest
//!   entries evicted first
//! - already flushed to a shard → accumulated as a pending update and
//!   applied at end of run by streaming the owning shard through a
//!   temporary file and atomically replacing it
//!
//! Records flush in bounded-memory streaming fashion; holding the whole
//! corpus in memory until end-of-run is not an option at scale, hence the
//! two paths.

use crate::merge::record::{CanonicalRecord, DuplicateEntry};
use crate::merge::shard::open_shard_lines;
use crate::{GreenlitError, GreenlitResult};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Caps on merged provenance, oldest entries evicted first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProvenanceLimits {
    pub max_source_urls: usize,
    pub max_duplicates: usize,
}

impl Default for ProvenanceLimits {
    fn default() -> Self {
        Self {
            max_source_urls: 16,
            max_duplicates: 32,
        }
    }
}

/// Provenance contributed by one duplicate record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceUpdate {
    pub source_urls: Vec<String>,
    pub duplicates: Vec<DuplicateEntry>,
}

impl ProvenanceUpdate {
    /// Build the update a duplicate record contributes to its canonical
    /// copy.
    pub fn from_duplicate(record: &CanonicalRecord) -> Self {
        Self {
            source_urls: record.source_urls.clone(),
            duplicates: vec![DuplicateEntry {
                content_sha256: record.content_sha256.clone(),
                source: record.source.source_url.clone(),
                source_kind: record.pipeline.clone(),
                seen_at: Utc::now(),
            }],
        }
    }

    /// Fold another update into this one (for repeated duplicates of an
    /// already-flushed hash).
    pub fn absorb(&mut self, other: ProvenanceUpdate) {
        self.source_urls.extend(other.source_urls);
        self.duplicates.extend(other.duplicates);
    }
}

/// Merge an update into a retained record, respecting the caps.
pub fn merge_into(record: &mut CanonicalRecord, update: &ProvenanceUpdate, limits: &ProvenanceLimits) {
    for url in &update.source_urls {
        if !record.source_urls.contains(url) {
            record.source_urls.push(url.clone());
        }
    }
    while record.source_urls.len() > limits.max_source_urls {
        record.source_urls.remove(0);
    }

    record.duplicates.extend(update.duplicates.iter().cloned());
    while record.duplicates.len() > limits.max_duplicates {
        record.duplicates.remove(0);
    }

    record.timestamp_updated = Utc::now();
}

/// Pending updates for hashes whose canonical record already flushed,
/// keyed by content hash. Consumed once, at end of run.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    map: HashMap<String, ProvenanceUpdate>,
}

impl PendingUpdates {
    pub fn add(&mut self, content_sha256: &str, update: ProvenanceUpdate) {
        self.map
            .entry(content_sha256.to_string())
            .or_default()
            .absorb(update);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn into_map(self) -> HashMap<String, ProvenanceUpdate> {
        self.map
    }
}

/// Stream one shard through a temp file, applying updates to matching
/// records, then atomically replace the shard. Malformed lines are passed
/// through unchanged, never dropped. Returns the number of records
/// updated.
pub fn rewrite_shard(
    path: &Path,
    updates: &HashMap<String, ProvenanceUpdate>,
    limits: &ProvenanceLimits,
    compress: bool,
) -> GreenlitResult<usize> {
    let dir = path
        .parent()
        .ok_or_else(|| GreenlitError::ShardError(format!("{} has no parent", path.display())))?;
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    let mut applied = 0usize;

    {
        let mut writer: Box<dyn Write> = if compress {
            Box::new(BufWriter::new(GzEncoder::new(
                tmp.reopen()?,
                Compression::default(),
            )))
        } else {
            Box::new(BufWriter::new(tmp.reopen()?))
        };

        for line in open_shard_lines(path, compress)? {
            let line = line?;
            match serde_json::from_str::<CanonicalRecord>(&line) {
                Ok(mut record) => {
                    if let Some(update) = updates.get(&record.content_sha256) {
                        merge_into(&mut record, update, limits);
                        applied += 1;
                    }
                    serde_json::to_writer(&mut writer, &record)?;
                    writer.write_all(b"\n")?;
                }
                Err(e) => {
                    // Corrupt line: preserve as-is rather than lose data.
                    tracing::warn!(
                        shard = %path.display(),
                        "passing through unparseable shard line: {}",
                        e
                    );
                    writer.write_all(line.as_bytes())?;
                    writer.write_all(b"\n")?;
                }
            }
        }
        writer.flush()?;
    }

    tmp.persist(path).map_err(|e| GreenlitError::Io(e.error))?;
    Ok(applied)
}
