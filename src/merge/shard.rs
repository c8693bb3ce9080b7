//! Sharding — size-bounded, append-only JSONL batch files
//!
//! Records buffer in memory; at `max_records_per_shard` the batch is
//! written to `{pool}_{index:05}.jsonl[.gz]` and the index increments.
//! Naming is deterministic given the sequence of adds — the merge
//! engine's deferred provenance rewrites depend on that. A shard is
//! closed the instant it is flushed; only the deferred-rewrite path may
//! touch it afterwards.
//!
//! Every flush is write-to-temp-then-atomic-rename, then re-read and
//! line-counted: a verification mismatch is fatal for the run.

use crate::merge::record::CanonicalRecord;
use crate::{GreenlitError, GreenlitResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// One flushed batch: where it went and what it contained.
#[derive(Debug)]
pub struct FlushedShard {
    pub path: PathBuf,
    pub records: Vec<CanonicalRecord>,
}

/// Buffers canonical records and flushes fixed-size compressed shards.
pub struct Sharder {
    dir: PathBuf,
    pool: String,
    max_records_per_shard: usize,
    compress: bool,
    buffer: Vec<CanonicalRecord>,
    shard_index: u64,
}

impl Sharder {
    pub fn new(
        dir: impl Into<PathBuf>,
        pool: &str,
        max_records_per_shard: usize,
        compress: bool,
    ) -> GreenlitResult<Self> {
        if max_records_per_shard == 0 {
            return Err(GreenlitError::ShardError(
                "max_records_per_shard must be positive".to_string(),
            ));
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        // Later runs against the same root append after the existing
        // shards instead of overwriting them.
        let shard_index = next_shard_index(&dir, pool)?;
        Ok(Self {
            dir,
            pool: pool.to_string(),
            max_records_per_shard,
            compress,
            buffer: Vec::new(),
            shard_index,
        })
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Add a record; returns the flushed shard when the buffer filled.
    pub fn add(&mut self, record: CanonicalRecord) -> GreenlitResult<Option<FlushedShard>> {
        self.buffer.push(record);
        if self.buffer.len() >= self.max_records_per_shard {
            return self.flush().map(|f| {
                debug_assert!(f.is_some());
                f
            });
        }
        Ok(None)
    }

    /// Flush the current buffer (possibly undersized) as a shard. No-op
    /// on an empty buffer.
    pub fn flush(&mut self) -> GreenlitResult<Option<FlushedShard>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let path = self.dir.join(shard_file_name(
            &self.pool,
            self.shard_index,
            self.compress,
        ));
        let records = std::mem::take(&mut self.buffer);

        write_shard(&path, &records, self.compress)?;
        verify_shard(&path, records.len(), self.compress)?;

        self.shard_index += 1;
        tracing::info!(
            pool = %self.pool,
            shard = %path.display(),
            records = records.len(),
            "flushed shard"
        );
        Ok(Some(FlushedShard { path, records }))
    }

    /// Mutable access to a still-buffered record by content hash, for
    /// in-memory provenance merges.
    pub fn buffered_mut(&mut self, content_sha256: &str) -> Option<&mut CanonicalRecord> {
        self.buffer
            .iter_mut()
            .find(|r| r.content_sha256 == content_sha256)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Deterministic shard file name for `(pool, index)`.
pub fn shard_file_name(pool: &str, index: u64, compress: bool) -> String {
    let ext = if compress { "jsonl.gz" } else { "jsonl" };
    format!("{}_{:05}.{}", pool, index, ext)
}

/// First unused shard index for a pool in `dir`.
fn next_shard_index(dir: &Path, pool: &str) -> GreenlitResult<u64> {
    let prefix = format!("{}_", pool);
    let mut next = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if let Some(rest) = name.strip_prefix(&prefix) {
            if let Some(index) = rest.split('.').next().and_then(|s| s.parse::<u64>().ok()) {
                next = next.max(index + 1);
            }
        }
    }
    Ok(next)
}

fn write_shard(path: &Path, records: &[CanonicalRecord], compress: bool) -> GreenlitResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| GreenlitError::ShardError(format!("{} has no parent", path.display())))?;
    let tmp = tempfile::NamedTempFile::new_in(dir)?;

    {
        let mut writer: Box<dyn Write> = if compress {
            Box::new(BufWriter::new(GzEncoder::new(
                tmp.reopen()?,
                Compression::default(),
            )))
        } else {
            Box::new(BufWriter::new(tmp.reopen()?))
        };
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }

    tmp.persist(path).map_err(|e| GreenlitError::Io(e.error))?;
    Ok(())
}

/// Re-read a just-written shard and compare line counts. A mismatch means
/// the write partially succeeded in some way we cannot reason about.
fn verify_shard(path: &Path, expected: usize, compress: bool) -> GreenlitResult<()> {
    // Read errors must fail verification, not count as lines.
    let mut lines = 0usize;
    for line in open_shard_lines(path, compress)? {
        line?;
        lines += 1;
    }
    if lines != expected {
        return Err(GreenlitError::ShardError(format!(
            "write verification failed for {}: wrote {} records, read back {}",
            path.display(),
            expected,
            lines
        )));
    }
    Ok(())
}

/// Line iterator over a shard file, transparently decompressing.
pub fn open_shard_lines(
    path: &Path,
    compress: bool,
) -> GreenlitResult<impl Iterator<Item = std::io::Result<String>>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if compress {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(BufReader::new(reader).lines())
}
