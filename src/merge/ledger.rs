//! Merge ledgers — append-only JSONL audit files
//!
//! Three ledgers per combined root:
//! - `combined_index.jsonl` — content hash → owning shard
//! - `combined_deduped.jsonl` — one event per merged-away duplicate
//! - `combined_skipped.jsonl` — canonicalization/validation failures

use crate::GreenlitResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Hash → shard mapping, appended at flush time.
#[derive(Debug, Clone, Serialize)]
pub struct IndexEntry {
    pub content_sha256: String,
    pub pool: String,
    pub shard: String,
}

/// One merged-away duplicate.
#[derive(Debug, Clone, Serialize)]
pub struct DedupeEvent {
    pub content_sha256: String,
    pub source_url: String,
    pub target_id: String,
    pub seen_at: DateTime<Utc>,
}

/// One row that failed canonicalization or validation.
#[derive(Debug, Clone, Serialize)]
pub struct SkipEvent {
    pub reason: String,
    pub source_url: String,
    pub dataset_id: String,
    pub seen_at: DateTime<Utc>,
}

/// One append-only JSONL file.
pub struct LedgerWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LedgerWriter {
    pub fn open(path: impl Into<PathBuf>) -> GreenlitResult<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn append<T: Serialize>(&mut self, entry: &T) -> GreenlitResult<()> {
        serde_json::to_writer(&mut self.writer, entry)?;
        self.writer.write_all(b"\n")?;
        // Ledger lines must survive a crash of the rest of the run.
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The three ledgers of one merge run.
pub struct MergeLedgers {
    pub index: LedgerWriter,
    pub deduped: LedgerWriter,
    pub skipped: LedgerWriter,
}

impl MergeLedgers {
    pub fn open(combined_root: &Path) -> GreenlitResult<Self> {
        Ok(Self {
            index: LedgerWriter::open(combined_root.join("combined_index.jsonl"))?,
            deduped: LedgerWriter::open(combined_root.join("combined_deduped.jsonl"))?,
            skipped: LedgerWriter::open(combined_root.join("combined_skipped.jsonl"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_is_jsonl() {
        let dir = TempDir::new().unwrap();
        let mut ledgers = MergeLedgers::open(dir.path()).unwrap();
        ledgers
            .index
            .append(&IndexEntry {
                content_sha256: "abc".to_string(),
                pool: "permissive".to_string(),
                shard: "permissive_00000.jsonl".to_string(),
            })
            .unwrap();
        ledgers
            .index
            .append(&IndexEntry {
                content_sha256: "def".to_string(),
                pool: "permissive".to_string(),
                shard: "permissive_00000.jsonl".to_string(),
            })
            .unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("combined_index.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["content_sha256"], "abc");
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("combined_skipped.jsonl");
        for reason in ["empty_text", "bad_schema"] {
            let mut w = LedgerWriter::open(&path).unwrap();
            w.append(&SkipEvent {
                reason: reason.to_string(),
                source_url: "https://a.example/1".to_string(),
                dataset_id: "ds".to_string(),
                seen_at: Utc::now(),
            })
            .unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
