//! Evidence manifest persistence
//!
//! Each target owns a manifest directory holding:
//! - `license_evidence.<ext>` — the latest raw payload
//! - `license_evidence_meta.json` — the [`EvidenceSnapshot`]
//! - `license_evidence.prev_<hash8>.<ext>` — bounded history of replaced
//!   payloads; the previous payload is renamed, never deleted, before being
//!   overwritten
//!
//! All durable writes go through write-to-temp-then-atomic-rename so a
//! crash never leaves a half-written manifest.

use crate::evidence::change::ChangeReport;
use crate::{GreenlitError, GreenlitResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const PAYLOAD_STEM: &str = "license_evidence";
const META_FILENAME: &str = "license_evidence_meta.json";
const KNOWN_EXTS: &[&str] = &["html", "pdf", "txt"];

/// One rotated payload file kept in the history window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub file: String,
    pub sha256_raw: String,
    pub replaced_at: DateTime<Utc>,
}

/// Snapshot of one evidence fetch, persisted per target per classify run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSnapshot {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    /// Canonical fetch status: `ok`, `blocked_url`, `response_too_large`,
    /// `error`, or `skipped` in offline mode.
    pub status: String,
    pub content_type: Option<String>,
    pub sha256_raw: Option<String>,
    pub sha256_normalized_text: Option<String>,
    pub previous_sha256_raw: Option<String>,
    pub previous_sha256_normalized_text: Option<String>,
    pub raw_changed: bool,
    pub normalized_changed: bool,
    pub cosmetic_change: bool,
    /// Policy-resolved change verdict, computed exactly once by the
    /// change detector.
    pub changed_from_previous: bool,
    pub extraction_failed: bool,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl EvidenceSnapshot {
    /// Snapshot for a failed or skipped fetch — hash fields empty, change
    /// flags all false.
    pub fn without_payload(url: &str, status: &str) -> Self {
        Self {
            url: url.to_string(),
            fetched_at: Utc::now(),
            status: status.to_string(),
            content_type: None,
            sha256_raw: None,
            sha256_normalized_text: None,
            previous_sha256_raw: None,
            previous_sha256_normalized_text: None,
            raw_changed: false,
            normalized_changed: false,
            cosmetic_change: false,
            changed_from_previous: false,
            extraction_failed: false,
            history: Vec::new(),
        }
    }

    /// Snapshot for a successful fetch, carrying the change report forward.
    pub fn from_change_report(
        url: &str,
        content_type: &str,
        report: &ChangeReport,
        previous: Option<&EvidenceSnapshot>,
    ) -> Self {
        Self {
            url: url.to_string(),
            fetched_at: Utc::now(),
            status: "ok".to_string(),
            content_type: Some(content_type.to_string()),
            sha256_raw: Some(report.sha256_raw.clone()),
            sha256_normalized_text: Some(report.sha256_normalized_text.clone()),
            previous_sha256_raw: previous.and_then(|p| p.sha256_raw.clone()),
            previous_sha256_normalized_text: previous
                .and_then(|p| p.sha256_normalized_text.clone()),
            raw_changed: report.raw_changed,
            normalized_changed: report.normalized_changed,
            cosmetic_change: report.cosmetic_change,
            changed_from_previous: report.changed_from_previous,
            extraction_failed: report.extraction_failed,
            history: previous.map(|p| p.history.clone()).unwrap_or_default(),
        }
    }
}

/// Per-target manifest directory handle.
pub struct EvidenceManifest {
    dir: PathBuf,
    max_history: usize,
}

impl EvidenceManifest {
    pub fn new(dir: impl Into<PathBuf>, max_history: usize) -> Self {
        Self {
            dir: dir.into(),
            max_history,
        }
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILENAME)
    }

    /// Load the previous run's snapshot, if any. A corrupt meta file is
    /// treated as absent (and logged), not fatal: the next persist
    /// overwrites it.
    pub fn load_previous(&self) -> Option<EvidenceSnapshot> {
        let path = self.meta_path();
        if !path.exists() {
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<EvidenceSnapshot>(&content) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!("corrupt evidence meta at {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("unreadable evidence meta at {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist a new payload and snapshot, rotating the old payload into
    /// the bounded history window.
    pub fn persist(
        &self,
        payload: &[u8],
        content_type: &str,
        mut snapshot: EvidenceSnapshot,
    ) -> GreenlitResult<EvidenceSnapshot> {
        fs::create_dir_all(&self.dir)?;
        let ext = ext_for_content_type(content_type);

        // Rotate the existing payload (any known extension) into history.
        if let Some(existing) = self.current_payload_path() {
            let bytes = fs::read(&existing)?;
            let hash8: String = crate::evidence::change::sha256_hex(&bytes)
                .chars()
                .take(8)
                .collect();
            let old_ext = existing
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("txt")
                .to_string();
            let rotated_name = format!("{}.prev_{}.{}", PAYLOAD_STEM, hash8, old_ext);
            fs::rename(&existing, self.dir.join(&rotated_name))?;
            snapshot.history.push(HistoryEntry {
                file: rotated_name,
                sha256_raw: crate::evidence::change::sha256_hex(&bytes),
                replaced_at: Utc::now(),
            });
        }

        // Bound the history window, oldest entries and files removed first.
        while snapshot.history.len() > self.max_history {
            let evicted = snapshot.history.remove(0);
            let path = self.dir.join(&evicted.file);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }

        let payload_path = self.dir.join(format!("{}.{}", PAYLOAD_STEM, ext));
        atomic_write(&payload_path, payload)?;

        let meta = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(&self.meta_path(), &meta)?;

        Ok(snapshot)
    }

    /// Persist a snapshot only (failed/offline fetch: no payload to rotate).
    pub fn persist_meta_only(&self, snapshot: &EvidenceSnapshot) -> GreenlitResult<()> {
        fs::create_dir_all(&self.dir)?;
        let meta = serde_json::to_vec_pretty(snapshot)?;
        atomic_write(&self.meta_path(), &meta)
    }

    fn current_payload_path(&self) -> Option<PathBuf> {
        KNOWN_EXTS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", PAYLOAD_STEM, ext)))
            .find(|p| p.exists())
    }
}

/// Map a MIME type to the manifest payload extension.
pub fn ext_for_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => "html",
        "application/pdf" => "pdf",
        _ => "txt",
    }
}

/// Write-to-temp-then-atomic-rename within the destination directory.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> GreenlitResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| GreenlitError::EvidenceError(format!("{} has no parent", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, bytes)?;
    tmp.persist(path)
        .map_err(|e| GreenlitError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(url: &str) -> EvidenceSnapshot {
        EvidenceSnapshot::without_payload(url, "ok")
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let manifest = EvidenceManifest::new(dir.path(), 3);

        let mut snap = snapshot("https://example.com/terms");
        snap.sha256_raw = Some("abc".to_string());
        manifest.persist(b"<p>terms</p>", "text/html", snap).unwrap();

        let loaded = manifest.load_previous().expect("snapshot persisted");
        assert_eq!(loaded.url, "https://example.com/terms");
        assert_eq!(loaded.sha256_raw.as_deref(), Some("abc"));
        assert!(dir.path().join("license_evidence.html").exists());
    }

    #[test]
    fn test_previous_payload_rotated_not_deleted() {
        let dir = TempDir::new().unwrap();
        let manifest = EvidenceManifest::new(dir.path(), 3);

        manifest
            .persist(b"version one", "text/plain", snapshot("u"))
            .unwrap();
        let snap = manifest
            .persist(b"version two", "text/plain", snapshot("u"))
            .unwrap();

        assert_eq!(snap.history.len(), 1);
        let rotated = dir.path().join(&snap.history[0].file);
        assert!(rotated.exists());
        assert_eq!(fs::read(rotated).unwrap(), b"version one");
        assert_eq!(
            fs::read(dir.path().join("license_evidence.txt")).unwrap(),
            b"version two"
        );
    }

    #[test]
    fn test_history_bounded_oldest_evicted() {
        let dir = TempDir::new().unwrap();
        let manifest = EvidenceManifest::new(dir.path(), 2);

        let mut prev: Option<EvidenceSnapshot> = None;
        for i in 0..5 {
            let mut snap = snapshot("u");
            if let Some(p) = &prev {
                snap.history = p.history.clone();
            }
            let payload = format!("version {}", i);
            prev = Some(manifest.persist(payload.as_bytes(), "text/plain", snap).unwrap());
        }

        let final_snap = prev.unwrap();
        assert_eq!(final_snap.history.len(), 2);
        // Only the files in the final history window remain on disk.
        let prev_files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.contains(".prev_"))
            .collect();
        assert_eq!(prev_files.len(), 2);
    }

    #[test]
    fn test_corrupt_meta_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(META_FILENAME), b"{ not json").unwrap();
        let manifest = EvidenceManifest::new(dir.path(), 3);
        assert!(manifest.load_previous().is_none());
    }

    #[test]
    fn test_ext_mapping() {
        assert_eq!(ext_for_content_type("text/html; charset=utf-8"), "html");
        assert_eq!(ext_for_content_type("application/pdf"), "pdf");
        assert_eq!(ext_for_content_type("text/plain"), "txt");
    }
}
