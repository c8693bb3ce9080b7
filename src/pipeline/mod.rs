//! Classification pipeline driver
//!
//! One driver serves every domain. Domain variation (routing keys, user
//! agent, targets filename) is data carried by [`PipelineSpec`], not
//! subclassing: a math run and a biology run differ only in the
//! [`PipelineSpec`] and target list they are handed.
//!
//! A run fans targets out over a bounded worker pool (fetching is the
//! only blocking part; the single-flight cache keeps shared
//! terms-of-service URLs to one request), writes `evaluation.json` plus
//! evidence manifests per target, and appends one queue row per target
//! to its bucket's JSONL queue.

use crate::classify::{
    Bucket, BucketResolver, ClassificationResult, CurationPolicy, DenylistMatcher,
    EvidenceSignals, ResolverInput, RestrictionScanner, SpdxResolver, Target, TargetHaystack,
};
use crate::evidence::{
    atomic_write, normalize_evidence, ChangeDetector, EvidenceFetcher, EvidenceManifest,
    EvidenceSnapshot, FetchLimits, FetchOutcome, FetcherConfig,
};
use crate::redact::SecretRedactor;
use crate::{GreenlitError, GreenlitResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Bounded fetch-worker cap for one run.
const MAX_FETCH_WORKERS: usize = 8;

/// Everything that varies per domain, as a value object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Domain label (`math`, `physics`, `code`, …).
    pub domain: String,
    pub user_agent: String,
    /// Targets file this domain reads (externally; recorded for audit).
    pub targets_filename: String,
    /// Routing keys this domain accepts; empty accepts any.
    pub routing_keys: Vec<String>,
    /// Routing key applied when a target declares none (or an unknown one).
    pub default_routing: String,
}

impl PipelineSpec {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            user_agent: format!("greenlit-{}/0.3", domain),
            targets_filename: "targets.toml".to_string(),
            routing_keys: Vec::new(),
            default_routing: "default".to_string(),
        }
    }

    /// Resolve a target's declared routing against the domain's key set.
    fn resolve_routing(&self, declared: Option<&str>) -> String {
        match declared {
            Some(key) if self.routing_keys.is_empty() || self.routing_keys.iter().any(|k| k == key) => {
                key.to_string()
            }
            Some(key) => {
                tracing::warn!(
                    domain = %self.domain,
                    routing = key,
                    "unknown routing key, falling back to default"
                );
                self.default_routing.clone()
            }
            None => self.default_routing.clone(),
        }
    }
}

/// One queue row, the external contract consumed by acquisition and
/// screening stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRow {
    pub id: String,
    pub effective_bucket: Bucket,
    pub license_profile: String,
    pub resolved_spdx: String,
    pub bucket_reason: String,
    pub download: serde_json::Value,
    pub routing: String,
    pub priority: i64,
}

/// One classification run over a batch of targets.
pub struct ClassificationRun {
    spec: PipelineSpec,
    policy: CurationPolicy,
    work_root: PathBuf,
    offline: bool,
    fetcher: EvidenceFetcher,
    spdx: SpdxResolver,
    denylist: DenylistMatcher,
    restriction: RestrictionScanner,
    change: ChangeDetector,
    bucket: BucketResolver,
    redactor: SecretRedactor,
}

impl ClassificationRun {
    pub fn new(
        spec: PipelineSpec,
        policy: CurationPolicy,
        work_root: impl Into<PathBuf>,
        offline: bool,
    ) -> GreenlitResult<Self> {
        let denylist = DenylistMatcher::new(policy.denylist.clone())
            .map_err(GreenlitError::PolicyError)?;
        let fetcher = EvidenceFetcher::new(FetcherConfig {
            user_agent: spec.user_agent.clone(),
            retry_rate_limited: policy.retry_rate_limited,
            ..FetcherConfig::default()
        });
        Ok(Self {
            spdx: SpdxResolver::new(policy.spdx_rules.clone()),
            restriction: RestrictionScanner::new(policy.restriction_phrases.clone()),
            change: ChangeDetector::new(
                policy.evidence_change_policy,
                policy.cosmetic_change_policy,
            ),
            bucket: BucketResolver::new(policy.min_confidence, policy.low_confidence_bucket),
            denylist,
            fetcher,
            redactor: SecretRedactor::new(),
            spec,
            policy,
            work_root: work_root.into(),
            offline,
        })
    }

    /// Classify every target on a bounded pool, then append queue rows.
    /// Returns results in target order.
    pub fn run(&self, targets: &[Target]) -> GreenlitResult<Vec<ClassificationResult>> {
        tracing::info!(
            domain = %self.spec.domain,
            targets = targets.len(),
            offline = self.offline,
            "starting classification run"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(MAX_FETCH_WORKERS)
            .build()
            .map_err(|e| GreenlitError::PolicyError(format!("worker pool: {}", e)))?;

        let results: Vec<GreenlitResult<ClassificationResult>> =
            pool.install(|| targets.par_iter().map(|t| self.classify_target(t)).collect());
        let results: Vec<ClassificationResult> =
            results.into_iter().collect::<GreenlitResult<_>>()?;

        for (target, result) in targets.iter().zip(&results) {
            self.append_queue_row(target, result)?;
        }

        Ok(results)
    }

    /// Classify one target: fetch/snapshot evidence, resolve SPDX, scan
    /// denylist and restrictions, resolve the bucket, persist
    /// `evaluation.json`.
    pub fn classify_target(&self, target: &Target) -> GreenlitResult<ClassificationResult> {
        let manifest = EvidenceManifest::new(self.target_dir(&target.id), self.policy.max_history);
        let previous = manifest.load_previous();

        let evidence_url = target.license_evidence.url.as_deref();
        let (snapshot, evidence_text) = self.snapshot_evidence(evidence_url, &manifest, previous.as_ref())?;

        let hint = target.license_evidence.spdx_hint.as_deref().unwrap_or("");
        let resolution = self.spdx.resolve(&evidence_text, hint);

        let restriction_hits = self.restriction.scan(&evidence_text);

        let haystack = TargetHaystack {
            id: target.id.clone(),
            name: target.name.clone(),
            evidence_url: evidence_url.map(String::from),
            download_urls: target.download_urls(),
            publisher: target.publisher.clone(),
        };
        let denylist_hits = self.denylist.match_target(&haystack);

        let input = ResolverInput {
            resolved_spdx: resolution.spdx.clone(),
            confidence: resolution.confidence,
            denylist_hits: denylist_hits.clone(),
            restriction_hits: restriction_hits.clone(),
            evidence: EvidenceSignals {
                fetch_status: snapshot.status.clone(),
                changed_from_previous: snapshot.changed_from_previous,
                extraction_failed: snapshot.extraction_failed,
                offline: self.offline,
                evidence_required: evidence_url.is_some(),
            },
            gates: target.gates,
            review_required: target.review_required,
            review: target.review.clone(),
        };
        let (effective_bucket, bucket_reason, signals) = self.bucket.resolve(&input);

        let result = ClassificationResult {
            target_id: target.id.clone(),
            resolved_spdx: resolution.spdx,
            confidence: resolution.confidence,
            restriction_hits,
            denylist_hits,
            effective_bucket,
            bucket_reason,
            signals,
        };

        let evaluation = serde_json::to_vec_pretty(&result)?;
        std::fs::create_dir_all(self.target_dir(&target.id))?;
        atomic_write(&self.target_dir(&target.id).join("evaluation.json"), &evaluation)?;

        tracing::info!(
            target = %target.id,
            bucket = %result.effective_bucket,
            reason = %result.bucket_reason,
            spdx = %result.resolved_spdx,
            "classified target"
        );
        Ok(result)
    }

    /// Fetch and snapshot evidence; returns the snapshot and the
    /// normalized text available for SPDX/restriction scanning (empty
    /// when absent or unreadable).
    fn snapshot_evidence(
        &self,
        evidence_url: Option<&str>,
        manifest: &EvidenceManifest,
        previous: Option<&EvidenceSnapshot>,
    ) -> GreenlitResult<(EvidenceSnapshot, String)> {
        let url = match evidence_url {
            Some(url) => url,
            None => return Ok((EvidenceSnapshot::without_payload("", "skipped"), String::new())),
        };

        if self.offline {
            let snapshot = EvidenceSnapshot::without_payload(url, "skipped");
            manifest.persist_meta_only(&snapshot)?;
            return Ok((snapshot, String::new()));
        }

        let limits = FetchLimits::default();
        let fetched = self.fetcher.fetch(url, &BTreeMap::new(), &limits);

        match fetched.outcome {
            FetchOutcome::Ok {
                bytes,
                content_type,
                ..
            } => {
                let report = self.change.detect(
                    &bytes,
                    &content_type,
                    previous.and_then(|p| p.sha256_raw.as_deref()),
                    previous.and_then(|p| p.sha256_normalized_text.as_deref()),
                );
                let text = normalize_evidence(&bytes, &content_type)
                    .text
                    .unwrap_or_default();
                let snapshot =
                    EvidenceSnapshot::from_change_report(url, &content_type, &report, previous);
                let snapshot = manifest.persist(&bytes, &content_type, snapshot)?;
                Ok((snapshot, text))
            }
            outcome => {
                tracing::warn!(
                    url = %self.redactor.redact_url(url),
                    status = outcome.status_str(),
                    attempts = fetched.attempts,
                    "evidence fetch failed"
                );
                let snapshot = EvidenceSnapshot::without_payload(url, outcome.status_str());
                manifest.persist_meta_only(&snapshot)?;
                Ok((snapshot, String::new()))
            }
        }
    }

    /// Append the target's queue row to its bucket queue, secrets
    /// scrubbed.
    fn append_queue_row(
        &self,
        target: &Target,
        result: &ClassificationResult,
    ) -> GreenlitResult<()> {
        let row = QueueRow {
            id: target.id.clone(),
            effective_bucket: result.effective_bucket,
            license_profile: target.license_profile.clone(),
            resolved_spdx: result.resolved_spdx.clone(),
            bucket_reason: result.bucket_reason.clone(),
            download: target.download.clone(),
            routing: self.spec.resolve_routing(target.routing.as_deref()),
            priority: target.priority,
        };

        let line = self.redactor.redact_text(&serde_json::to_string(&row)?);
        let path = self.queue_path(result.effective_bucket);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    pub fn queue_path(&self, bucket: Bucket) -> PathBuf {
        let name = match bucket {
            Bucket::Green => "queue_green.jsonl",
            Bucket::Yellow => "queue_yellow.jsonl",
            Bucket::Red => "queue_red.jsonl",
        };
        self.work_root.join("queues").join(name)
    }

    pub fn target_dir(&self, target_id: &str) -> PathBuf {
        self.work_root.join("targets").join(target_id)
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }
}
