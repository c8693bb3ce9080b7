//! Classification pipeline test suite
//!
//! Exercises the full offline classification path end to end: SPDX
//! resolution from hints and evidence text, denylist and restriction
//! screening, bucket resolution, queue-row emission, evidence change
//! detection across persisted snapshots, and secret redaction of
//! everything that reaches disk.

use greenlit::classify::{
    Bucket, CurationPolicy, DenylistPattern, PatternKind, RestrictionScanner, Severity,
    SpdxResolver, Target,
};
use greenlit::evidence::{ChangeDetector, EvidenceManifest, EvidenceSnapshot};
use greenlit::pipeline::{ClassificationRun, PipelineSpec, QueueRow};
use greenlit::ClassificationResult;
use tempfile::TempDir;

// ─── Helper ─────────────────────────────────────────────────────────

fn make_target(id: &str, hint: Option<&str>) -> Target {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": format!("Dataset {}", id),
        "license_profile": "permissive",
        "license_evidence": { "spdx_hint": hint },
        "download": { "kind": "http", "url": format!("https://data.example/{}.tar.gz", id) },
        "priority": 50
    }))
    .expect("target json")
}

fn offline_run(dir: &TempDir, policy: CurationPolicy) -> ClassificationRun {
    ClassificationRun::new(PipelineSpec::new("math"), policy, dir.path(), true)
        .expect("run construction")
}

// ═══════════════════════════════════════════════════════════════════
// Section 1: SPDX resolution
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_concrete_hint_accepted_verbatim() {
    let resolver = SpdxResolver::with_defaults();
    let r = resolver.resolve("completely unrelated evidence text", "Apache-2.0");
    assert_eq!(r.spdx, "Apache-2.0");
    assert!(r.confidence > 0.9);
}

#[test]
fn test_sentinel_hint_defers_to_evidence_text() {
    let resolver = SpdxResolver::with_defaults();
    let text = "This work is licensed under the Apache License, Version 2.0.";
    let r = resolver.resolve(text, "MIXED");
    assert_eq!(r.spdx, "Apache-2.0");
    // Rule-derived confidence never reaches hint confidence.
    assert!(r.confidence < 0.95);
}

#[test]
fn test_unrecognized_text_is_unknown_and_yellow() {
    let resolver = SpdxResolver::with_defaults();
    let r = resolver.resolve("all content copyright the publisher", "");
    assert_eq!(r.spdx, "UNKNOWN");
    assert!(r.confidence < 0.5);
    assert_eq!(greenlit::classify::bucket::spdx_bucket(&r.spdx), Bucket::Yellow);
}

#[test]
fn test_nc_variant_never_mistaken_for_cc_by() {
    let resolver = SpdxResolver::with_defaults();
    let text = "Distributed under the Creative Commons Attribution-NonCommercial 4.0 license (CC BY-NC 4.0).";
    let r = resolver.resolve(text, "UNKNOWN");
    assert!(r.spdx.starts_with("CC-BY-NC"), "resolved {}", r.spdx);
    assert_eq!(greenlit::classify::bucket::spdx_bucket(&r.spdx), Bucket::Red);
}

// ═══════════════════════════════════════════════════════════════════
// Section 2: Offline classification run
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_run_buckets_and_evaluations() {
    let dir = TempDir::new().unwrap();
    let run = offline_run(&dir, CurationPolicy::default());

    let targets = vec![
        make_target("mit-corpus", Some("MIT")),
        make_target("gpl-corpus", Some("GPL-3.0-only")),
        make_target("nc-corpus", Some("CC-BY-NC-4.0")),
    ];
    let results = run.run(&targets).unwrap();

    assert_eq!(results[0].effective_bucket, Bucket::Green);
    assert_eq!(results[1].effective_bucket, Bucket::Yellow);
    assert_eq!(results[2].effective_bucket, Bucket::Red);

    // Every target got a persisted evaluation that parses back.
    for t in &targets {
        let raw = std::fs::read_to_string(
            run.target_dir(&t.id).join("evaluation.json"),
        )
        .unwrap();
        let parsed: ClassificationResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.target_id, t.id);
        assert!(!parsed.bucket_reason.is_empty());
    }
}

#[test]
fn test_queue_rows_carry_routing_and_priority() {
    let dir = TempDir::new().unwrap();
    let run = offline_run(&dir, CurationPolicy::default());

    let mut routed = make_target("routed", Some("MIT"));
    routed.routing = Some("gpu-pool".to_string());
    let plain = make_target("plain", Some("MIT"));

    run.run(&[routed, plain]).unwrap();

    let content = std::fs::read_to_string(run.queue_path(Bucket::Green)).unwrap();
    let rows: Vec<QueueRow> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].routing, "gpu-pool");
    assert_eq!(rows[1].routing, "default");
    assert!(rows.iter().all(|r| r.priority == 50));
    assert!(rows.iter().all(|r| r.resolved_spdx == "MIT"));
}

#[test]
fn test_denylisted_publisher_forces_red_over_clean_license() {
    let dir = TempDir::new().unwrap();
    let mut policy = CurationPolicy::default();
    policy.denylist.push(DenylistPattern {
        pattern: "Shady Aggregator".to_string(),
        kind: PatternKind::Publisher,
        severity: Severity::HardRed,
        reason: Some("known license launderer".to_string()),
    });
    let run = offline_run(&dir, policy);

    let mut t = make_target("laundered", Some("MIT"));
    t.publisher = Some("Shady Aggregator Inc".to_string());
    let result = run.classify_target(&t).unwrap();
    assert_eq!(result.effective_bucket, Bucket::Red);
    assert_eq!(result.bucket_reason, "denylist_hard_red");
    assert_eq!(result.denylist_hits.len(), 1);
}

#[test]
fn test_rerun_overwrites_evaluation_deterministically() {
    let dir = TempDir::new().unwrap();
    let run = offline_run(&dir, CurationPolicy::default());
    let t = make_target("stable", Some("GPL-3.0-only"));

    let first = run.classify_target(&t).unwrap();
    let second = run.classify_target(&t).unwrap();
    assert_eq!(first.effective_bucket, second.effective_bucket);
    assert_eq!(first.bucket_reason, second.bucket_reason);

    let raw =
        std::fs::read_to_string(run.target_dir("stable").join("evaluation.json")).unwrap();
    let parsed: ClassificationResult = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.effective_bucket, second.effective_bucket);
}

// ═══════════════════════════════════════════════════════════════════
// Section 3: Evidence change detection across snapshots
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_cosmetic_html_churn_does_not_flip_change_verdict() {
    let dir = TempDir::new().unwrap();
    let manifest = EvidenceManifest::new(dir.path(), 3);
    let detector = ChangeDetector::default();
    let url = "https://example.com/terms";

    let v1 = b"<html><body><p>You may use this data under   the MIT license.</p></body></html>";
    let report = detector.detect(v1, "text/html", None, None);
    let snap = EvidenceSnapshot::from_change_report(url, "text/html", &report, None);
    let snap = manifest.persist(v1, "text/html", snap).unwrap();
    assert!(!snap.changed_from_previous);

    // Same terms, different markup and whitespace.
    let v2 = b"<html>\n  <body>\n    <p>You may use this data under the MIT license.</p>\n  </body>\n</html>";
    let previous = manifest.load_previous().unwrap();
    let report = detector.detect(
        v2,
        "text/html",
        previous.sha256_raw.as_deref(),
        previous.sha256_normalized_text.as_deref(),
    );
    assert!(report.raw_changed);
    assert!(report.cosmetic_change);
    assert!(!report.changed_from_previous);
}

#[test]
fn test_substantive_change_flags_and_rotates_payload() {
    let dir = TempDir::new().unwrap();
    let manifest = EvidenceManifest::new(dir.path(), 3);
    let detector = ChangeDetector::default();
    let url = "https://example.com/terms";

    let v1 = b"<p>Free for any use.</p>";
    let report = detector.detect(v1, "text/html", None, None);
    let snap = EvidenceSnapshot::from_change_report(url, "text/html", &report, None);
    manifest.persist(v1, "text/html", snap).unwrap();

    let v2 = b"<p>Free for non-commercial use only.</p>";
    let previous = manifest.load_previous().unwrap();
    let report = detector.detect(
        v2,
        "text/html",
        previous.sha256_raw.as_deref(),
        previous.sha256_normalized_text.as_deref(),
    );
    assert!(report.changed_from_previous);
    assert!(!report.cosmetic_change);

    let snap = EvidenceSnapshot::from_change_report(url, "text/html", &report, Some(&previous));
    let snap = manifest.persist(v2, "text/html", snap).unwrap();
    // The replaced payload survives in the history window.
    assert_eq!(snap.history.len(), 1);
    assert!(dir.path().join(&snap.history[0].file).exists());
}

#[test]
fn test_restriction_phrases_found_in_changed_terms() {
    let scanner = RestrictionScanner::new(Vec::new());
    let hits = scanner.scan(
        "Data is provided for research purposes only and may not be redistributed. \
         Commercial use requires a separate agreement; contents are non-commercial.",
    );
    assert!(hits.iter().any(|h| h.contains("research purposes only")));
    assert!(hits.iter().any(|h| h.contains("non-commercial")));
}

// ═══════════════════════════════════════════════════════════════════
// Section 4: Secret redaction of persisted artifacts
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_queue_rows_never_leak_download_credentials() {
    let dir = TempDir::new().unwrap();
    let run = offline_run(&dir, CurationPolicy::default());

    let mut t = make_target("authed", Some("MIT"));
    t.download = serde_json::json!({
        "kind": "http",
        "url": "https://data.example/dump.tar.gz",
        "access_token": "supersecretvalue12345"
    });
    run.run(&[t]).unwrap();

    let content = std::fs::read_to_string(run.queue_path(Bucket::Green)).unwrap();
    assert!(!content.contains("supersecretvalue12345"));
    assert!(content.contains("[REDACTED]"));
}
