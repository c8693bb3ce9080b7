//! Bucket resolution — the pure GREEN/YELLOW/RED decision function
//!
//! Combines SPDX resolution, denylist hits, restriction phrases, evidence
//! status, and review signoff into one bucket plus one canonical
//! machine-readable reason. Resolution order (§ each step may only move
//! the bucket toward more restrictive, never less, except the final
//! review-approval override):
//!
//! 1. SPDX allow/conditional/deny prefix table
//! 2. low-confidence downgrade of GREEN
//! 3. `snapshot_terms` gate vs. failed evidence fetch
//! 4. evidence changed from previous snapshot
//! 5. restriction-phrase gate (hits or failed extraction)
//! 6. manual-review gate
//! 7. denylist severity aggregation (`hard_red` overrides everything)
//! 8. offline mode with required-but-absent evidence
//! 9. human review: rejection → RED; missing approval caps GREEN;
//!    approval with promote_to=GREEN restores GREEN, undoing steps 2-6
//!    only (never over RED, nor the step 7/8 yellows)
//!
//! The function is pure and idempotent: identical inputs reproduce the
//! identical `(bucket, reason)` every time.

use super::denylist::{DenylistHit, Severity};
use super::{Bucket, Gates, ReviewState};
use serde::{Deserialize, Serialize};

/// SPDX prefixes that start GREEN (allow).
const ALLOW_PREFIXES: &[&str] = &[
    "MIT", "APACHE-", "BSD-", "CC0", "CC-BY-4", "CC-BY-3", "CC-PDDC", "ISC", "UNLICENSE", "ZLIB",
    "WTFPL",
];

/// SPDX prefixes that start RED (deny).
const DENY_PREFIXES: &[&str] = &["CC-BY-NC", "CC-BY-ND", "PROPRIETARY", "SSPL", "BUSL", "COMMERCIAL"];

/// Where the classified SPDX id starts on the allow/conditional/deny table.
pub fn spdx_bucket(spdx: &str) -> Bucket {
    let upper = spdx.trim().to_ascii_uppercase();
    // Deny first: CC-BY-NC would otherwise match the CC-BY allow prefix.
    if DENY_PREFIXES.iter().any(|p| upper.starts_with(p)) {
        return Bucket::Red;
    }
    if ALLOW_PREFIXES.iter().any(|p| upper.starts_with(p)) {
        return Bucket::Green;
    }
    // Copyleft, share-alike, Derived, UNKNOWN, MIXED, and everything
    // unrecognized needs screening.
    Bucket::Yellow
}

/// Evidence-side inputs to resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceSignals {
    /// Canonical fetch status (`ok`, `blocked_url`, `response_too_large`,
    /// `error`, `skipped`).
    pub fetch_status: String,
    /// Policy-resolved change verdict from the change detector.
    pub changed_from_previous: bool,
    pub extraction_failed: bool,
    /// Run executed without network access.
    pub offline: bool,
    /// An evidence URL was configured for this target.
    pub evidence_required: bool,
}

/// Everything the resolver consumes. Assembled by the pipeline driver;
/// resolution itself performs no I/O.
#[derive(Debug, Clone)]
pub struct ResolverInput {
    pub resolved_spdx: String,
    pub confidence: f64,
    pub denylist_hits: Vec<DenylistHit>,
    pub restriction_hits: Vec<String>,
    pub evidence: EvidenceSignals,
    pub gates: Gates,
    pub review_required: bool,
    pub review: ReviewState,
}

/// Machine-readable audit bundle recorded alongside every decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signals {
    pub spdx_bucket: Bucket,
    pub low_confidence: bool,
    pub evidence_fetch_failed: bool,
    pub evidence_changed: bool,
    pub extraction_failed: bool,
    pub restriction_hit_count: usize,
    pub denylist_hard_red: bool,
    pub denylist_force_yellow: bool,
    pub offline_missing_evidence: bool,
    pub review_required: bool,
    pub review_state: ReviewState,
}

/// The pure decision engine.
#[derive(Debug, Clone)]
pub struct BucketResolver {
    pub min_confidence: f64,
    pub low_confidence_bucket: Bucket,
}

impl Default for BucketResolver {
    fn default() -> Self {
        Self {
            min_confidence: 0.75,
            low_confidence_bucket: Bucket::Yellow,
        }
    }
}

impl BucketResolver {
    pub fn new(min_confidence: f64, low_confidence_bucket: Bucket) -> Self {
        Self {
            min_confidence,
            low_confidence_bucket,
        }
    }

    /// Resolve the effective bucket, its canonical reason, and the audit
    /// signal bundle.
    pub fn resolve(&self, input: &ResolverInput) -> (Bucket, String, Signals) {
        let start = spdx_bucket(&input.resolved_spdx);
        let mut bucket = start;
        let mut reason = match start {
            Bucket::Green => "spdx_allow".to_string(),
            Bucket::Yellow => "spdx_conditional".to_string(),
            Bucket::Red => "spdx_deny".to_string(),
        };

        // Restrict `bucket` to at least `candidate`, recording the cause
        // only when this step is the one that moved it.
        let restrict = |bucket: &mut Bucket, reason: &mut String, candidate: Bucket, cause: &str| {
            let more_restrictive = matches!(
                (*bucket, candidate),
                (Bucket::Green, Bucket::Yellow)
                    | (Bucket::Green, Bucket::Red)
                    | (Bucket::Yellow, Bucket::Red)
            );
            if more_restrictive {
                *bucket = candidate;
                *reason = cause.to_string();
            }
        };

        // 2. Low confidence downgrades GREEN.
        let low_confidence = input.confidence < self.min_confidence;
        if low_confidence && bucket == Bucket::Green {
            restrict(&mut bucket, &mut reason, self.low_confidence_bucket, "low_confidence");
        }

        // 3. snapshot_terms gate vs. failed fetch. Offline skips are
        //    handled by step 8.
        let fetch_attempted = !input.evidence.offline && input.evidence.evidence_required;
        let evidence_fetch_failed = fetch_attempted && input.evidence.fetch_status != "ok";
        if input.gates.snapshot_terms && evidence_fetch_failed {
            restrict(&mut bucket, &mut reason, Bucket::Yellow, "evidence_fetch_failed");
        }

        // 4. Evidence changed from the previous snapshot.
        if input.evidence.changed_from_previous {
            restrict(&mut bucket, &mut reason, Bucket::Yellow, "evidence_changed");
        }

        // 5. Restriction gate: hits, or extraction failure under the gate
        //    (unreadable evidence cannot prove absence of restrictions).
        if input.gates.restriction_phrases
            && (!input.restriction_hits.is_empty() || input.evidence.extraction_failed)
        {
            let cause = if input.restriction_hits.is_empty() {
                "extraction_failed_under_gate"
            } else {
                "restriction_phrase"
            };
            restrict(&mut bucket, &mut reason, Bucket::Yellow, cause);
        }

        // 6. Manual-review gate.
        if input.gates.manual_review {
            restrict(&mut bucket, &mut reason, Bucket::Yellow, "manual_review_gate");
        }

        // 7. Denylist aggregation. hard_red overrides everything above.
        let denylist_hard_red = input
            .denylist_hits
            .iter()
            .any(|h| h.severity == Severity::HardRed);
        let denylist_force_yellow = input
            .denylist_hits
            .iter()
            .any(|h| h.severity == Severity::ForceYellow);
        if denylist_hard_red {
            bucket = Bucket::Red;
            reason = "denylist_hard_red".to_string();
        } else if denylist_force_yellow {
            restrict(&mut bucket, &mut reason, Bucket::Yellow, "denylist_force_yellow");
        }

        // 8. Offline with required-but-absent evidence: never GREEN on
        //    unverified terms.
        let offline_missing_evidence = input.evidence.offline && input.evidence.evidence_required;
        if offline_missing_evidence {
            restrict(&mut bucket, &mut reason, Bucket::Yellow, "offline_missing_evidence");
        }

        // 9. Human review. Rejection forces RED; required-but-missing
        //    approval caps GREEN; explicit GREEN promotion undoes steps
        //    2-6 only. It never overrides RED, a denylist force_yellow,
        //    or an offline run with unverified evidence.
        match &input.review {
            ReviewState::Rejected => {
                bucket = Bucket::Red;
                reason = "review_rejected".to_string();
            }
            ReviewState::Pending if input.review_required => {
                restrict(&mut bucket, &mut reason, Bucket::Yellow, "review_pending");
            }
            ReviewState::Approved { promote_to } => {
                if *promote_to == Some(Bucket::Green)
                    && bucket == Bucket::Yellow
                    && input.restriction_hits.is_empty()
                    && !denylist_hard_red
                    && !denylist_force_yellow
                    && !offline_missing_evidence
                {
                    bucket = Bucket::Green;
                    reason = "review_approved_promotion".to_string();
                }
            }
            ReviewState::Pending => {}
        }

        let signals = Signals {
            spdx_bucket: start,
            low_confidence,
            evidence_fetch_failed,
            evidence_changed: input.evidence.changed_from_previous,
            extraction_failed: input.evidence.extraction_failed,
            restriction_hit_count: input.restriction_hits.len(),
            denylist_hard_red,
            denylist_force_yellow,
            offline_missing_evidence,
            review_required: input.review_required,
            review_state: input.review.clone(),
        };

        (bucket, reason, signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::denylist::PatternKind;

    fn base_input(spdx: &str, confidence: f64) -> ResolverInput {
        ResolverInput {
            resolved_spdx: spdx.to_string(),
            confidence,
            denylist_hits: Vec::new(),
            restriction_hits: Vec::new(),
            evidence: EvidenceSignals {
                fetch_status: "ok".to_string(),
                changed_from_previous: false,
                extraction_failed: false,
                offline: false,
                evidence_required: true,
            },
            gates: Gates::default(),
            review_required: false,
            review: ReviewState::Pending,
        }
    }

    fn hit(severity: Severity) -> DenylistHit {
        DenylistHit {
            field: "name".to_string(),
            pattern: "p".to_string(),
            kind: PatternKind::Substring,
            severity,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_spdx_prefix_table() {
        assert_eq!(spdx_bucket("MIT"), Bucket::Green);
        assert_eq!(spdx_bucket("Apache-2.0"), Bucket::Green);
        assert_eq!(spdx_bucket("CC-BY-4.0"), Bucket::Green);
        assert_eq!(spdx_bucket("GPL-3.0-only"), Bucket::Yellow);
        assert_eq!(spdx_bucket("CC-BY-SA-4.0"), Bucket::Yellow);
        assert_eq!(spdx_bucket("UNKNOWN"), Bucket::Yellow);
        assert_eq!(spdx_bucket("Derived"), Bucket::Yellow);
        assert_eq!(spdx_bucket("CC-BY-NC-4.0"), Bucket::Red);
        assert_eq!(spdx_bucket("CC-BY-ND-4.0"), Bucket::Red);
    }

    #[test]
    fn test_clean_permissive_is_green() {
        let r = BucketResolver::default();
        let (bucket, reason, _) = r.resolve(&base_input("MIT", 0.95));
        assert_eq!(bucket, Bucket::Green);
        assert_eq!(reason, "spdx_allow");
    }

    #[test]
    fn test_low_confidence_downgrade() {
        let r = BucketResolver::default();
        let (bucket, reason, signals) = r.resolve(&base_input("MIT", 0.3));
        assert_eq!(bucket, Bucket::Yellow);
        assert_eq!(reason, "low_confidence");
        assert!(signals.low_confidence);
    }

    #[test]
    fn test_snapshot_gate_failed_fetch() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.95);
        input.gates.snapshot_terms = true;
        input.evidence.fetch_status = "blocked_url".to_string();
        let (bucket, reason, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Yellow);
        assert_eq!(reason, "evidence_fetch_failed");
    }

    #[test]
    fn test_evidence_change_forces_yellow() {
        let r = BucketResolver::default();
        let mut input = base_input("Apache-2.0", 0.95);
        input.evidence.changed_from_previous = true;
        let (bucket, reason, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Yellow);
        assert_eq!(reason, "evidence_changed");
    }

    #[test]
    fn test_restriction_gate() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.95);
        input.gates.restriction_phrases = true;
        input.restriction_hits = vec!["non-commercial".to_string()];
        let (bucket, reason, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Yellow);
        assert_eq!(reason, "restriction_phrase");
    }

    #[test]
    fn test_extraction_failure_under_gate() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.95);
        input.gates.restriction_phrases = true;
        input.evidence.extraction_failed = true;
        let (bucket, reason, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Yellow);
        assert_eq!(reason, "extraction_failed_under_gate");
    }

    #[test]
    fn test_hard_red_overrides_everything() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.99);
        input.denylist_hits = vec![hit(Severity::HardRed)];
        input.review = ReviewState::Approved {
            promote_to: Some(Bucket::Green),
        };
        let (bucket, reason, signals) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Red);
        assert_eq!(reason, "denylist_hard_red");
        assert!(signals.denylist_hard_red);
    }

    #[test]
    fn test_force_yellow_does_not_downgrade_red() {
        let r = BucketResolver::default();
        let mut input = base_input("CC-BY-NC-4.0", 0.95);
        input.denylist_hits = vec![hit(Severity::ForceYellow)];
        let (bucket, reason, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Red);
        assert_eq!(reason, "spdx_deny");
    }

    #[test]
    fn test_offline_missing_evidence() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.95);
        input.evidence.offline = true;
        input.evidence.fetch_status = "skipped".to_string();
        let (bucket, reason, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Yellow);
        assert_eq!(reason, "offline_missing_evidence");
    }

    #[test]
    fn test_review_rejection_forces_red() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.95);
        input.review = ReviewState::Rejected;
        let (bucket, reason, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Red);
        assert_eq!(reason, "review_rejected");
    }

    #[test]
    fn test_review_required_caps_green() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.95);
        input.review_required = true;
        let (bucket, reason, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Yellow);
        assert_eq!(reason, "review_pending");
    }

    #[test]
    fn test_approval_promotes_back_to_green() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.3); // low confidence → YELLOW
        input.review = ReviewState::Approved {
            promote_to: Some(Bucket::Green),
        };
        let (bucket, reason, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Green);
        assert_eq!(reason, "review_approved_promotion");
    }

    #[test]
    fn test_approval_never_promotes_past_restriction_hits() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.95);
        input.gates.restriction_phrases = true;
        input.restriction_hits = vec!["no derivatives".to_string()];
        input.review = ReviewState::Approved {
            promote_to: Some(Bucket::Green),
        };
        let (bucket, _, _) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Yellow);
    }

    #[test]
    fn test_approval_never_promotes_past_denylist_force_yellow() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.95);
        input.denylist_hits = vec![hit(Severity::ForceYellow)];
        input.review = ReviewState::Approved {
            promote_to: Some(Bucket::Green),
        };
        let (bucket, reason, signals) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Yellow);
        assert_eq!(reason, "denylist_force_yellow");
        assert!(signals.denylist_force_yellow);
    }

    #[test]
    fn test_approval_never_promotes_past_offline_missing_evidence() {
        let r = BucketResolver::default();
        let mut input = base_input("MIT", 0.95);
        input.evidence.offline = true;
        input.evidence.fetch_status = "skipped".to_string();
        input.review = ReviewState::Approved {
            promote_to: Some(Bucket::Green),
        };
        let (bucket, reason, signals) = r.resolve(&input);
        assert_eq!(bucket, Bucket::Yellow);
        assert_eq!(reason, "offline_missing_evidence");
        assert!(signals.offline_missing_evidence);
    }

    #[test]
    fn test_determinism() {
        let r = BucketResolver::default();
        let mut input = base_input("GPL-3.0-only", 0.8);
        input.denylist_hits = vec![hit(Severity::ForceYellow)];
        input.restriction_hits = vec!["all rights reserved".to_string()];
        let first = r.resolve(&input);
        for _ in 0..10 {
            let again = r.resolve(&input);
            assert_eq!(again.0, first.0);
            assert_eq!(again.1, first.1);
        }
    }
}
