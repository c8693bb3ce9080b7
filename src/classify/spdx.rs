//! SPDX resolution — declared hint first, then ordered keyword rules
//!
//! An explicit operator-declared hint wins outright (confidence 0.95)
//! unless it is one of the sentinel values MIXED/UNKNOWN/DERIVED, which
//! mean "work it out from the evidence". Evidence text is scanned against
//! an ordered rule list; the first rule with any matching needle wins.
//! Short alphanumeric needles (≤4 chars) require word-boundary matches so
//! "MIT" never fires inside "submitted".

use serde::{Deserialize, Serialize};

/// Hint values that defer to evidence-text resolution.
const SENTINEL_HINTS: &[&str] = &["MIXED", "UNKNOWN", "DERIVED"];

/// Needles at or below this length need word boundaries.
const WORD_BOUNDARY_NEEDLE_LEN: usize = 4;

const HINT_CONFIDENCE: f64 = 0.95;
const RULE_CONFIDENCE_BASE: f64 = 0.6;
const RULE_CONFIDENCE_PER_NEEDLE: f64 = 0.05;
const RULE_CONFIDENCE_CAP: f64 = 0.9;
const DERIVED_CONFIDENCE: f64 = 0.6;
const UNKNOWN_CONFIDENCE: f64 = 0.2;

/// One ordered keyword rule: any needle match resolves to `spdx`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpdxRule {
    pub match_any: Vec<String>,
    pub spdx: String,
}

/// Outcome of SPDX resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpdxResolution {
    pub spdx: String,
    pub confidence: f64,
    pub reason: String,
}

/// Maps free-text evidence plus a declared hint to an SPDX identifier.
pub struct SpdxResolver {
    rules: Vec<SpdxRule>,
}

impl SpdxResolver {
    /// Build from configured rules; an empty list selects the built-in
    /// table.
    pub fn new(rules: Vec<SpdxRule>) -> Self {
        let rules = if rules.is_empty() { default_rules() } else { rules };
        Self { rules }
    }

    pub fn with_defaults() -> Self {
        Self::new(Vec::new())
    }

    /// Resolve an SPDX identifier from evidence text and a declared hint.
    pub fn resolve(&self, evidence_text: &str, spdx_hint: &str) -> SpdxResolution {
        let hint = spdx_hint.trim();
        let hint_upper = hint.to_ascii_uppercase();

        if !hint.is_empty() && !SENTINEL_HINTS.contains(&hint_upper.as_str()) {
            return SpdxResolution {
                spdx: hint.to_string(),
                confidence: HINT_CONFIDENCE,
                reason: "declared hint accepted verbatim".to_string(),
            };
        }

        // Scan the hint too: a sentinel like DERIVED carries no keywords,
        // but operators sometimes put free text in the hint field.
        let haystack = format!("{} {}", hint, evidence_text).to_ascii_lowercase();

        for rule in &self.rules {
            if let Some(needle) = rule
                .match_any
                .iter()
                .find(|needle| needle_matches(&haystack, &needle.to_ascii_lowercase()))
            {
                let confidence = rule_confidence(rule.match_any.len());
                return SpdxResolution {
                    spdx: rule.spdx.clone(),
                    confidence,
                    reason: format!("normalized via rule match: '{}'", needle),
                };
            }
        }

        if hint_upper == "DERIVED" {
            return SpdxResolution {
                spdx: "Derived".to_string(),
                confidence: DERIVED_CONFIDENCE,
                reason: "derived hint with no rule match".to_string(),
            };
        }

        SpdxResolution {
            spdx: "UNKNOWN".to_string(),
            confidence: UNKNOWN_CONFIDENCE,
            reason: "no hint and no rule matched".to_string(),
        }
    }
}

/// Confidence for a rule match scales with configured needle count,
/// capped. Changing these constants is a classification behavior change
/// and needs sign-off; see the constants test.
pub fn rule_confidence(needle_count: usize) -> f64 {
    (RULE_CONFIDENCE_BASE + RULE_CONFIDENCE_PER_NEEDLE * needle_count as f64)
        .min(RULE_CONFIDENCE_CAP)
}

/// Needle match with a word-boundary guard for short alphanumeric needles.
fn needle_matches(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let needs_boundary =
        needle.len() <= WORD_BOUNDARY_NEEDLE_LEN && needle.chars().all(|c| c.is_alphanumeric());

    if !needs_boundary {
        return haystack.contains(needle);
    }

    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = !haystack[abs + needle.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = abs + needle.len();
    }
    false
}

/// Built-in rule table, ordered most-specific first so compound names
/// (CC-BY-NC-SA) resolve before their prefixes (CC-BY).
pub fn default_rules() -> Vec<SpdxRule> {
    fn rule(spdx: &str, needles: &[&str]) -> SpdxRule {
        SpdxRule {
            match_any: needles.iter().map(|s| s.to_string()).collect(),
            spdx: spdx.to_string(),
        }
    }

    vec![
        rule(
            "CC-BY-NC-SA-4.0",
            &[
                "cc-by-nc-sa",
                "attribution-noncommercial-sharealike",
                "creative commons attribution-noncommercial-sharealike",
            ],
        ),
        rule(
            "CC-BY-NC-4.0",
            &[
                "cc-by-nc",
                "attribution-noncommercial",
                "creative commons attribution-noncommercial",
                "noncommercial 4.0",
            ],
        ),
        rule(
            "CC-BY-ND-4.0",
            &["cc-by-nd", "attribution-noderivatives", "no derivatives 4.0"],
        ),
        rule(
            "CC-BY-SA-4.0",
            &[
                "cc-by-sa",
                "attribution-sharealike",
                "creative commons attribution-sharealike",
                "sharealike 4.0",
            ],
        ),
        rule(
            "CC-BY-4.0",
            &[
                "cc-by-4.0",
                "cc by 4.0",
                "creative commons attribution 4.0",
                "attribution 4.0 international",
            ],
        ),
        rule(
            "CC0-1.0",
            &["cc0", "creative commons zero", "public domain dedication"],
        ),
        rule(
            "AGPL-3.0-only",
            &["agpl", "affero general public license"],
        ),
        rule(
            "LGPL-3.0-only",
            &["lgpl", "lesser general public license"],
        ),
        rule(
            "GPL-3.0-only",
            &["gpl-3", "gplv3", "gnu general public license version 3"],
        ),
        rule(
            "GPL-2.0-only",
            &["gpl-2", "gplv2", "gnu general public license version 2"],
        ),
        rule(
            "Apache-2.0",
            &["apache license", "apache-2.0", "apache 2.0"],
        ),
        rule(
            "MPL-2.0",
            &["mozilla public license", "mpl-2.0"],
        ),
        rule("EPL-2.0", &["eclipse public license"]),
        rule(
            "ODbL-1.0",
            &["odbl", "open database license"],
        ),
        rule(
            "BSD-3-Clause",
            &["bsd-3-clause", "bsd 3-clause", "3-clause bsd"],
        ),
        rule(
            "BSD-2-Clause",
            &["bsd-2-clause", "bsd 2-clause", "2-clause bsd", "simplified bsd"],
        ),
        rule(
            "MIT",
            &["mit license", "mit"],
        ),
        rule("ISC", &["isc license", "isc"]),
        rule("Unlicense", &["unlicense"]),
        rule(
            "Zlib",
            &["zlib license", "zlib"],
        ),
    ]
}
