//! Denylist screening — blocked and force-review patterns
//!
//! Scans target metadata (id, name, evidence URL, download URLs,
//! publisher) against configured patterns. All hits are collected, never
//! short-circuited: the bucket resolver needs every signal for the audit
//! record, and severity aggregation happens there.

use serde::{Deserialize, Serialize};
use url::Url;

/// How a pattern is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Case-insensitive substring over id/name/URL fields.
    Substring,
    /// Case-insensitive regex over id/name/URL fields.
    Regex,
    /// Registrable-domain containment over URL hosts only.
    Domain,
    /// Publisher metadata only.
    Publisher,
}

/// What a hit forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Forces RED outright.
    HardRed,
    /// Forces YELLOW unless already RED.
    ForceYellow,
}

/// One configured denylist pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenylistPattern {
    pub pattern: String,
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub severity: Severity,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One pattern match against one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenylistHit {
    /// Which target field matched (`id`, `name`, `evidence_url`,
    /// `download_url`, `publisher`).
    pub field: String,
    pub pattern: String,
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub severity: Severity,
    pub reason: String,
}

/// The target metadata scanned by the matcher.
#[derive(Debug, Clone, Default)]
pub struct TargetHaystack {
    pub id: String,
    pub name: String,
    pub evidence_url: Option<String>,
    pub download_urls: Vec<String>,
    pub publisher: Option<String>,
}

struct CompiledPattern {
    source: DenylistPattern,
    regex: Option<regex::Regex>,
}

/// Scans target metadata against the configured denylist.
pub struct DenylistMatcher {
    patterns: Vec<CompiledPattern>,
}

impl DenylistMatcher {
    /// Compile the pattern list. An invalid regex is rejected up front so
    /// a bad policy file fails loudly instead of silently never matching.
    pub fn new(patterns: Vec<DenylistPattern>) -> Result<Self, String> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for p in patterns {
            let regex = match p.kind {
                PatternKind::Regex => Some(
                    regex::RegexBuilder::new(&p.pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| format!("invalid denylist regex '{}': {}", p.pattern, e))?,
                ),
                _ => None,
            };
            compiled.push(CompiledPattern { source: p, regex });
        }
        Ok(Self { patterns: compiled })
    }

    /// Collect every hit across all fields. No short-circuit.
    pub fn match_target(&self, haystack: &TargetHaystack) -> Vec<DenylistHit> {
        let mut hits = Vec::new();

        let text_fields: Vec<(&str, String)> = {
            let mut fields = vec![
                ("id", haystack.id.clone()),
                ("name", haystack.name.clone()),
            ];
            if let Some(url) = &haystack.evidence_url {
                fields.push(("evidence_url", url.clone()));
            }
            for url in &haystack.download_urls {
                fields.push(("download_url", url.clone()));
            }
            fields
        };

        let url_fields: Vec<(&str, &str)> = {
            let mut fields = Vec::new();
            if let Some(url) = &haystack.evidence_url {
                fields.push(("evidence_url", url.as_str()));
            }
            for url in &haystack.download_urls {
                fields.push(("download_url", url.as_str()));
            }
            fields
        };

        for compiled in &self.patterns {
            let p = &compiled.source;
            match p.kind {
                PatternKind::Substring => {
                    let needle = p.pattern.to_lowercase();
                    for (field, value) in &text_fields {
                        if value.to_lowercase().contains(&needle) {
                            hits.push(make_hit(field, p));
                        }
                    }
                }
                PatternKind::Regex => {
                    let regex = compiled.regex.as_ref().expect("compiled in constructor");
                    for (field, value) in &text_fields {
                        if regex.is_match(value) {
                            hits.push(make_hit(field, p));
                        }
                    }
                }
                PatternKind::Domain => {
                    for (field, value) in &url_fields {
                        if url_host_in_domain(value, &p.pattern) {
                            hits.push(make_hit(field, p));
                        }
                    }
                }
                PatternKind::Publisher => {
                    if let Some(publisher) = &haystack.publisher {
                        if publisher.to_lowercase().contains(&p.pattern.to_lowercase()) {
                            hits.push(make_hit("publisher", p));
                        }
                    }
                }
            }
        }

        hits
    }
}

fn make_hit(field: &str, pattern: &DenylistPattern) -> DenylistHit {
    DenylistHit {
        field: field.to_string(),
        pattern: pattern.pattern.clone(),
        kind: pattern.kind,
        severity: pattern.severity,
        reason: pattern
            .reason
            .clone()
            .unwrap_or_else(|| format!("denylist pattern '{}'", pattern.pattern)),
    }
}

/// Subdomain-safe domain containment: `example.com` matches
/// `example.com` and `cdn.example.com`, never `notexample.com`.
fn url_host_in_domain(url: &str, domain: &str) -> bool {
    let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) {
        Some(h) => h.to_lowercase(),
        None => return false,
    };
    let domain = domain.trim_start_matches('.').to_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(pattern: &str, kind: PatternKind, severity: Severity) -> DenylistPattern {
        DenylistPattern {
            pattern: pattern.to_string(),
            kind,
            severity,
            reason: None,
        }
    }

    fn haystack() -> TargetHaystack {
        TargetHaystack {
            id: "shadylib-corpus".to_string(),
            name: "ShadyLib Corpus".to_string(),
            evidence_url: Some("https://docs.example.com/terms".to_string()),
            download_urls: vec!["https://cdn.example.com/dump.tar.gz".to_string()],
            publisher: Some("Example Research Group".to_string()),
        }
    }

    #[test]
    fn test_substring_hit_case_insensitive() {
        let m = DenylistMatcher::new(vec![pattern(
            "SHADYLIB",
            PatternKind::Substring,
            Severity::HardRed,
        )])
        .unwrap();
        let hits = m.match_target(&haystack());
        assert_eq!(hits.len(), 2); // id and name
        assert!(hits.iter().all(|h| h.severity == Severity::HardRed));
    }

    #[test]
    fn test_domain_subdomain_safe() {
        let m = DenylistMatcher::new(vec![pattern(
            "example.com",
            PatternKind::Domain,
            Severity::ForceYellow,
        )])
        .unwrap();
        let hits = m.match_target(&haystack());
        assert_eq!(hits.len(), 2); // both URLs

        let mut other = haystack();
        other.evidence_url = Some("https://notexample.com/terms".to_string());
        other.download_urls.clear();
        assert!(m.match_target(&other).is_empty());
    }

    #[test]
    fn test_publisher_pattern_publisher_only() {
        let m = DenylistMatcher::new(vec![pattern(
            "example research",
            PatternKind::Publisher,
            Severity::ForceYellow,
        )])
        .unwrap();
        let hits = m.match_target(&haystack());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].field, "publisher");
    }

    #[test]
    fn test_regex_pattern() {
        let m = DenylistMatcher::new(vec![pattern(
            r"dump\.tar\.(gz|xz)$",
            PatternKind::Regex,
            Severity::ForceYellow,
        )])
        .unwrap();
        let hits = m.match_target(&haystack());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].field, "download_url");
    }

    #[test]
    fn test_invalid_regex_rejected() {
        assert!(DenylistMatcher::new(vec![pattern(
            "(unclosed",
            PatternKind::Regex,
            Severity::HardRed
        )])
        .is_err());
    }

    #[test]
    fn test_all_hits_collected_no_short_circuit() {
        let m = DenylistMatcher::new(vec![
            pattern("shadylib", PatternKind::Substring, Severity::HardRed),
            pattern("example.com", PatternKind::Domain, Severity::ForceYellow),
        ])
        .unwrap();
        let hits = m.match_target(&haystack());
        assert!(hits.iter().any(|h| h.severity == Severity::HardRed));
        assert!(hits.iter().any(|h| h.severity == Severity::ForceYellow));
    }
}
