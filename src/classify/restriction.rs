//! Restriction-phrase scanning
//!
//! Evidence that resolves to a permissive SPDX id can still carry terms
//! that make it unusable for corpus training ("for research purposes
//! only", "may not be used to train"). The scanner runs the normalized
//! evidence text through an Aho-Corasick automaton of such phrases;
//! any hit is a signal for the bucket resolver, never a verdict here.

use aho_corasick::AhoCorasick;

/// Built-in phrase list, applied when the policy configures none.
const DEFAULT_PHRASES: &[&str] = &[
    "non-commercial",
    "noncommercial",
    "for research purposes only",
    "research use only",
    "evaluation purposes only",
    "internal use only",
    "no derivatives",
    "not for redistribution",
    "may not be redistributed",
    "may not be used to train",
    "no text and data mining",
    "all rights reserved",
    "prior written permission",
    "subject to additional terms",
];

/// Scans normalized evidence text for restriction phrases.
pub struct RestrictionScanner {
    automaton: AhoCorasick,
    phrases: Vec<String>,
}

impl RestrictionScanner {
    /// Build from configured phrases; an empty list selects the built-in
    /// defaults.
    pub fn new(phrases: Vec<String>) -> Self {
        let phrases = if phrases.is_empty() {
            DEFAULT_PHRASES.iter().map(|s| s.to_string()).collect()
        } else {
            phrases
        };
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&phrases)
            .expect("restriction phrase automaton must build");
        Self { automaton, phrases }
    }

    pub fn with_defaults() -> Self {
        Self::new(Vec::new())
    }

    /// Return each distinct phrase found, in configured order.
    pub fn scan(&self, text: &str) -> Vec<String> {
        let mut seen = vec![false; self.phrases.len()];
        for mat in self.automaton.find_iter(text) {
            seen[mat.pattern().as_usize()] = true;
        }
        self.phrases
            .iter()
            .zip(&seen)
            .filter(|(_, &hit)| hit)
            .map(|(phrase, _)| phrase.clone())
            .collect()
    }
}
