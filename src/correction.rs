//! Dictionary correction engine
//!
//! Applies a user's phrase -> correction rules to transcribed text.
//! Pure text transformation; the dictionary itself is loaded by the
//! caller.

use regex::RegexBuilder;
use std::collections::HashMap;
use tracing::warn;

/// One phrase -> correction rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionRule {
    pub phrase: String,
    pub correction: String,
}

/// Apply dictionary corrections to transcribed text.
///
/// All phrases are compiled into one alternation, longest phrase
/// first, and applied in a single pass over the input. Longer phrases
/// therefore win over any shorter phrase they contain, and a span
/// already replaced by one rule is never re-matched by another.
/// Matching is case-insensitive and literal (phrases are escaped
/// before compilation). There is no word-boundary guarantee: a phrase
/// that is a substring of a larger word is replaced as well, matching
/// the observed source behavior.
pub fn apply_corrections(text: &str, rules: &[CorrectionRule]) -> String {
    let mut sorted: Vec<&CorrectionRule> =
        rules.iter().filter(|r| !r.phrase.is_empty()).collect();
    if sorted.is_empty() {
        return text.to_string();
    }
    sorted.sort_by(|a, b| b.phrase.len().cmp(&a.phrase.len()));

    // The regex crate uses leftmost-first alternation semantics, so
    // listing longer phrases first makes them win at the same position.
    let pattern = sorted
        .iter()
        .map(|r| regex::escape(&r.phrase))
        .collect::<Vec<_>>()
        .join("|");
    let re = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re,
        Err(e) => {
            // Escaped literals should always compile; skip corrections
            // rather than fail the transcription.
            warn!("Failed to compile dictionary pattern: {}", e);
            return text.to_string();
        }
    };

    let mut corrections: HashMap<String, &str> = HashMap::new();
    for rule in &sorted {
        corrections
            .entry(rule.phrase.to_lowercase())
            .or_insert(rule.correction.as_str());
    }

    re.replace_all(text, |caps: &regex::Captures| {
        let matched = &caps[0];
        corrections
            .get(&matched.to_lowercase())
            .map(|c| c.to_string())
            .unwrap_or_else(|| matched.to_string())
    })
    .into_owned()
}
