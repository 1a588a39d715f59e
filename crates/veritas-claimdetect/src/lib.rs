//! Scores and classifies candidate sentences from transcript text (spec
//! §4.3). A pure function: same input text and options always produce
//! the identical candidate list (spec §8 "Claim detector is
//! deterministic").

pub mod lexicon;

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use regex_lite::Regex;
use veritas_protocol::ClaimCategory;
use veritas_protocol::ClaimTypeTag;
use veritas_protocol::DetectionReason;

use crate::lexicon::keyword_hits;
use crate::lexicon::matches_any;
use crate::lexicon::COMPARATIVE_WORDS;
use crate::lexicon::ECONOMIC_WORDS;
use crate::lexicon::POLITICAL_WORDS;
use crate::lexicon::QUANTITATIVE_WORDS;

/// Sentence boundary used both here and by the transcript assembler
/// (spec §4.2/§4.3 both cite the same regex).
pub const SENTENCE_BOUNDARY_PATTERN: &str = r#"[^.!?]+[.!?]+(?:["')\]]+)?"#;

const MIN_SENTENCE_LEN: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct DetectOptions {
    pub chunk_start_sec: f64,
    pub threshold: f64,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            chunk_start_sec: 0.0,
            threshold: 0.62,
        }
    }
}

/// One scored sentence that cleared `threshold` (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub score: f64,
    pub reasons: Vec<DetectionReason>,
    pub category: ClaimCategory,
    pub tag: ClaimTypeTag,
    pub chunk_start_sec: f64,
}

fn sentence_splitter() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(SENTENCE_BOUNDARY_PATTERN).unwrap()
}

/// Split `text` into trimmed sentences, dropping anything shorter than
/// [`MIN_SENTENCE_LEN`] characters (spec §4.3 step 1).
pub fn split_sentences(text: &str) -> Vec<String> {
    let re = sentence_splitter();
    re.find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| s.chars().count() >= MIN_SENTENCE_LEN)
        .collect()
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn contains_digit(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
}

fn tokenize(lower: &str) -> Vec<String> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Score a single sentence (spec §4.3 step 2). Exposed separately from
/// [`detect`] so the research scheduler's "verifiable keywords" decision
/// and tests can reason about one sentence at a time.
pub fn score_sentence(sentence: &str) -> (f64, Vec<DetectionReason>) {
    let lower = sentence.to_lowercase();
    let tokens = tokenize(&lower);
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if contains_digit(&lower) {
        score += 0.45;
        reasons.push(DetectionReason::ContainsNumber);
    }

    if tokens.iter().any(|t| COMPARATIVE_WORDS.contains(&t.as_str())) {
        score += 0.20;
        reasons.push(DetectionReason::ContainsComparative);
    }

    let hits = keyword_hits(&lower);
    if hits > 0 {
        score += (0.10 * hits as f64).min(0.35);
        reasons.push(DetectionReason::ContainsClaimKeyword);
    }

    if tokens.len() >= 8 {
        score += 0.10;
        reasons.push(DetectionReason::SufficientLength);
    }

    (score.clamp(0.0, 1.0), reasons)
}

/// Category assignment (spec §4.3 step 4): economic beats political
/// beats general.
pub fn classify_category(lower: &str) -> ClaimCategory {
    if matches_any(lower, ECONOMIC_WORDS) {
        ClaimCategory::Economic
    } else if matches_any(lower, POLITICAL_WORDS) {
        ClaimCategory::Political
    } else {
        ClaimCategory::General
    }
}

/// Tag assignment (spec §4.3 step 5). "Political with verifiable
/// keywords" is read as a political claim that also carries a
/// quantitative-scale keyword (percent, million, rate, ...) — the
/// subset of political claims an indicator/bill lookup could actually
/// verify (documented resolution of the spec's ambiguous wording; see
/// DESIGN.md).
pub fn classify_tag(
    lower: &str,
    category: ClaimCategory,
    reasons: &[DetectionReason],
) -> ClaimTypeTag {
    let has_number = reasons.contains(&DetectionReason::ContainsNumber);
    let political_verifiable =
        category == ClaimCategory::Political && matches_any(lower, QUANTITATIVE_WORDS);
    if has_number || political_verifiable {
        ClaimTypeTag::NumericFactual
    } else if reasons.contains(&DetectionReason::ContainsComparative) {
        ClaimTypeTag::SimplePolicy
    } else {
        ClaimTypeTag::Other
    }
}

/// Run the full pipeline over free text (spec §4.3). Sentences are
/// deduplicated within the call by lowercased text before scoring, so a
/// sentence repeated verbatim in the same chunk is scored once.
pub fn detect(text: &str, options: DetectOptions) -> Vec<Candidate> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for sentence in split_sentences(text) {
        let key = sentence.to_lowercase();
        if !seen.insert(key.clone()) {
            continue;
        }

        let (score, reasons) = score_sentence(&sentence);
        if score < options.threshold {
            continue;
        }

        let category = classify_category(&key);
        let tag = classify_tag(&key, category, &reasons);

        out.push(Candidate {
            text: sentence,
            score,
            reasons,
            category,
            tag,
            chunk_start_sec: options.chunk_start_sec,
        });
    }

    out
}

/// Normalize a claim text into a dedupe key: lowercased, non-alphanumerics
/// collapsed to single spaces, trimmed (spec §4.3 "Claim-dedupe").
pub fn normalize_key(text: &str) -> String {
    let collapsed: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    normalize_whitespace(&collapsed.to_lowercase())
}

const DEDUPE_CAPACITY: usize = 1_000;
const DEDUPE_TTL: Duration = Duration::from_secs(10 * 60);

/// Bounded, TTL'd "have we seen this claim before" cache shared across a
/// run (spec §4.3 "Claim-dedupe across a run"). Kept separate from
/// `detect` itself so that function stays pure and deterministic.
pub struct DedupeCache {
    entries: HashMap<String, Instant>,
    capacity: usize,
    ttl: Duration,
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self::new(DEDUPE_CAPACITY, DEDUPE_TTL)
    }
}

impl DedupeCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            ttl,
        }
    }

    /// `true` if `text` was not seen within the TTL (and thus should be
    /// treated as a fresh claim); always records the observation.
    pub fn accept(&mut self, text: &str) -> bool {
        let now = Instant::now();
        self.evict_expired(now);

        let key = normalize_key(text);
        if let Some(seen_at) = self.entries.get(&key) {
            if now.duration_since(*seen_at) < self.ttl {
                return false;
            }
        }

        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }
        self.entries.insert(key, now);
        true
    }

    fn evict_expired(&mut self, now: Instant) {
        self.entries
            .retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_input() {
        let text = "Inflation fell to 3.1 percent in 2024 from 6.5 percent in 2022.";
        let opts = DetectOptions {
            chunk_start_sec: 15.0,
            threshold: 0.62,
        };
        let a = detect(text, opts);
        let b = detect(text, opts);
        assert_eq!(a, b);
    }

    #[test]
    fn clean_economic_numeric_claim() {
        let text = "Inflation fell to 3.1 percent in 2024 from 6.5 percent in 2022.";
        let opts = DetectOptions {
            chunk_start_sec: 15.0,
            threshold: 0.62,
        };
        let candidates = detect(text, opts);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.category, ClaimCategory::Economic);
        assert_eq!(c.tag, ClaimTypeTag::NumericFactual);
        assert!(c.reasons.contains(&DetectionReason::ContainsNumber));
        assert!(c.score >= 0.62);
    }

    #[test]
    fn short_sentences_are_dropped() {
        let candidates = detect("Yes. No. Maybe so.", DetectOptions::default());
        assert!(candidates.is_empty());
    }

    #[test]
    fn below_threshold_sentences_are_discarded() {
        let candidates = detect(
            "The weather today is quite nice outside.",
            DetectOptions {
                chunk_start_sec: 0.0,
                threshold: 0.62,
            },
        );
        assert!(candidates.is_empty());
    }

    #[test]
    fn dedupe_rejects_repeat_within_ttl() {
        let mut cache = DedupeCache::default();
        assert!(cache.accept("Inflation rose 3 percent."));
        assert!(!cache.accept("inflation   ROSE 3 percent!!"));
    }

    #[test]
    fn dedupe_normalizes_punctuation_and_case() {
        assert_eq!(
            normalize_key("Inflation, rose 3% !!"),
            normalize_key("inflation rose 3  ")
        );
    }

    #[test]
    fn dedupe_evicts_oldest_past_capacity() {
        let mut cache = DedupeCache::new(2, Duration::from_secs(600));
        assert!(cache.accept("alpha claim text"));
        assert!(cache.accept("beta claim text"));
        assert!(cache.accept("gamma claim text"));
        // alpha was evicted to make room for gamma; it is accepted again.
        assert!(cache.accept("alpha claim text"));
    }
}
