//! Fixed keyword lexicons the scorer and categorizer consult. Kept as
//! flat `&str` slices rather than a trie or external dictionary crate —
//! the teacher's own `is_safe_command.rs`-style allow-lists favor plain
//! slices for small, hand-curated vocabularies.

pub const COMPARATIVE_WORDS: &[&str] = &[
    "more",
    "less",
    "higher",
    "lower",
    "up",
    "down",
    "increase",
    "increased",
    "decrease",
    "decreased",
    "than",
    "fewer",
];

pub const SUPERLATIVE_WORDS: &[&str] = &[
    "best",
    "worst",
    "first",
    "largest",
    "biggest",
    "smallest",
    "highest",
    "lowest",
    "most",
    "least",
];

pub const QUANTITATIVE_WORDS: &[&str] = &[
    "percent",
    "percentage",
    "million",
    "billion",
    "trillion",
    "thousand",
    "rate",
    "average",
    "number",
    "total",
];

pub const ECONOMIC_WORDS: &[&str] = &[
    "inflation",
    "unemployment",
    "gdp",
    "economy",
    "economic",
    "jobs",
    "wages",
    "deficit",
    "debt",
    "tax",
    "taxes",
    "prices",
    "cost of living",
    "interest rate",
    "recession",
];

pub const POLITICAL_WORDS: &[&str] = &[
    "congress",
    "senate",
    "president",
    "bill",
    "law",
    "legislation",
    "policy",
    "administration",
    "election",
    "vote",
    "party",
    "governor",
    "government",
];

/// Count of lexicon hits across every keyword family the claim-keyword
/// score bump draws from (spec §4.3 step 2, "contains_claim_keyword").
pub fn keyword_hits(lowercase_text: &str) -> usize {
    [
        SUPERLATIVE_WORDS,
        QUANTITATIVE_WORDS,
        ECONOMIC_WORDS,
        POLITICAL_WORDS,
    ]
    .iter()
    .flat_map(|list| list.iter())
    .filter(|word| lowercase_text.contains(*word))
    .count()
}

pub fn matches_any(lowercase_text: &str, words: &[&str]) -> bool {
    words.iter().any(|word| lowercase_text.contains(word))
}
