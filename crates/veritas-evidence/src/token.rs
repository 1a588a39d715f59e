//! Shared tokenization and Jaccard similarity used by the fact-check
//! match-scoring step (spec §4.4).

use std::collections::HashSet;

/// Lowercase, replace non-alphanumerics with spaces, and keep tokens
/// longer than 2 characters (spec §4.4 "tokens lowercased,
/// non-alphanumerics to space, length > 2").
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

/// `|a ∩ b| / |a ∪ b|`, `0.0` when both sets are empty.
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_short_tokens_and_punctuation() {
        let toks = tokenize("Inflation, rose 3% in the US!");
        assert!(toks.contains("inflation"));
        assert!(toks.contains("rose"));
        assert!(!toks.contains("in"));
        assert!(!toks.contains("3"));
    }

    #[test]
    fn jaccard_identical_sets_is_one() {
        let a = tokenize("inflation rose sharply");
        let b = tokenize("inflation rose sharply");
        assert_eq!(jaccard_similarity(&a, &b), 1.0);
    }

    #[test]
    fn jaccard_disjoint_sets_is_zero() {
        let a = tokenize("inflation rose sharply");
        let b = tokenize("weather today sunny");
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
    }
}
