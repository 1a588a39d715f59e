//! Fact-check search client (spec §4.4 "Fact-check client"), modeled on
//! the Google Fact Check Tools `claims:search` API — the natural fit
//! for a field named `googleEvidenceState` in the data model.

use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;
use veritas_protocol::GoogleEvidence;
use veritas_protocol::GoogleState;
use veritas_protocol::PipelineError;
use veritas_protocol::ReviewSource;
use veritas_protocol::SourceRef;
use veritas_protocol::Verdict;

use crate::token::jaccard_similarity;
use crate::token::tokenize;

const DEFAULT_BASE_URL: &str = "https://factchecktools.googleapis.com/v1alpha1/claims:search";
const LANGUAGE_CODES: &[Option<&str>] = &[Some("en-US"), Some("en"), None];
const MAX_AGE_YEARS: f64 = 4.0;
const RECENCY_DISCOUNT_START_YEARS: f64 = 2.0;
const RECENCY_MIN_MULTIPLIER: f64 = 0.5;
const RECENCY_SLOPE: f64 = 0.15;
const ERROR_BODY_TRUNCATE: usize = 160;

/// The outcome `status` field spec §4.4 describes alongside the evidence
/// triple, separate from `GoogleState` because the data model only
/// distinguishes `{none, matched, error}` while the research scheduler
/// needs the finer `researched | no_match | needs_manual_research |
/// error` distinction to seed the claim's overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactCheckStatus {
    Researched,
    NoMatch,
    NeedsManualResearch,
    Error,
}

#[derive(Debug, Clone)]
pub struct FactCheckOutcome {
    pub status: FactCheckStatus,
    pub evidence: GoogleEvidence,
    pub verdict: Option<Verdict>,
    pub confidence: f64,
    /// The richer per-source shape (`publisher`/`title`/`textualRating`/
    /// `reviewDate`) the claim's top-level `sources` field wants, kept
    /// alongside `evidence.sources` (the lighter `SourceRef` shape every
    /// provider shares).
    pub review_sources: Vec<ReviewSource>,
}

#[derive(Debug, Clone)]
struct Candidate {
    url: Option<String>,
    publisher: Option<String>,
    claim_reviewed: Option<String>,
    title: Option<String>,
    textual_rating: Option<String>,
    verdict: Verdict,
    confidence: f64,
    review_date: Option<DateTime<Utc>>,
}

pub struct FactCheckClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl FactCheckClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: Option<String>, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    /// Query the fact-check search service for `claim_text` (spec §4.4).
    pub async fn query(
        &self,
        claim_text: &str,
        cancel: &CancellationToken,
    ) -> Result<FactCheckOutcome, PipelineError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(self.error_outcome("missing API key"));
        };

        let variants = build_query_variants(claim_text);
        let mut raw_reviews = Vec::new();

        'outer: for variant in &variants {
            for language in LANGUAGE_CODES {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                match self.fetch_page(api_key, variant, *language).await {
                    Ok(mut reviews) => raw_reviews.append(&mut reviews),
                    Err(err) => {
                        if matches!(err, PipelineError::Cancelled) {
                            return Err(err);
                        }
                        warn!(error = %err, "fact-check query failed");
                        return Ok(self.error_outcome(&err.to_string()));
                    }
                }
                if raw_reviews.len() > 200 {
                    // A defensively bounded amount of raw results is enough
                    // to rank from; stop issuing further queries.
                    break 'outer;
                }
            }
        }

        Ok(self.rank(claim_text, raw_reviews))
    }

    fn error_outcome(&self, message: &str) -> FactCheckOutcome {
        let truncated: String = message.chars().take(ERROR_BODY_TRUNCATE).collect();
        FactCheckOutcome {
            status: FactCheckStatus::Error,
            evidence: GoogleEvidence {
                state: GoogleState::Error,
                summary: Some(truncated),
                sources: Vec::new(),
            },
            verdict: None,
            confidence: 0.0,
            review_sources: Vec::new(),
        }
    }

    async fn fetch_page(
        &self,
        api_key: &str,
        query: &str,
        language_code: Option<&str>,
    ) -> Result<Vec<RawReview>, PipelineError> {
        let mut request = self
            .http
            .get(&self.base_url)
            .query(&[("key", api_key), ("query", query)])
            .timeout(Duration::from_secs(10));
        if let Some(lang) = language_code {
            request = request.query(&[("languageCode", lang)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Collaborator(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(ERROR_BODY_TRUNCATE).collect();
            return Err(PipelineError::Collaborator(format!(
                "fact-check service returned {status}: {snippet}"
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Collaborator(e.to_string()))?;
        debug!(count = parsed.claims.len(), "fact-check page fetched");
        Ok(parsed
            .claims
            .into_iter()
            .flat_map(|c| {
                let claim_text = c.text.clone();
                c.claim_review
                    .into_iter()
                    .map(move |r| RawReview {
                        claim_reviewed: claim_text.clone(),
                        publisher: r.publisher.and_then(|p| p.name),
                        url: r.url,
                        title: r.title,
                        textual_rating: r.textual_rating,
                        review_date: r
                            .review_date
                            .as_deref()
                            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                            .map(|d| d.with_timezone(&Utc)),
                    })
            })
            .collect())
    }

    fn rank(&self, claim_text: &str, raw_reviews: Vec<RawReview>) -> FactCheckOutcome {
        let now = Utc::now();
        let claim_tokens = tokenize(claim_text);

        let mut candidates: Vec<Candidate> = Vec::new();
        for review in raw_reviews {
            if let Some(date) = review.review_date {
                let age_years = (now - date).num_days() as f64 / 365.25;
                if age_years > MAX_AGE_YEARS {
                    continue;
                }
            }
            let recency = recency_multiplier(review.review_date, now);
            let verdict = normalize_rating(review.textual_rating.as_deref());
            let verdict_weight = if verdict != Verdict::Unverified { 0.80 } else { 0.35 };

            let mut reference_text = claim_text.to_string();
            if let Some(title) = &review.title {
                reference_text.push(' ');
                reference_text.push_str(title);
            }
            if let Some(rating) = &review.textual_rating {
                reference_text.push(' ');
                reference_text.push_str(rating);
            }
            let reference_tokens = tokenize(&reference_text);
            let match_score = jaccard_similarity(&claim_tokens, &reference_tokens);

            let confidence = ((0.25 + 0.45 * match_score + 0.30 * verdict_weight) * recency).min(0.98);

            candidates.push(Candidate {
                url: review.url,
                publisher: review.publisher,
                claim_reviewed: Some(review.claim_reviewed),
                title: review.title,
                textual_rating: review.textual_rating,
                verdict,
                confidence,
                review_date: review.review_date,
            });
        }

        let deduped = dedupe(candidates);
        let (classified, unverified): (Vec<_>, Vec<_>) =
            deduped.into_iter().partition(|c| c.verdict != Verdict::Unverified);
        let mut ranked = classified;
        ranked.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        let mut rest = unverified;
        rest.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        ranked.append(&mut rest);

        if ranked.is_empty() {
            return FactCheckOutcome {
                status: FactCheckStatus::NoMatch,
                evidence: GoogleEvidence {
                    state: GoogleState::None,
                    summary: None,
                    sources: Vec::new(),
                },
                verdict: None,
                confidence: 0.0,
                review_sources: Vec::new(),
            };
        }

        let top = &ranked[0];
        let status = if top.verdict != Verdict::Unverified {
            FactCheckStatus::Researched
        } else {
            FactCheckStatus::NeedsManualResearch
        };

        let sources: Vec<ReviewSource> = ranked
            .iter()
            .take(3)
            .map(|c| ReviewSource {
                publisher: c.publisher.clone(),
                title: c.title.clone(),
                url: c.url.clone(),
                textual_rating: c.textual_rating.clone(),
                review_date: c.review_date,
            })
            .collect();

        let summary = ranked
            .first()
            .and_then(|c| c.title.clone())
            .or_else(|| ranked.first().and_then(|c| c.claim_reviewed.clone()));

        FactCheckOutcome {
            status,
            evidence: GoogleEvidence {
                state: GoogleState::Matched,
                summary,
                sources: sources
                    .iter()
                    .map(|s| SourceRef {
                        label: s
                            .publisher
                            .clone()
                            .unwrap_or_else(|| "fact-check source".to_string()),
                        url: s.url.clone(),
                    })
                    .collect(),
            },
            verdict: Some(top.verdict),
            confidence: round2(top.confidence),
            review_sources: sources,
        }
    }
}

fn recency_multiplier(review_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(date) = review_date else {
        return 1.0;
    };
    let age_years = (now - date).num_days() as f64 / 365.25;
    if age_years <= RECENCY_DISCOUNT_START_YEARS {
        1.0
    } else {
        (1.0 - (age_years - RECENCY_DISCOUNT_START_YEARS) * RECENCY_SLOPE).max(RECENCY_MIN_MULTIPLIER)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Precedence resolution for the spec's overlapping vocabulary (false
/// bucket, then misleading, then true, else unverified) — checked in
/// this order so e.g. "Mostly True" lands in the misleading bucket
/// (consistent with the PolitiFact-style middle ratings the misleading
/// bucket's "mostly/partly false/true" shorthand expands to) rather
/// than the true bucket's plain "true" substring. See DESIGN.md.
fn normalize_rating(raw: Option<&str>) -> Verdict {
    let Some(raw) = raw else {
        return Verdict::Unverified;
    };
    let lower = raw.to_lowercase();

    const FALSE_WORDS: &[&str] = &[
        "pants-on-fire",
        "pants on fire",
        "debunked",
        "no evidence",
        "fake",
        "hoax",
        "fabricated",
    ];
    const MISLEADING_WORDS: &[&str] = &[
        "misleading",
        "mostly false",
        "partly false",
        "mostly true",
        "partly true",
        "half true",
        "mixed",
        "missing context",
        "out of context",
    ];
    const TRUE_WORDS: &[&str] = &["true", "correct", "accurate", "authentic"];

    if FALSE_WORDS.iter().any(|w| lower.contains(w)) {
        Verdict::False
    } else if MISLEADING_WORDS.iter().any(|w| lower.contains(w)) {
        Verdict::Misleading
    } else if TRUE_WORDS.iter().any(|w| lower.contains(w)) {
        Verdict::True
    } else {
        Verdict::Unverified
    }
}

fn dedupe_key(c: &Candidate) -> (Option<String>, Option<String>, Option<String>, Option<String>) {
    (
        c.url.clone(),
        c.publisher.clone(),
        c.claim_reviewed.clone(),
        c.textual_rating.clone(),
    )
}

/// Dedupe by `(url, publisher, claimReviewed, textualRating)`, keeping
/// the highest-confidence candidate per key (spec §4.4).
fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut best: std::collections::HashMap<
        (Option<String>, Option<String>, Option<String>, Option<String>),
        Candidate,
    > = std::collections::HashMap::new();
    for c in candidates {
        let key = dedupe_key(&c);
        match best.get(&key) {
            Some(existing) if existing.confidence >= c.confidence => {}
            _ => {
                best.insert(key, c);
            }
        }
    }
    best.into_values().collect()
}

/// Build up to three query variants: full text, first 18 tokens, and a
/// digit/long-token focus (spec §4.4).
fn build_query_variants(claim_text: &str) -> Vec<String> {
    let mut variants = vec![claim_text.to_string()];

    let tokens: Vec<&str> = claim_text.split_whitespace().collect();
    let first_18: Vec<&str> = tokens.iter().take(18).copied().collect();
    let truncated = first_18.join(" ");
    if !truncated.is_empty() && truncated != claim_text {
        variants.push(truncated);
    }

    let focus: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()) || t.chars().count() > 7)
        .collect();
    if !focus.is_empty() {
        let focus_text = focus.join(" ");
        if !variants.contains(&focus_text) {
            variants.push(focus_text);
        }
    }

    variants.truncate(3);
    variants
}

#[derive(Debug, Clone)]
struct RawReview {
    claim_reviewed: String,
    publisher: Option<String>,
    url: Option<String>,
    title: Option<String>,
    textual_rating: Option<String>,
    review_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    claims: Vec<ApiClaim>,
}

#[derive(Debug, Deserialize)]
struct ApiClaim {
    #[serde(default)]
    text: String,
    #[serde(default, rename = "claimReview")]
    claim_review: Vec<ApiClaimReview>,
}

#[derive(Debug, Deserialize)]
struct ApiClaimReview {
    publisher: Option<ApiPublisher>,
    url: Option<String>,
    title: Option<String>,
    #[serde(rename = "textualRating")]
    textual_rating: Option<String>,
    #[serde(rename = "reviewDate")]
    review_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPublisher {
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn normalize_rating_covers_documented_vocabulary() {
        assert_eq!(normalize_rating(Some("Pants on Fire")), Verdict::False);
        assert_eq!(normalize_rating(Some("Debunked")), Verdict::False);
        assert_eq!(normalize_rating(Some("Mostly True")), Verdict::Misleading);
        assert_eq!(normalize_rating(Some("Half True")), Verdict::Misleading);
        assert_eq!(normalize_rating(Some("True")), Verdict::True);
        assert_eq!(normalize_rating(Some("Accurate")), Verdict::True);
        assert_eq!(normalize_rating(Some("Satire")), Verdict::Unverified);
        assert_eq!(normalize_rating(None), Verdict::Unverified);
    }

    #[test]
    fn recency_multiplier_is_full_within_two_years() {
        let now = Utc::now();
        assert_eq!(recency_multiplier(Some(now), now), 1.0);
        assert_eq!(recency_multiplier(Some(now - ChronoDuration::days(365)), now), 1.0);
    }

    #[test]
    fn recency_multiplier_decays_and_floors_at_half() {
        let now = Utc::now();
        let three_years = now - ChronoDuration::days(365 * 3);
        let m = recency_multiplier(Some(three_years), now);
        assert!(m < 1.0);
        assert!(m >= 0.5);

        let ten_years = now - ChronoDuration::days(365 * 10);
        assert_eq!(recency_multiplier(Some(ten_years), now), 0.5);
    }

    #[test]
    fn query_variants_include_full_text_and_are_capped_at_three() {
        let text = "A ".repeat(30) + "with 42 percent growth";
        let variants = build_query_variants(&text);
        assert!(variants.len() <= 3);
        assert_eq!(variants[0], text);
    }

    #[test]
    fn dedupe_keeps_highest_confidence_per_key() {
        let low = Candidate {
            url: Some("https://example.com/a".into()),
            publisher: Some("Example".into()),
            claim_reviewed: Some("claim".into()),
            title: None,
            textual_rating: Some("False".into()),
            verdict: Verdict::False,
            confidence: 0.4,
            review_date: None,
        };
        let high = Candidate {
            confidence: 0.9,
            ..low.clone()
        };
        let out = dedupe(vec![low, high]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.9);
    }
}
