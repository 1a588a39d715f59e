//! Verifier client (spec §4.5): submits a claim plus structured
//! evidence to an external reasoning engine and parses a
//! constrained-schema verdict. Every failure mode except cancellation
//! degrades to a safe fallback rather than propagating an error — the
//! research scheduler treats this client as never throwing.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use veritas_protocol::ClaimCategory;
use veritas_protocol::CongressState;
use veritas_protocol::FredState;
use veritas_protocol::PipelineError;
use veritas_protocol::Verdict;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/responses";
const MAX_TEXT_LEN: usize = 484;
const EVIDENCE_BASIS_CONFIDENCE_CAP: f64 = 0.65;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceBasis {
    FactCheckMatch,
    FredData,
    CongressData,
    GeneralKnowledge,
    Mixed,
}

impl EvidenceBasis {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fact_check_match" => Some(Self::FactCheckMatch),
            "fred_data" => Some(Self::FredData),
            "congress_data" => Some(Self::CongressData),
            "general_knowledge" => Some(Self::GeneralKnowledge),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }
}

/// The evidence already gathered for a claim, handed to the verifier
/// so it can reason over structured findings rather than raw text
/// alone (spec §4.5 "claim + structured evidence").
#[derive(Debug, Clone)]
pub struct VerifierEvidenceInput {
    pub claim_text: String,
    pub claim_category: ClaimCategory,
    pub fact_check_verdict: Option<Verdict>,
    pub fact_check_summary: Option<String>,
    pub fred_state: FredState,
    pub fred_summary: Option<String>,
    pub congress_state: CongressState,
    pub congress_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifierOutcome {
    pub ai_verdict: Verdict,
    pub ai_confidence: f64,
    pub corrected_claim: Option<String>,
    pub ai_summary: Option<String>,
    pub evidence_basis: Option<EvidenceBasis>,
}

impl VerifierOutcome {
    /// The safe fallback returned for every non-cancellation failure
    /// (spec §4.5): `{unverified, 0, null, null, null}`.
    pub fn fallback() -> Self {
        Self {
            ai_verdict: Verdict::Unverified,
            ai_confidence: 0.0,
            corrected_claim: None,
            ai_summary: None,
            evidence_basis: None,
        }
    }
}

pub struct VerifierClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl VerifierClient {
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

    /// Submit `input` for verification (spec §4.5). Only cancellation
    /// propagates as `Err`; everything else resolves to
    /// [`VerifierOutcome::fallback`].
    pub async fn verify(
        &self,
        input: &VerifierEvidenceInput,
        cancel: &CancellationToken,
    ) -> Result<VerifierOutcome, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(VerifierOutcome::fallback());
        };
        if input.claim_text.trim().is_empty() {
            return Ok(VerifierOutcome::fallback());
        }

        let body = RequestBody::from_input(input);
        let send_fut = self
            .http
            .post(&self.base_url)
            .bearer_auth(api_key)
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = send_fut => result,
        };

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "verifier request failed");
                return Ok(VerifierOutcome::fallback());
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "verifier returned non-2xx");
            return Ok(VerifierOutcome::fallback());
        }

        let parse_fut = response.json::<ResponseBody>();
        let parsed = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = parse_fut => result,
        };

        let Ok(parsed) = parsed else {
            return Ok(VerifierOutcome::fallback());
        };

        let Some(output) = parsed.output else {
            return Ok(VerifierOutcome::fallback());
        };

        Ok(post_process(output, input))
    }
}

fn post_process(output: VerifierOutput, input: &VerifierEvidenceInput) -> VerifierOutcome {
    let mut confidence = output.ai_confidence.clamp(0.0, 1.0);

    let evidence_classified = input
        .fact_check_verdict
        .is_some_and(|v| v != Verdict::Unverified)
        || input.fred_state == FredState::Matched
        || input.congress_state == CongressState::Matched;
    if !evidence_classified {
        confidence = confidence.min(EVIDENCE_BASIS_CONFIDENCE_CAP);
    }

    VerifierOutcome {
        ai_verdict: output.ai_verdict,
        ai_confidence: confidence,
        corrected_claim: output.corrected_claim.map(|s| truncate(&s, MAX_TEXT_LEN)),
        ai_summary: output.ai_summary.map(|s| truncate(&s, MAX_TEXT_LEN)),
        evidence_basis: output
            .evidence_basis
            .as_deref()
            .and_then(EvidenceBasis::parse),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[derive(Debug, Serialize)]
struct RequestBody {
    claim_text: String,
    claim_category: &'static str,
    fact_check_verdict: Option<&'static str>,
    fact_check_summary: Option<String>,
    fred_state: &'static str,
    fred_summary: Option<String>,
    congress_state: &'static str,
    congress_summary: Option<String>,
}

impl RequestBody {
    fn from_input(input: &VerifierEvidenceInput) -> Self {
        Self {
            claim_text: input.claim_text.clone(),
            claim_category: match input.claim_category {
                ClaimCategory::Economic => "economic",
                ClaimCategory::Political => "political",
                ClaimCategory::General => "general",
            },
            fact_check_verdict: input.fact_check_verdict.map(|v| match v {
                Verdict::True => "true",
                Verdict::False => "false",
                Verdict::Misleading => "misleading",
                Verdict::Unverified => "unverified",
            }),
            fact_check_summary: input.fact_check_summary.clone(),
            fred_state: match input.fred_state {
                FredState::NotApplicable => "not_applicable",
                FredState::Ambiguous => "ambiguous",
                FredState::Matched => "matched",
                FredState::Error => "error",
            },
            fred_summary: input.fred_summary.clone(),
            congress_state: match input.congress_state {
                CongressState::NotApplicable => "not_applicable",
                CongressState::Ambiguous => "ambiguous",
                CongressState::Matched => "matched",
                CongressState::Error => "error",
            },
            congress_summary: input.congress_summary.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    output: Option<VerifierOutput>,
}

#[derive(Debug, Deserialize)]
struct VerifierOutput {
    #[serde(rename = "aiVerdict")]
    ai_verdict: Verdict,
    #[serde(rename = "aiConfidence")]
    ai_confidence: f64,
    #[serde(rename = "correctedClaim")]
    corrected_claim: Option<String>,
    #[serde(rename = "aiSummary")]
    ai_summary: Option<String>,
    #[serde(rename = "evidenceBasis")]
    evidence_basis: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> VerifierEvidenceInput {
        VerifierEvidenceInput {
            claim_text: "Inflation fell to 3.1 percent.".to_string(),
            claim_category: ClaimCategory::Economic,
            fact_check_verdict: None,
            fact_check_summary: None,
            fred_state: FredState::NotApplicable,
            fred_summary: None,
            congress_state: CongressState::NotApplicable,
            congress_summary: None,
        }
    }

    #[tokio::test]
    async fn missing_api_key_returns_fallback() {
        let client = VerifierClient::new(None);
        let out = client
            .verify(&sample_input(), &CancellationToken::new())
            .await
            .expect("no cancellation");
        assert_eq!(out, VerifierOutcome::fallback());
    }

    #[tokio::test]
    async fn empty_claim_returns_fallback() {
        let client = VerifierClient::new(Some("key".to_string()));
        let mut input = sample_input();
        input.claim_text = "   ".to_string();
        let out = client
            .verify(&input, &CancellationToken::new())
            .await
            .expect("no cancellation");
        assert_eq!(out, VerifierOutcome::fallback());
    }

    #[tokio::test]
    async fn pre_cancelled_token_is_rethrown() {
        let client = VerifierClient::new(Some("key".to_string()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.verify(&sample_input(), &cancel).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn post_process_caps_confidence_without_classified_evidence() {
        let output = VerifierOutput {
            ai_verdict: Verdict::True,
            ai_confidence: 0.95,
            corrected_claim: None,
            ai_summary: None,
            evidence_basis: Some("general_knowledge".to_string()),
        };
        let outcome = post_process(output, &sample_input());
        assert!(outcome.ai_confidence <= EVIDENCE_BASIS_CONFIDENCE_CAP);
    }

    #[test]
    fn post_process_allows_high_confidence_with_matched_fred() {
        let output = VerifierOutput {
            ai_verdict: Verdict::True,
            ai_confidence: 0.95,
            corrected_claim: None,
            ai_summary: None,
            evidence_basis: Some("fred_data".to_string()),
        };
        let mut input = sample_input();
        input.fred_state = FredState::Matched;
        let outcome = post_process(output, &input);
        assert_eq!(outcome.ai_confidence, 0.95);
    }

    #[test]
    fn truncate_respects_max_chars() {
        let long = "a".repeat(600);
        assert_eq!(truncate(&long, MAX_TEXT_LEN).chars().count(), MAX_TEXT_LEN);
    }
}
