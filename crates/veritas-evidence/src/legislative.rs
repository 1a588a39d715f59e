//! Legislative-evidence client (spec §4.4 "Legislative-evidence
//! client"), modeled on the Congress.gov bill-status API — the natural
//! fit for a field named `congressEvidenceState`.

use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use veritas_protocol::CongressEvidence;
use veritas_protocol::CongressState;
use veritas_protocol::PipelineError;
use veritas_protocol::SourceRef;

const DEFAULT_BASE_URL: &str = "https://api.congress.gov/v3/bill";
const MAX_MATCHED_BILLS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct BillEntry {
    pub congress: u32,
    pub bill_type: &'static str,
    pub number: u32,
    pub title: &'static str,
    pub keywords: &'static [&'static str],
}

/// Small fixed catalogue of bills a claim might be referring to (spec
/// §4.4). A toy catalogue, as the spec's own scope keeps this a
/// "small catalogue" lookup rather than a full legislative search.
pub const BILL_CATALOGUE: &[BillEntry] = &[
    BillEntry {
        congress: 117,
        bill_type: "hr",
        number: 3684,
        title: "Infrastructure Investment and Jobs Act",
        keywords: &["infrastructure bill", "infrastructure act", "infrastructure investment"],
    },
    BillEntry {
        congress: 117,
        bill_type: "hr",
        number: 5376,
        title: "Inflation Reduction Act",
        keywords: &["inflation reduction act", "ira"],
    },
    BillEntry {
        congress: 118,
        bill_type: "hr",
        number: 2670,
        title: "National Defense Authorization Act",
        keywords: &["defense authorization", "ndaa"],
    },
    BillEntry {
        congress: 116,
        bill_type: "hr",
        number: 748,
        title: "CARES Act",
        keywords: &["cares act", "stimulus bill", "stimulus package"],
    },
];

/// `true` if any legislative keyword (political vocabulary broadly, per
/// spec §4.4 "any legislative keyword") appears in the claim text.
pub fn has_legislative_keyword(lower: &str) -> bool {
    const GENERIC_KEYWORDS: &[&str] = &[
        "bill", "law", "legislation", "congress", "senate", "house of representatives", "act",
    ];
    GENERIC_KEYWORDS.iter().any(|k| lower.contains(k)) || matches_catalogue(lower)
}

fn matches_catalogue(lower: &str) -> bool {
    BILL_CATALOGUE
        .iter()
        .any(|b| b.keywords.iter().any(|k| lower.contains(k)))
}

fn match_bills(lower: &str) -> Vec<&'static BillEntry> {
    BILL_CATALOGUE
        .iter()
        .filter(|b| b.keywords.iter().any(|k| lower.contains(k)))
        .take(MAX_MATCHED_BILLS)
        .collect()
}

pub struct LegislativeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LegislativeClient {
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

    /// Resolve `claim_text` to catalogued bills and fetch their latest
    /// action in parallel using settled (fulfilled-only) semantics
    /// (spec §4.4).
    pub async fn query(&self, claim_text: &str) -> CongressEvidence {
        let lower = claim_text.to_lowercase();

        if !has_legislative_keyword(&lower) {
            return CongressEvidence {
                state: CongressState::NotApplicable,
                summary: None,
                sources: Vec::new(),
            };
        }

        let matched = match_bills(&lower);
        if matched.is_empty() {
            return CongressEvidence {
                state: CongressState::Ambiguous,
                summary: None,
                sources: Vec::new(),
            };
        }

        let Some(api_key) = self.api_key.as_deref() else {
            return CongressEvidence {
                state: CongressState::Error,
                summary: Some("missing API key".to_string()),
                sources: Vec::new(),
            };
        };

        let fetches = matched.iter().map(|bill| self.fetch_status(api_key, bill));
        let settled: Vec<Result<BillStatus, PipelineError>> = join_all(fetches).await;
        let fulfilled: Vec<(BillEntry, BillStatus)> = matched
            .into_iter()
            .zip(settled)
            .filter_map(|(bill, result)| result.ok().map(|status| (*bill, status)))
            .collect();

        if fulfilled.is_empty() {
            return CongressEvidence {
                state: CongressState::Ambiguous,
                summary: None,
                sources: Vec::new(),
            };
        }

        let summary = fulfilled
            .iter()
            .map(|(bill, status)| format!("{}: {}", bill.title, status.latest_action))
            .collect::<Vec<_>>()
            .join(" | ");

        let sources = fulfilled
            .iter()
            .map(|(bill, _)| SourceRef {
                label: bill.title.to_string(),
                url: Some(format!(
                    "https://www.congress.gov/bill/{}th-congress/house-bill/{}",
                    bill.congress, bill.number
                )),
            })
            .collect();

        CongressEvidence {
            state: CongressState::Matched,
            summary: Some(summary),
            sources,
        }
    }

    async fn fetch_status(
        &self,
        api_key: &str,
        bill: &BillEntry,
    ) -> Result<BillStatus, PipelineError> {
        let url = format!(
            "{}/{}/{}/{}",
            self.base_url, bill.congress, bill.bill_type, bill.number
        );
        let response = self
            .http
            .get(&url)
            .query(&[("api_key", api_key), ("format", "json")])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| PipelineError::Collaborator(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::Collaborator(format!(
                "Congress.gov returned {}",
                response.status()
            )));
        }

        let parsed: BillResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Collaborator(e.to_string()))?;

        Ok(BillStatus {
            latest_action: parsed
                .bill
                .latest_action
                .map(|a| a.text)
                .unwrap_or_else(|| "status unavailable".to_string()),
        })
    }
}

struct BillStatus {
    latest_action: String,
}

#[derive(Debug, Deserialize)]
struct BillResponse {
    bill: BillDetail,
}

#[derive(Debug, Deserialize)]
struct BillDetail {
    #[serde(rename = "latestAction")]
    latest_action: Option<LatestAction>,
}

#[derive(Debug, Deserialize)]
struct LatestAction {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_keyword_is_recognized() {
        assert!(has_legislative_keyword("congress passed a new bill"));
    }

    #[test]
    fn irrelevant_text_has_no_legislative_keyword() {
        assert!(!has_legislative_keyword("the weather is sunny today"));
    }

    #[tokio::test]
    async fn no_keyword_is_not_applicable() {
        let client = LegislativeClient::new(Some("key".to_string()));
        let evidence = client.query("the sky is blue").await;
        assert_eq!(evidence.state, CongressState::NotApplicable);
    }

    #[tokio::test]
    async fn relevant_keyword_without_catalogue_match_is_ambiguous() {
        let client = LegislativeClient::new(Some("key".to_string()));
        let evidence = client.query("congress passed a brand new bill yesterday").await;
        assert_eq!(evidence.state, CongressState::Ambiguous);
    }

    #[tokio::test]
    async fn missing_api_key_with_catalogue_match_is_error() {
        let client = LegislativeClient::new(None);
        let evidence = client.query("the infrastructure bill passed congress").await;
        assert_eq!(evidence.state, CongressState::Error);
    }
}
