//! Economic-indicator client (spec §4.4 "Economic-indicator client"),
//! modeled on the FRED (Federal Reserve Economic Data) observations API
//! — the natural fit for a field named `fredEvidenceState`.

use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use tracing::warn;
use veritas_protocol::FredEvidence;
use veritas_protocol::FredState;
use veritas_protocol::PipelineError;
use veritas_protocol::SourceRef;

const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org/fred/series/observations";
const SENTINEL_MISSING_VALUE: &str = ".";
const MAX_MATCHED_SERIES: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct IndicatorSeries {
    pub id: &'static str,
    pub title: &'static str,
    pub keywords: &'static [&'static str],
}

/// Fixed catalogue of economic series the claim text is scanned against
/// (spec §4.4: unemployment, CPI, GDP, hourly earnings, debt, deficit,
/// fed funds).
pub const INDICATOR_CATALOGUE: &[IndicatorSeries] = &[
    IndicatorSeries {
        id: "UNRATE",
        title: "Unemployment rate",
        keywords: &["unemployment", "jobless rate", "jobless claims"],
    },
    IndicatorSeries {
        id: "CPIAUCSL",
        title: "Consumer price index",
        keywords: &["inflation", "cpi", "consumer price"],
    },
    IndicatorSeries {
        id: "GDP",
        title: "Gross domestic product",
        keywords: &["gdp", "gross domestic product", "economic growth"],
    },
    IndicatorSeries {
        id: "CES0500000003",
        title: "Average hourly earnings",
        keywords: &["hourly earnings", "wage growth", "wages"],
    },
    IndicatorSeries {
        id: "GFDEBTN",
        title: "Federal debt",
        keywords: &["national debt", "federal debt", "government debt"],
    },
    IndicatorSeries {
        id: "FYFSD",
        title: "Federal budget deficit",
        keywords: &["deficit", "budget shortfall"],
    },
    IndicatorSeries {
        id: "FEDFUNDS",
        title: "Federal funds rate",
        keywords: &["fed funds", "federal funds rate", "interest rate", "interest rates"],
    },
];

/// Find up to [`MAX_MATCHED_SERIES`] series whose keywords appear in
/// `lower` (stable catalogue order, deduplicated by id).
fn match_series(lower: &str) -> Vec<&'static IndicatorSeries> {
    INDICATOR_CATALOGUE
        .iter()
        .filter(|series| series.keywords.iter().any(|k| lower.contains(k)))
        .take(MAX_MATCHED_SERIES)
        .collect()
}

pub struct EconomicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EconomicClient {
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

    /// Resolve `claim_text` to the matching indicator series and fetch
    /// their latest observations in parallel (spec §4.4).
    pub async fn query(&self, claim_text: &str) -> FredEvidence {
        let lower = claim_text.to_lowercase();
        let matched = match_series(&lower);

        if matched.is_empty() {
            return FredEvidence {
                state: FredState::NotApplicable,
                summary: None,
                sources: Vec::new(),
            };
        }

        let Some(api_key) = self.api_key.as_deref() else {
            return FredEvidence {
                state: FredState::Error,
                summary: Some("missing API key".to_string()),
                sources: Vec::new(),
            };
        };

        let fetches = matched
            .iter()
            .map(|series| self.fetch_latest(api_key, series));
        let results = join_all(fetches).await;

        let observations: Vec<(IndicatorSeries, Observation)> = matched
            .into_iter()
            .zip(results)
            .filter_map(|(series, result)| match result {
                Ok(Some(obs)) => Some((*series, obs)),
                Ok(None) => None,
                Err(err) => {
                    warn!(series = series.id, error = %err, "economic series fetch failed");
                    None
                }
            })
            .collect();

        if observations.is_empty() {
            return FredEvidence {
                state: FredState::Ambiguous,
                summary: None,
                sources: Vec::new(),
            };
        }

        let summary = observations
            .iter()
            .map(|(series, obs)| format!("{}: {} ({})", series.title, obs.value, obs.date))
            .collect::<Vec<_>>()
            .join(" | ");

        let sources = observations
            .iter()
            .map(|(series, _)| SourceRef {
                label: series.title.to_string(),
                url: Some(format!(
                    "https://fred.stlouisfed.org/series/{}",
                    series.id
                )),
            })
            .collect();

        FredEvidence {
            state: FredState::Matched,
            summary: Some(summary),
            sources,
        }
    }

    async fn fetch_latest(
        &self,
        api_key: &str,
        series: &IndicatorSeries,
    ) -> Result<Option<Observation>, PipelineError> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("series_id", series.id),
                ("api_key", api_key),
                ("file_type", "json"),
                ("sort_order", "desc"),
                ("limit", "1"),
            ])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| PipelineError::Collaborator(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::Collaborator(format!(
                "FRED returned {}",
                response.status()
            )));
        }

        let parsed: ObservationsResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Collaborator(e.to_string()))?;

        Ok(parsed
            .observations
            .into_iter()
            .find(|o| o.value != SENTINEL_MISSING_VALUE))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Observation {
    date: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<Observation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_up_to_three_series_stably() {
        let lower = "unemployment and inflation and gdp and wages all changed";
        let matched = match_series(lower);
        assert_eq!(matched.len(), 3);
        assert_eq!(matched[0].id, "UNRATE");
        assert_eq!(matched[1].id, "CPIAUCSL");
        assert_eq!(matched[2].id, "GDP");
    }

    #[test]
    fn no_keyword_match_is_empty() {
        assert!(match_series("the weather today is lovely").is_empty());
    }

    #[tokio::test]
    async fn missing_keyword_returns_not_applicable() {
        let client = EconomicClient::new(Some("key".to_string()));
        let evidence = client.query("the sky is blue today").await;
        assert_eq!(evidence.state, FredState::NotApplicable);
    }

    #[tokio::test]
    async fn missing_api_key_returns_error_when_relevant() {
        let client = EconomicClient::new(None);
        let evidence = client.query("unemployment rose sharply").await;
        assert_eq!(evidence.state, FredState::Error);
    }
}
