//! Render collaborator (spec §6 "Collaborator: render service"): turns
//! an approved claim + package into an on-air graphics artifact. The
//! rendering worker's internals (remote graphics service or local
//! fallback image synthesis) are explicitly out of scope (spec §1); we
//! implement only the idempotency, retry, and fallback contract.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;
use veritas_protocol::Claim;
use veritas_protocol::RenderStatus;

const TEMPLATE_ID: &str = "graphic-v1";

/// `claimId:claimVersion:templateId`, or `...:force:nonce` when forced
/// (spec §6 "Idempotency key is...").
pub fn idempotency_key(claim_id: &str, claim_version: u64, force_nonce: Option<&str>) -> String {
    match force_nonce {
        Some(nonce) => format!("{claim_id}:{claim_version}:{TEMPLATE_ID}:force:{nonce}"),
        None => format!("{claim_id}:{claim_version}:{TEMPLATE_ID}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub status: RenderStatus,
    pub attempts: u32,
    pub artifact_url: Option<String>,
    pub error: Option<String>,
}

pub struct RenderClient {
    http: reqwest::Client,
    endpoint: Option<String>,
    timeout: Duration,
    max_attempts: u32,
}

impl RenderClient {
    pub fn new(endpoint: Option<String>, timeout_ms: u64, max_attempts: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            timeout: Duration::from_millis(timeout_ms),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Render `claim`'s approved snapshot under `idempotency_key`,
    /// retrying with linear backoff up to `max_attempts` (spec §6
    /// "failed jobs are retried up to a configured attempt cap with
    /// linear backoff"). A missing endpoint deterministically falls
    /// back to a local placeholder artifact.
    pub async fn render(
        &self,
        claim: &Claim,
        package_payload: Option<&serde_json::Value>,
        idempotency_key: &str,
    ) -> RenderOutcome {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Self::local_placeholder(claim, idempotency_key);
        };

        let body = RequestBody {
            idempotency_key: idempotency_key.to_string(),
            claim_id: claim.id.clone(),
            claim_version: claim.version,
            claim_text: claim.text.clone(),
            verdict: claim.verdict,
            package_payload: package_payload.cloned(),
        };

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
            }
            let response = self.http.post(endpoint).timeout(self.timeout).json(&body).send().await;
            let response = match response {
                Ok(r) => r,
                Err(err) => {
                    warn!(error = %err, attempt, "render request failed");
                    last_error = err.to_string();
                    continue;
                }
            };
            if !response.status().is_success() {
                let status = response.status();
                warn!(%status, attempt, "render service returned non-2xx");
                last_error = format!("render service returned {status}");
                continue;
            }
            match response.json::<ResponseBody>().await {
                Ok(parsed) => {
                    return RenderOutcome {
                        status: parsed.status,
                        attempts: attempt,
                        artifact_url: parsed.artifact_url,
                        error: parsed.error,
                    };
                }
                Err(err) => {
                    last_error = format!("malformed render response: {err}");
                    continue;
                }
            }
        }

        RenderOutcome { status: RenderStatus::Failed, attempts: self.max_attempts, artifact_url: None, error: Some(last_error) }
    }

    fn local_placeholder(claim: &Claim, idempotency_key: &str) -> RenderOutcome {
        RenderOutcome {
            status: RenderStatus::Ready,
            attempts: 1,
            artifact_url: Some(format!("local://placeholder/{}-v{}.png", claim.id, claim.version)),
            error: None,
        }
        .tap_log(idempotency_key)
    }
}

impl RenderOutcome {
    fn tap_log(self, idempotency_key: &str) -> Self {
        tracing::debug!(idempotency_key, "render falling back to local placeholder");
        self
    }
}

#[derive(Debug, Serialize)]
struct RequestBody {
    idempotency_key: String,
    claim_id: String,
    claim_version: u64,
    claim_text: String,
    verdict: veritas_protocol::Verdict,
    package_payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    status: RenderStatus,
    #[serde(rename = "artifactUrl")]
    artifact_url: Option<String>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_protocol::ClaimCategory;
    use veritas_protocol::ClaimTypeTag;

    fn claim() -> Claim {
        Claim::detected(
            Claim::make_id("run-1", 0),
            "run-1".to_string(),
            "Inflation fell to 3.1 percent.".to_string(),
            Vec::new(),
            15.0,
            "00:00:15".to_string(),
            ClaimCategory::Economic,
            ClaimTypeTag::NumericFactual,
            0.7,
        )
    }

    #[test]
    fn idempotency_key_matches_documented_format() {
        assert_eq!(idempotency_key("run-1-000000", 3, None), "run-1-000000:3:graphic-v1");
        assert_eq!(
            idempotency_key("run-1-000000", 3, Some("abc")),
            "run-1-000000:3:graphic-v1:force:abc"
        );
    }

    #[tokio::test]
    async fn missing_endpoint_produces_local_placeholder() {
        let client = RenderClient::new(None, 1_000, 3);
        let key = idempotency_key(&claim().id, 1, None);
        let outcome = client.render(&claim(), None, &key).await;
        assert_eq!(outcome.status, RenderStatus::Ready);
        assert!(outcome.artifact_url.unwrap().starts_with("local://placeholder/"));
    }

    #[tokio::test]
    async fn exhausted_retries_return_failed() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = RenderClient::new(Some(server.uri()), 1_000, 2);
        let key = idempotency_key(&claim().id, 1, None);
        let outcome = client.render(&claim(), None, &key).await;
        assert_eq!(outcome.status, RenderStatus::Failed);
        assert_eq!(outcome.attempts, 2);
    }
}
