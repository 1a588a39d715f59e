//! Output-package collaborator (spec §6 "Collaborator: package
//! service"): assembling the actual graphics payload is out of scope
//! (spec §1 Non-goals), but the trigger contract — call with an
//! approved claim snapshot, get back a package record — is ours to
//! implement.

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use veritas_protocol::Claim;
use veritas_protocol::OutputPackageStatus;

const LOCAL_TEMPLATE_VERSION: &str = "local-v1";

#[derive(Debug, Clone, PartialEq)]
pub struct PackageOutcome {
    pub status: OutputPackageStatus,
    pub template_version: String,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
}

pub struct PackageClient {
    http: reqwest::Client,
    endpoint: Option<String>,
}

impl PackageClient {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), endpoint }
    }

    /// Generate (or regenerate) the output package for `claim`, pinned
    /// to the claim's current (approved) version.
    pub async fn generate(&self, package_id: &str, claim: &Claim, run_id: &str) -> PackageOutcome {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Self::local_placeholder(package_id, claim, run_id);
        };

        let body = RequestBody {
            package_id: package_id.to_string(),
            claim_id: claim.id.clone(),
            run_id: run_id.to_string(),
            claim_version: claim.version,
            claim_text: claim.text.clone(),
            verdict: claim.verdict,
            confidence: claim.confidence,
            summary: claim.summary.clone(),
        };

        let response = self.http.post(endpoint).json(&body).send().await;
        let response = match response {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "package service request failed");
                return PackageOutcome {
                    status: OutputPackageStatus::Failed,
                    template_version: LOCAL_TEMPLATE_VERSION.to_string(),
                    payload: None,
                    error: Some(err.to_string()),
                };
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!(%status, "package service returned non-2xx");
            return PackageOutcome {
                status: OutputPackageStatus::Failed,
                template_version: LOCAL_TEMPLATE_VERSION.to_string(),
                payload: None,
                error: Some(format!("package service returned {status}")),
            };
        }

        match response.json::<ResponseBody>().await {
            Ok(parsed) => PackageOutcome {
                status: parsed.status,
                template_version: parsed.template_version,
                payload: parsed.payload,
                error: parsed.error,
            },
            Err(err) => PackageOutcome {
                status: OutputPackageStatus::Failed,
                template_version: LOCAL_TEMPLATE_VERSION.to_string(),
                payload: None,
                error: Some(format!("malformed package response: {err}")),
            },
        }
    }

    /// Deterministic fallback used whenever no package endpoint is
    /// configured, mirroring the render collaborator's local-placeholder
    /// behavior (spec §6 "a missing remote endpoint deterministically
    /// falls back").
    fn local_placeholder(package_id: &str, claim: &Claim, run_id: &str) -> PackageOutcome {
        PackageOutcome {
            status: OutputPackageStatus::Ready,
            template_version: LOCAL_TEMPLATE_VERSION.to_string(),
            payload: Some(json!({
                "packageId": package_id,
                "claimId": claim.id,
                "runId": run_id,
                "claimVersion": claim.version,
                "claimText": claim.text,
                "verdict": claim.verdict,
                "confidence": claim.confidence,
                "summary": claim.summary,
            })),
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestBody {
    package_id: String,
    claim_id: String,
    run_id: String,
    claim_version: u64,
    claim_text: String,
    verdict: veritas_protocol::Verdict,
    confidence: f64,
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    status: OutputPackageStatus,
    #[serde(rename = "templateVersion")]
    template_version: String,
    payload: Option<serde_json::Value>,
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

    #[tokio::test]
    async fn missing_endpoint_synthesizes_local_package() {
        let client = PackageClient::new(None);
        let outcome = client.generate("pkg-1", &claim(), "run-1").await;
        assert_eq!(outcome.status, OutputPackageStatus::Ready);
        assert_eq!(outcome.template_version, LOCAL_TEMPLATE_VERSION);
        assert!(outcome.payload.is_some());
    }

    #[tokio::test]
    async fn non_2xx_response_becomes_failed() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = PackageClient::new(Some(server.uri()));
        let outcome = client.generate("pkg-1", &claim(), "run-1").await;
        assert_eq!(outcome.status, OutputPackageStatus::Failed);
    }
}
