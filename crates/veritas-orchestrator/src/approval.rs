//! Approval/export orchestration (spec §4.9): the higher-level
//! operations a control-surface handler calls, each enforcing
//! `expectedVersion` and policy eligibility through [`StoreHandle`]
//! before talking to the package/render collaborators.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;
use uuid::Uuid;
use veritas_collab::ActivitySink;
use veritas_collab::PackageClient;
use veritas_collab::RenderClient;
use veritas_protocol::Claim;
use veritas_protocol::ClaimMutation;
use veritas_protocol::ClaimTypeTag;
use veritas_protocol::OutputPackageStatus;
use veritas_protocol::PipelineError;
use veritas_protocol::RenderStatus;

use crate::store_actor::RenderDecision;
use crate::store_actor::StoreHandle;

/// Bundles the claim store handle with the collaborators an approval
/// flow needs. Cheap to clone; safe to hand to a spawned follow-up task.
#[derive(Clone)]
pub struct ApprovalServices {
    run_id: String,
    store: StoreHandle,
    package_client: Arc<PackageClient>,
    render_client: Arc<RenderClient>,
    activity: ActivitySink,
}

impl ApprovalServices {
    pub fn new(
        run_id: String,
        store: StoreHandle,
        package_client: Arc<PackageClient>,
        render_client: Arc<RenderClient>,
        activity: ActivitySink,
    ) -> Self {
        Self { run_id, store, package_client, render_client, activity }
    }

    /// Approve a claim's current version, then chain into package
    /// generation and render-queue for the newly approved version (spec
    /// §4.9: "Approve emits `claim.output_approved`, then triggers the
    /// package collaborator and the render collaborator pinned to the
    /// new `approvedVersion`"). The chained work runs in the background
    /// so the caller gets the approval result immediately.
    pub async fn approve_output(&self, claim_id: &str, expected_version: u64) -> Result<Claim, PipelineError> {
        let claim = self.store.approve(claim_id, expected_version).await?;
        self.activity.record("claim.output_approved", json!({"claimId": claim_id, "version": claim.version})).await;

        let services = self.clone();
        let claim_id = claim_id.to_string();
        let approved_version = claim.version;
        tokio::spawn(async move {
            if let Err(err) = services.generate_package(&claim_id, approved_version).await {
                warn!(claim_id, error = %err, "post-approve package generation failed");
            }
            if let Err(err) = services.render_image(&claim_id, approved_version, false, None).await {
                warn!(claim_id, error = %err, "post-approve render failed");
            }
        });

        Ok(claim)
    }

    pub async fn reject_output(&self, claim_id: &str, expected_version: u64) -> Result<Claim, PipelineError> {
        let claim = self.store.reject(claim_id, expected_version).await?;
        self.activity.record("claim.output_rejected", json!({"claimId": claim_id})).await;
        Ok(claim)
    }

    pub async fn tag_override(
        &self,
        claim_id: &str,
        expected_version: u64,
        tag: ClaimTypeTag,
        reason: String,
    ) -> Result<Claim, PipelineError> {
        let claim = self.store.tag_override(claim_id, expected_version, tag, reason.clone()).await?;
        self.activity.record("claim.tag_override", json!({"claimId": claim_id, "tag": tag, "reason": reason})).await;
        Ok(claim)
    }

    /// (Re)generate the output package for an exportable claim. Unlike
    /// render, packaging has no reuse semantics — every call produces a
    /// fresh package (spec §6).
    pub async fn generate_package(&self, claim_id: &str, expected_version: u64) -> Result<Claim, PipelineError> {
        let claim = self.store.check_export(claim_id, expected_version).await?;
        let package_id = Uuid::new_v4().to_string();
        self.store
            .apply(ClaimMutation::OutputPackageQueued {
                run_id: self.run_id.clone(),
                claim_id: claim_id.to_string(),
                claim_version: claim.version,
                package_id: package_id.clone(),
            })
            .await?;

        let outcome = self.package_client.generate(&package_id, &claim, &self.run_id).await;
        self.activity
            .record(
                "package.outcome",
                json!({"claimId": claim_id, "packageId": package_id, "status": outcome.status, "error": outcome.error}),
            )
            .await;

        let mutation = if outcome.status == OutputPackageStatus::Ready {
            ClaimMutation::OutputPackageReady {
                run_id: self.run_id.clone(),
                claim_id: claim_id.to_string(),
                claim_version: claim.version,
                package_id: package_id.clone(),
            }
        } else {
            ClaimMutation::OutputPackageFailed {
                run_id: self.run_id.clone(),
                claim_id: claim_id.to_string(),
                claim_version: claim.version,
                package_id: package_id.clone(),
                error: outcome.error.unwrap_or_else(|| "package generation failed".to_string()),
            }
        };
        self.store.apply(mutation).await?;
        self.latest(claim_id).await
    }

    /// Queue (or reuse) a render job for an exportable claim (spec §6:
    /// non-forced requests with a prior non-failed job return that job).
    pub async fn render_image(
        &self,
        claim_id: &str,
        expected_version: u64,
        force: bool,
        force_nonce: Option<String>,
    ) -> Result<Claim, PipelineError> {
        let decision = self.store.decide_render(claim_id, expected_version, force).await?;
        let claim = match decision {
            RenderDecision::Reuse { .. } => return self.latest(claim_id).await,
            RenderDecision::Start { claim } => claim,
        };

        let nonce = force.then(|| force_nonce.unwrap_or_else(|| Uuid::new_v4().to_string()));
        let key = veritas_collab::idempotency_key(&claim.id, claim.version, nonce.as_deref());
        let render_job_id = Uuid::new_v4().to_string();
        self.store
            .apply(ClaimMutation::RenderQueued {
                run_id: self.run_id.clone(),
                claim_id: claim_id.to_string(),
                claim_version: claim.version,
                render_job_id: render_job_id.clone(),
            })
            .await?;

        let outcome = self.render_client.render(&claim, None, &key).await;
        self.activity
            .record(
                "render.outcome",
                json!({"claimId": claim_id, "renderJobId": render_job_id, "status": outcome.status, "attempts": outcome.attempts}),
            )
            .await;

        let mutation = if outcome.status == RenderStatus::Ready {
            ClaimMutation::RenderReady {
                run_id: self.run_id.clone(),
                claim_id: claim_id.to_string(),
                claim_version: claim.version,
                render_job_id: render_job_id.clone(),
                artifact_url: outcome.artifact_url.unwrap_or_default(),
            }
        } else {
            ClaimMutation::RenderFailed {
                run_id: self.run_id.clone(),
                claim_id: claim_id.to_string(),
                claim_version: claim.version,
                render_job_id: render_job_id.clone(),
                error: outcome.error.unwrap_or_else(|| "render failed".to_string()),
            }
        };
        self.store.apply(mutation).await?;
        self.latest(claim_id).await
    }

    async fn latest(&self, claim_id: &str) -> Result<Claim, PipelineError> {
        self.store.get(claim_id).await.ok_or_else(|| PipelineError::ClaimNotFound(claim_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_protocol::ClaimCategory;
    use veritas_protocol::ClaimMutation;
    use veritas_protocol::ClaimStatus;
    use veritas_protocol::OutputApprovalState;
    use veritas_protocol::ResearchUpdate;

    fn sample_claim(run_id: &str, index: u64) -> Claim {
        Claim::detected(
            Claim::make_id(run_id, index),
            run_id.to_string(),
            "Unemployment dropped to 4 percent last quarter.".to_string(),
            Vec::new(),
            10.0,
            "00:00:10".to_string(),
            ClaimCategory::Economic,
            ClaimTypeTag::NumericFactual,
            0.75,
        )
    }

    async fn services_with_researched_claim() -> (ApprovalServices, String) {
        let store = StoreHandle::spawn("run-1".to_string());
        let claim = sample_claim("run-1", 0);
        let claim_id = claim.id.clone();
        store.apply(ClaimMutation::Detected { claim }).await.unwrap();
        store
            .apply(ClaimMutation::Updated {
                run_id: "run-1".to_string(),
                claim_id: claim_id.clone(),
                fields: Box::new(ResearchUpdate { status: Some(ClaimStatus::Researched), confidence: Some(0.9), ..Default::default() }),
            })
            .await
            .unwrap();
        let services = ApprovalServices::new(
            "run-1".to_string(),
            store,
            Arc::new(PackageClient::new(None)),
            Arc::new(RenderClient::new(None, 1_000, 2)),
            ActivitySink::spawn(None),
        );
        (services, claim_id)
    }

    #[tokio::test]
    async fn approve_marks_claim_approved() {
        let (services, claim_id) = services_with_researched_claim().await;
        let claim = services.approve_output(&claim_id, 2).await.unwrap();
        assert_eq!(claim.output_approval_state, OutputApprovalState::Approved);
    }

    #[tokio::test]
    async fn generate_package_requires_approval_first() {
        let (services, claim_id) = services_with_researched_claim().await;
        let result = services.generate_package(&claim_id, 2).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn render_falls_back_to_local_placeholder_without_endpoint() {
        let (services, claim_id) = services_with_researched_claim().await;
        let approved = services.approve_output(&claim_id, 2).await.unwrap();
        let rendered = services.render_image(&claim_id, approved.version, false, None).await.unwrap();
        assert_eq!(rendered.render_status, RenderStatus::Ready);
        assert!(rendered.artifact_url.unwrap().starts_with("local://placeholder/"));
    }
}
