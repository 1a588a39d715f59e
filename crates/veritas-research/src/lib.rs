//! Research scheduler (spec §4.6): a bounded-concurrency queue that
//! runs each claim's research linearly (fact-check, then the
//! category-appropriate provider, then the verifier) while allowing
//! different claims to interleave freely.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use veritas_evidence::EconomicClient;
use veritas_evidence::FactCheckClient;
use veritas_evidence::FactCheckStatus;
use veritas_evidence::LegislativeClient;
use veritas_protocol::ClaimCategory;
use veritas_protocol::ClaimMutation;
use veritas_protocol::ClaimStatus;
use veritas_protocol::CongressEvidence;
use veritas_protocol::CongressState;
use veritas_protocol::FredEvidence;
use veritas_protocol::FredState;
use veritas_protocol::GoogleEvidence;
use veritas_protocol::GoogleState;
use veritas_protocol::ResearchUpdate;
use veritas_protocol::Verdict;
use veritas_verifier::EvidenceBasis;
use veritas_verifier::VerifierClient;
use veritas_verifier::VerifierEvidenceInput;
use veritas_verifier::VerifierOutcome;

/// Clamp applied to the configured `maxResearchConcurrency` (spec §4.6).
pub const CONCURRENCY_RANGE: std::ops::RangeInclusive<usize> = 1..=10;

/// A work item placed on the scheduler's queue: enough of the claim's
/// identity and content to run research independent of the store.
#[derive(Debug, Clone)]
pub struct ResearchJob {
    pub run_id: String,
    pub claim_id: String,
    pub claim_text: String,
    pub claim_category: ClaimCategory,
}

/// The provider clients a scheduler worker calls through, bundled so
/// `ResearchScheduler::spawn` takes one cheaply cloneable handle.
pub struct ResearchClients {
    pub fact_check: FactCheckClient,
    pub economic: EconomicClient,
    pub legislative: LegislativeClient,
    pub verifier: VerifierClient,
}

/// A running pool of research workers draining a shared queue. Dropping
/// every clone of the returned sender (outside this struct) lets the
/// workers drain and exit; cancellation makes them exit immediately.
pub struct ResearchScheduler {
    jobs: async_channel::Sender<ResearchJob>,
}

impl ResearchScheduler {
    /// Spawn `concurrency` (clamped to [`CONCURRENCY_RANGE`]) worker
    /// tasks, each pulling from the same queue. `mutations` is where
    /// `claim.researching` / `claim.updated` requests are sent for the
    /// claim store to apply.
    pub fn spawn(
        concurrency: usize,
        clients: Arc<ResearchClients>,
        cancel: CancellationToken,
        mutations: async_channel::Sender<ClaimMutation>,
    ) -> Self {
        let concurrency = concurrency.clamp(*CONCURRENCY_RANGE.start(), *CONCURRENCY_RANGE.end());
        let (tx, rx) = async_channel::unbounded::<ResearchJob>();

        for _ in 0..concurrency {
            let rx = rx.clone();
            let clients = clients.clone();
            let cancel = cancel.clone();
            let mutations = mutations.clone();
            tokio::spawn(async move {
                while let Ok(job) = rx.recv().await {
                    if cancel.is_cancelled() {
                        continue;
                    }
                    run_job(job, &clients, &cancel, &mutations).await;
                }
            });
        }

        Self { jobs: tx }
    }

    /// Enqueue a claim for research. Fails only if every worker has
    /// been dropped.
    pub async fn enqueue(&self, job: ResearchJob) -> Result<(), async_channel::SendError<ResearchJob>> {
        self.jobs.send(job).await
    }
}

async fn run_job(
    job: ResearchJob,
    clients: &ResearchClients,
    cancel: &CancellationToken,
    mutations: &async_channel::Sender<ClaimMutation>,
) {
    if cancel.is_cancelled() {
        return;
    }

    let _ = mutations
        .send(ClaimMutation::Researching {
            run_id: job.run_id.clone(),
            claim_id: job.claim_id.clone(),
        })
        .await;

    match research(job.clone(), clients, cancel).await {
        Ok(update) => {
            let _ = mutations
                .send(ClaimMutation::Updated {
                    run_id: job.run_id,
                    claim_id: job.claim_id,
                    fields: Box::new(update),
                })
                .await;
        }
        Err(err) => {
            if err.is_cancellation() {
                return;
            }
            warn!(claim_id = %job.claim_id, error = %err, "research job failed");
            let update = ResearchUpdate {
                status: Some(ClaimStatus::NeedsManualResearch),
                verdict: Some(Verdict::Unverified),
                confidence: Some(0.0),
                summary: Some(format!("research failed: {err}")),
                ..Default::default()
            };
            let _ = mutations
                .send(ClaimMutation::Updated {
                    run_id: job.run_id,
                    claim_id: job.claim_id,
                    fields: Box::new(update),
                })
                .await;
        }
    }
}

async fn research(
    job: ResearchJob,
    clients: &ResearchClients,
    cancel: &CancellationToken,
) -> Result<ResearchUpdate, veritas_protocol::PipelineError> {
    let fact_check = clients.fact_check.query(&job.claim_text, cancel).await?;
    if cancel.is_cancelled() {
        return Err(veritas_protocol::PipelineError::Cancelled);
    }

    let mut status = match fact_check.status {
        FactCheckStatus::Researched => ClaimStatus::Researched,
        FactCheckStatus::NoMatch => ClaimStatus::NoMatch,
        FactCheckStatus::NeedsManualResearch => ClaimStatus::NeedsManualResearch,
        FactCheckStatus::Error => ClaimStatus::NeedsManualResearch,
    };

    let mut fred_evidence = FredEvidence::default();
    let mut congress_evidence = CongressEvidence::default();

    if job.claim_category == ClaimCategory::Economic {
        fred_evidence = clients.economic.query(&job.claim_text).await;
        if fred_evidence.state != FredState::Matched {
            status = ClaimStatus::NeedsManualResearch;
        }
    }
    if cancel.is_cancelled() {
        return Err(veritas_protocol::PipelineError::Cancelled);
    }

    if job.claim_category == ClaimCategory::Political {
        congress_evidence = clients.legislative.query(&job.claim_text).await;
    }
    if cancel.is_cancelled() {
        return Err(veritas_protocol::PipelineError::Cancelled);
    }

    let verifier_input = VerifierEvidenceInput {
        claim_text: job.claim_text.clone(),
        claim_category: job.claim_category,
        fact_check_verdict: fact_check.verdict,
        fact_check_summary: fact_check.evidence.summary.clone(),
        fred_state: fred_evidence.state,
        fred_summary: fred_evidence.summary.clone(),
        congress_state: congress_evidence.state,
        congress_summary: congress_evidence.summary.clone(),
    };
    let verifier_outcome = clients.verifier.verify(&verifier_input, cancel).await?;

    let (verdict, confidence) = authoritative_verdict(
        fact_check.verdict,
        fact_check.confidence,
        fred_evidence.state,
        congress_evidence.state,
        &verifier_outcome,
    );

    Ok(ResearchUpdate {
        status: Some(status),
        google_evidence: Some(GoogleEvidence {
            state: if fact_check.status == FactCheckStatus::Error { GoogleState::Error } else { fact_check.evidence.state },
            summary: fact_check.evidence.summary,
            sources: fact_check.evidence.sources,
        }),
        fred_evidence: Some(fred_evidence),
        congress_evidence: Some(congress_evidence),
        verdict: Some(verdict),
        confidence: Some(confidence),
        summary: verifier_outcome.ai_summary.or(verifier_outcome.corrected_claim.clone()),
        sources: Some(fact_check.review_sources),
        claim_type_tag: None,
        tag_override_reason: None,
    })
}

/// Authoritative verdict selection (spec §4.5). Falls through five
/// ordered rules; the final rule always lands on `unverified` with
/// confidence `0.0` since the spec names no residual confidence value
/// for that branch.
fn authoritative_verdict(
    fact_check_verdict: Option<Verdict>,
    fact_check_confidence: f64,
    fred_state: FredState,
    congress_state: CongressState,
    verifier: &VerifierOutcome,
) -> (Verdict, f64) {
    if let Some(verdict) = fact_check_verdict {
        if verdict != Verdict::Unverified && fact_check_confidence >= 0.5 {
            return (verdict, fact_check_confidence);
        }
    }
    if fred_state == FredState::Matched {
        return (verifier.ai_verdict, verifier.ai_confidence);
    }
    if congress_state == CongressState::Matched && verifier.ai_confidence >= 0.4 {
        return (verifier.ai_verdict, verifier.ai_confidence);
    }
    let basis_usable = !matches!(verifier.evidence_basis, None | Some(EvidenceBasis::GeneralKnowledge));
    if basis_usable && verifier.ai_confidence >= 0.5 {
        return (verifier.ai_verdict, verifier.ai_confidence);
    }
    (Verdict::Unverified, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier_outcome(verdict: Verdict, confidence: f64, basis: Option<EvidenceBasis>) -> VerifierOutcome {
        VerifierOutcome {
            ai_verdict: verdict,
            ai_confidence: confidence,
            corrected_claim: None,
            ai_summary: None,
            evidence_basis: basis,
        }
    }

    #[test]
    fn fact_check_classified_with_sufficient_confidence_wins() {
        let outcome = verifier_outcome(Verdict::Unverified, 0.1, None);
        let (verdict, confidence) = authoritative_verdict(
            Some(Verdict::False),
            0.8,
            FredState::NotApplicable,
            CongressState::NotApplicable,
            &outcome,
        );
        assert_eq!(verdict, Verdict::False);
        assert_eq!(confidence, 0.8);
    }

    #[test]
    fn fred_matched_falls_back_to_verifier_verdict() {
        let outcome = verifier_outcome(Verdict::True, 0.7, Some(EvidenceBasis::FredData));
        let (verdict, confidence) = authoritative_verdict(
            None,
            0.0,
            FredState::Matched,
            CongressState::NotApplicable,
            &outcome,
        );
        assert_eq!(verdict, Verdict::True);
        assert_eq!(confidence, 0.7);
    }

    #[test]
    fn congress_matched_requires_minimum_confidence() {
        let low = verifier_outcome(Verdict::True, 0.3, Some(EvidenceBasis::CongressData));
        let (verdict, _) = authoritative_verdict(
            None,
            0.0,
            FredState::NotApplicable,
            CongressState::Matched,
            &low,
        );
        assert_eq!(verdict, Verdict::Unverified);

        let high = verifier_outcome(Verdict::True, 0.41, Some(EvidenceBasis::CongressData));
        let (verdict, _) = authoritative_verdict(
            None,
            0.0,
            FredState::NotApplicable,
            CongressState::Matched,
            &high,
        );
        assert_eq!(verdict, Verdict::True);
    }

    #[test]
    fn general_knowledge_basis_never_wins() {
        let outcome = verifier_outcome(Verdict::True, 0.9, Some(EvidenceBasis::GeneralKnowledge));
        let (verdict, _) = authoritative_verdict(
            None,
            0.0,
            FredState::NotApplicable,
            CongressState::NotApplicable,
            &outcome,
        );
        assert_eq!(verdict, Verdict::Unverified);
    }

    #[test]
    fn mixed_basis_with_sufficient_confidence_wins() {
        let outcome = verifier_outcome(Verdict::Misleading, 0.55, Some(EvidenceBasis::Mixed));
        let (verdict, confidence) = authoritative_verdict(
            None,
            0.0,
            FredState::NotApplicable,
            CongressState::NotApplicable,
            &outcome,
        );
        assert_eq!(verdict, Verdict::Misleading);
        assert_eq!(confidence, 0.55);
    }

    #[test]
    fn no_evidence_at_all_is_unverified() {
        let outcome = verifier_outcome(Verdict::True, 0.95, None);
        let (verdict, confidence) = authoritative_verdict(
            None,
            0.0,
            FredState::NotApplicable,
            CongressState::NotApplicable,
            &outcome,
        );
        assert_eq!(verdict, Verdict::Unverified);
        assert_eq!(confidence, 0.0);
    }
}
