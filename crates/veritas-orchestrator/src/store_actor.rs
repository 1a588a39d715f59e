//! The claim store's single-owner actor (spec §4.8, Design Notes §9
//! "encapsulate in an explicit run-owner object... mutated through one
//! serialized command channel"): the only task that ever touches
//! [`ClaimStore`] directly. Every other component talks to it through
//! [`StoreHandle`], which guarantees the approve/reject/tag-override
//! checked transitions run atomically — there is no `.await` between
//! reading the current version/policy and applying the mutation.

use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use veritas_protocol::Claim;
use veritas_protocol::ClaimMutation;
use veritas_protocol::ClaimTypeTag;
use veritas_protocol::EventBody;
use veritas_protocol::EventRecord;
use veritas_protocol::OutputApprovalState;
use veritas_protocol::PipelineError;
use veritas_protocol::RenderStatus;
use veritas_protocol::ResearchUpdate;
use veritas_store::ClaimStore;

const BROADCAST_CAPACITY: usize = 1024;
const COMMAND_CHANNEL_CAPACITY: usize = 256;

pub type TransitionResult = Result<Claim, PipelineError>;

/// What a render-image request should do (spec §6 "Non-forced requests
/// with a prior non-failed job return that job").
#[derive(Debug, Clone)]
pub enum RenderDecision {
    Reuse { render_job_id: String, claim: Claim },
    Start { claim: Claim },
}

enum Command {
    Mutate { mutation: ClaimMutation, reply: oneshot::Sender<Result<Option<EventRecord>, PipelineError>> },
    Publish { body: EventBody, reply: oneshot::Sender<EventRecord> },
    Get { claim_id: String, reply: oneshot::Sender<Option<Claim>> },
    List { reply: oneshot::Sender<Vec<Claim>> },
    HistorySince { last_seq: u64, reply: oneshot::Sender<Vec<EventRecord>> },
    HistoryTail { n: usize, reply: oneshot::Sender<Vec<EventRecord>> },
    Subscribe { reply: oneshot::Sender<broadcast::Receiver<EventRecord>> },
    Approve { claim_id: String, expected_version: u64, reply: oneshot::Sender<TransitionResult> },
    Reject { claim_id: String, expected_version: u64, reply: oneshot::Sender<TransitionResult> },
    TagOverride {
        claim_id: String,
        expected_version: u64,
        tag: ClaimTypeTag,
        reason: String,
        reply: oneshot::Sender<TransitionResult>,
    },
    CheckExport { claim_id: String, expected_version: u64, reply: oneshot::Sender<TransitionResult> },
    DecideRender {
        claim_id: String,
        expected_version: u64,
        force: bool,
        reply: oneshot::Sender<Result<RenderDecision, PipelineError>>,
    },
}

/// Cheaply cloneable front for the store actor; one per run.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<Command>,
}

impl StoreHandle {
    /// Spawn the actor owning a fresh [`ClaimStore`] for `run_id`.
    pub fn spawn(run_id: String) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, _events_rx) = broadcast::channel(BROADCAST_CAPACITY);
        tokio::spawn(run_actor(ClaimStore::new(run_id), rx, events_tx));
        Self { tx }
    }

    pub async fn apply(&self, mutation: ClaimMutation) -> Result<Option<EventRecord>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Mutate { mutation, reply }).await;
        rx.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    pub async fn publish(&self, body: EventBody) -> Option<EventRecord> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Publish { body, reply }).await;
        rx.await.ok()
    }

    pub async fn get(&self, claim_id: &str) -> Option<Claim> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get { claim_id: claim_id.to_string(), reply }).await;
        rx.await.ok().flatten()
    }

    pub async fn list(&self) -> Vec<Claim> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::List { reply }).await;
        rx.await.unwrap_or_default()
    }

    pub async fn history_since(&self, last_seq: u64) -> Vec<EventRecord> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::HistorySince { last_seq, reply }).await;
        rx.await.unwrap_or_default()
    }

    pub async fn history_tail(&self, n: usize) -> Vec<EventRecord> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::HistoryTail { n, reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Subscribe for live events. Callers that also need replay should
    /// call this *before* [`StoreHandle::history_since`] and dedupe by
    /// `seq`, since the two calls are not atomic with each other.
    pub async fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe { reply }).await;
        match rx.await {
            Ok(receiver) => receiver,
            Err(_) => broadcast::channel(1).1,
        }
    }

    /// Atomically check `expectedVersion` and approval eligibility,
    /// then apply `claim.output_approved` (spec §4.9).
    pub async fn approve(&self, claim_id: &str, expected_version: u64) -> TransitionResult {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Approve { claim_id: claim_id.to_string(), expected_version, reply }).await;
        rx.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    pub async fn reject(&self, claim_id: &str, expected_version: u64) -> TransitionResult {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reject { claim_id: claim_id.to_string(), expected_version, reply }).await;
        rx.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    pub async fn tag_override(
        &self,
        claim_id: &str,
        expected_version: u64,
        tag: ClaimTypeTag,
        reason: String,
    ) -> TransitionResult {
        let (reply, rx) = oneshot::channel();
        self.send(Command::TagOverride { claim_id: claim_id.to_string(), expected_version, tag, reason, reply }).await;
        rx.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    /// Validate `expectedVersion` + `exportEligibility` without
    /// mutating anything; the caller enqueues the `*Queued` mutation
    /// itself once it has the validated snapshot.
    pub async fn check_export(&self, claim_id: &str, expected_version: u64) -> TransitionResult {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CheckExport { claim_id: claim_id.to_string(), expected_version, reply }).await;
        rx.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    pub async fn decide_render(
        &self,
        claim_id: &str,
        expected_version: u64,
        force: bool,
    ) -> Result<RenderDecision, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::DecideRender { claim_id: claim_id.to_string(), expected_version, force, reply }).await;
        rx.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    async fn send(&self, command: Command) {
        let _ = self.tx.send(command).await;
    }
}

async fn run_actor(mut store: ClaimStore, mut rx: mpsc::Receiver<Command>, events: broadcast::Sender<EventRecord>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Mutate { mutation, reply } => {
                let result = store.apply(mutation);
                if let Ok(Some(record)) = &result {
                    let _ = events.send(record.clone());
                }
                let _ = reply.send(result);
            }
            Command::Publish { body, reply } => {
                let record = store.publish(body);
                let _ = events.send(record.clone());
                let _ = reply.send(record);
            }
            Command::Get { claim_id, reply } => {
                let _ = reply.send(store.get(&claim_id).cloned());
            }
            Command::List { reply } => {
                let _ = reply.send(store.list().into_iter().cloned().collect());
            }
            Command::HistorySince { last_seq, reply } => {
                let _ = reply.send(store.history_since(last_seq));
            }
            Command::HistoryTail { n, reply } => {
                let _ = reply.send(store.history_tail(n));
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(events.subscribe());
            }
            Command::Approve { claim_id, expected_version, reply } => {
                let (result, record) = approve_transition(&mut store, &claim_id, expected_version);
                if let Some(record) = record {
                    let _ = events.send(record);
                }
                let _ = reply.send(result);
            }
            Command::Reject { claim_id, expected_version, reply } => {
                let (result, record) = reject_transition(&mut store, &claim_id, expected_version);
                if let Some(record) = record {
                    let _ = events.send(record);
                }
                let _ = reply.send(result);
            }
            Command::TagOverride { claim_id, expected_version, tag, reason, reply } => {
                let (result, record) = tag_override_transition(&mut store, &claim_id, expected_version, tag, reason);
                if let Some(record) = record {
                    let _ = events.send(record);
                }
                let _ = reply.send(result);
            }
            Command::CheckExport { claim_id, expected_version, reply } => {
                let _ = reply.send(check_export_transition(&store, &claim_id, expected_version));
            }
            Command::DecideRender { claim_id, expected_version, force, reply } => {
                let _ = reply.send(decide_render_transition(&store, &claim_id, expected_version, force));
            }
        }
    }
}

fn validate_claim(store: &ClaimStore, claim_id: &str, expected_version: u64) -> Result<Claim, PipelineError> {
    let claim = store.get(claim_id).ok_or_else(|| PipelineError::ClaimNotFound(claim_id.to_string()))?;
    if claim.version != expected_version {
        return Err(PipelineError::VersionConflict { expected: expected_version, current: claim.version });
    }
    Ok(claim.clone())
}

fn extract_claim(record: &EventRecord) -> Claim {
    match &record.body {
        EventBody::ClaimDetected(p)
        | EventBody::ClaimResearching(p)
        | EventBody::ClaimUpdated(p)
        | EventBody::ClaimOutputApproved(p)
        | EventBody::ClaimOutputRejected(p)
        | EventBody::ClaimOutputPackageQueued(p)
        | EventBody::ClaimOutputPackageReady(p)
        | EventBody::ClaimOutputPackageFailed(p)
        | EventBody::ClaimRenderQueued(p)
        | EventBody::ClaimRenderReady(p)
        | EventBody::ClaimRenderFailed(p) => p.claim.clone(),
        other => unreachable!("non-claim event from a claim mutation: {}", other.name()),
    }
}

fn approve_transition(
    store: &mut ClaimStore,
    claim_id: &str,
    expected_version: u64,
) -> (TransitionResult, Option<EventRecord>) {
    let validated = validate_claim(store, claim_id, expected_version).and_then(|claim| {
        if let Some(reason) = claim.policy.approval_block_reason {
            return Err(PipelineError::PolicyBlocked(reason));
        }
        Ok(())
    });
    if let Err(err) = validated {
        return (Err(err), None);
    }
    let run_id = store.run_id().to_string();
    match store.apply(ClaimMutation::OutputApproved { run_id: run_id.clone(), claim_id: claim_id.to_string() }) {
        Ok(Some(record)) => (Ok(extract_claim(&record)), Some(record)),
        Ok(None) => (Err(PipelineError::StaleRun(run_id)), None),
        Err(err) => (Err(err), None),
    }
}

fn reject_transition(
    store: &mut ClaimStore,
    claim_id: &str,
    expected_version: u64,
) -> (TransitionResult, Option<EventRecord>) {
    if let Err(err) = validate_claim(store, claim_id, expected_version) {
        return (Err(err), None);
    }
    let run_id = store.run_id().to_string();
    match store.apply(ClaimMutation::OutputRejected { run_id: run_id.clone(), claim_id: claim_id.to_string() }) {
        Ok(Some(record)) => (Ok(extract_claim(&record)), Some(record)),
        Ok(None) => (Err(PipelineError::StaleRun(run_id)), None),
        Err(err) => (Err(err), None),
    }
}

fn tag_override_transition(
    store: &mut ClaimStore,
    claim_id: &str,
    expected_version: u64,
    tag: ClaimTypeTag,
    reason: String,
) -> (TransitionResult, Option<EventRecord>) {
    let validated = validate_claim(store, claim_id, expected_version).and_then(|claim| {
        if reason.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("tag override reason must not be empty".to_string()));
        }
        if claim.output_approval_state == OutputApprovalState::Approved {
            return Err(PipelineError::InvalidRequest("cannot override tag while output is approved".to_string()));
        }
        Ok(())
    });
    if let Err(err) = validated {
        return (Err(err), None);
    }
    let run_id = store.run_id().to_string();
    let fields = ResearchUpdate { claim_type_tag: Some(tag), tag_override_reason: Some(reason), ..Default::default() };
    match store.apply(ClaimMutation::Updated { run_id: run_id.clone(), claim_id: claim_id.to_string(), fields: Box::new(fields) }) {
        Ok(Some(record)) => (Ok(extract_claim(&record)), Some(record)),
        Ok(None) => (Err(PipelineError::StaleRun(run_id)), None),
        Err(err) => (Err(err), None),
    }
}

fn check_export_transition(store: &ClaimStore, claim_id: &str, expected_version: u64) -> TransitionResult {
    let claim = validate_claim(store, claim_id, expected_version)?;
    if let Some(reason) = claim.policy.export_block_reason {
        return Err(PipelineError::PolicyBlocked(reason));
    }
    if claim.approved_version.is_none() {
        return Err(PipelineError::InvalidRequest("claim has no approved version".to_string()));
    }
    Ok(claim)
}

fn decide_render_transition(
    store: &ClaimStore,
    claim_id: &str,
    expected_version: u64,
    force: bool,
) -> Result<RenderDecision, PipelineError> {
    let claim = check_export_transition(store, claim_id, expected_version)?;
    if !force {
        if let Some(job_id) = claim.render_job_id.clone() {
            if matches!(claim.render_status, RenderStatus::Queued | RenderStatus::Rendering | RenderStatus::Ready) {
                return Ok(RenderDecision::Reuse { render_job_id: job_id, claim });
            }
        }
    }
    Ok(RenderDecision::Start { claim })
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_protocol::ClaimCategory;
    use veritas_protocol::ClaimStatus;
    use veritas_protocol::ClaimTypeTag;

    fn sample_claim(run_id: &str, index: u64) -> Claim {
        Claim::detected(
            Claim::make_id(run_id, index),
            run_id.to_string(),
            "Inflation fell to 3.1 percent.".to_string(),
            Vec::new(),
            15.0,
            "00:00:15".to_string(),
            ClaimCategory::Economic,
            ClaimTypeTag::NumericFactual,
            0.7,
        )
    }

    async fn researched_handle() -> (StoreHandle, String) {
        let handle = StoreHandle::spawn("run-1".to_string());
        let claim = sample_claim("run-1", 0);
        let claim_id = claim.id.clone();
        handle.apply(ClaimMutation::Detected { claim }).await.unwrap();
        handle
            .apply(ClaimMutation::Updated {
                run_id: "run-1".to_string(),
                claim_id: claim_id.clone(),
                fields: Box::new(ResearchUpdate {
                    status: Some(ClaimStatus::Researched),
                    confidence: Some(0.9),
                    ..Default::default()
                }),
            })
            .await
            .unwrap();
        (handle, claim_id)
    }

    #[tokio::test]
    async fn approve_succeeds_when_eligible_and_version_matches() {
        let (handle, claim_id) = researched_handle().await;
        let claim = handle.approve(&claim_id, 2).await.unwrap();
        assert_eq!(claim.output_approval_state, OutputApprovalState::Approved);
        assert_eq!(claim.approved_version, Some(claim.version));
    }

    #[tokio::test]
    async fn approve_rejects_stale_version() {
        let (handle, claim_id) = researched_handle().await;
        let result = handle.approve(&claim_id, 99).await;
        assert!(matches!(result, Err(PipelineError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn tag_override_rejected_while_approved() {
        let (handle, claim_id) = researched_handle().await;
        let claim = handle.approve(&claim_id, 2).await.unwrap();
        let result = handle.tag_override(&claim_id, claim.version, ClaimTypeTag::Other, "operator correction".to_string()).await;
        assert!(matches!(result, Err(PipelineError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn tag_override_requires_non_empty_reason() {
        let (handle, claim_id) = researched_handle().await;
        let result = handle.tag_override(&claim_id, 2, ClaimTypeTag::Other, "  ".to_string()).await;
        assert!(matches!(result, Err(PipelineError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn decide_render_reuses_existing_non_failed_job() {
        let (handle, claim_id) = researched_handle().await;
        let claim = handle.approve(&claim_id, 2).await.unwrap();
        let approved_version = claim.approved_version.unwrap();
        handle
            .apply(ClaimMutation::RenderQueued {
                run_id: "run-1".to_string(),
                claim_id: claim_id.clone(),
                claim_version: approved_version,
                render_job_id: "job-1".to_string(),
            })
            .await
            .unwrap();
        let decision = handle.decide_render(&claim_id, claim.version, false).await.unwrap();
        assert!(matches!(decision, RenderDecision::Reuse { render_job_id, .. } if render_job_id == "job-1"));
    }

    #[tokio::test]
    async fn decide_render_forces_a_new_start_even_with_existing_job() {
        let (handle, claim_id) = researched_handle().await;
        let claim = handle.approve(&claim_id, 2).await.unwrap();
        let approved_version = claim.approved_version.unwrap();
        handle
            .apply(ClaimMutation::RenderQueued {
                run_id: "run-1".to_string(),
                claim_id: claim_id.clone(),
                claim_version: approved_version,
                render_job_id: "job-1".to_string(),
            })
            .await
            .unwrap();
        let decision = handle.decide_render(&claim_id, claim.version, true).await.unwrap();
        assert!(matches!(decision, RenderDecision::Start { .. }));
    }
}
