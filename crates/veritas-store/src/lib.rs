//! Claim lifecycle store and event fan-out (spec §4.8): an in-memory
//! map of claim snapshots, mutated only through [`ClaimStore::apply`],
//! plus a bounded replay history for reconnecting SSE subscribers.

use std::collections::HashMap;
use std::collections::VecDeque;

use chrono::Utc;
use tracing::debug;
use veritas_protocol::Claim;
use veritas_protocol::ClaimMutation;
use veritas_protocol::ClaimStatus;
use veritas_protocol::EventBody;
use veritas_protocol::EventRecord;
use veritas_protocol::OutputApprovalState;
use veritas_protocol::OutputPackageStatus;
use veritas_protocol::PipelineError;
use veritas_protocol::RenderStatus;
use veritas_protocol::{
    AudioChunkEvent, ClaimEventPayload, PipelineErrorEvent, PipelineIngestStalled, PipelineLog,
    PipelineReconnectScheduled, PipelineReconnectStarted, PipelineReconnectSucceeded,
    PipelineStarted, PipelineStopped, TranscriptError, TranscriptSegmentEvent,
};

/// In-memory event history is trimmed to this many most recent entries
/// (spec §4.8 step 6).
pub const HISTORY_CAPACITY: usize = 1_000;
/// Replay on reconnect is capped at this many events (spec §4.8, event
/// fan-out paragraph).
pub const REPLAY_CAP: usize = 200;

pub struct ClaimStore {
    run_id: String,
    claims: HashMap<String, Claim>,
    history: VecDeque<EventRecord>,
    next_seq: u64,
}

impl ClaimStore {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            claims: HashMap::new(),
            history: VecDeque::new(),
            next_seq: 1,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn get(&self, claim_id: &str) -> Option<&Claim> {
        self.claims.get(claim_id)
    }

    /// All claims currently held, ordered by id (stable for listing
    /// endpoints).
    pub fn list(&self) -> Vec<&Claim> {
        let mut claims: Vec<&Claim> = self.claims.values().collect();
        claims.sort_by(|a, b| a.id.cmp(&b.id));
        claims
    }

    /// Events with `seq` strictly greater than `last_seq`, capped at
    /// [`REPLAY_CAP`] (spec §4.8, last paragraph).
    pub fn history_since(&self, last_seq: u64) -> Vec<EventRecord> {
        self.history
            .iter()
            .filter(|e| e.seq > last_seq)
            .take(REPLAY_CAP)
            .cloned()
            .collect()
    }

    /// The most recent `n` events, oldest first (spec §6 "the last 25
    /// if none [`Last-Event-ID`] provided").
    pub fn history_tail(&self, n: usize) -> Vec<EventRecord> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Publish a non-claim pipeline/audio/transcript event through the
    /// same `seq`-assigning fan-out used by claim mutations.
    pub fn publish(&mut self, body: EventBody) -> EventRecord {
        self.push_event(body)
    }

    /// Apply a single claim mutation (spec §4.8 steps 1-6). Returns
    /// `Ok(None)` when the mutation is silently dropped (stale run,
    /// precondition not met for a downstream event) and `Err` when it
    /// targets a claim this store has never seen.
    pub fn apply(&mut self, mutation: ClaimMutation) -> Result<Option<EventRecord>, PipelineError> {
        match mutation {
            ClaimMutation::Detected { claim } => self.apply_detected(claim),
            ClaimMutation::Researching { run_id, claim_id } => {
                self.apply_researching(&run_id, &claim_id)
            }
            ClaimMutation::Updated { run_id, claim_id, fields } => {
                self.apply_updated(&run_id, &claim_id, *fields)
            }
            ClaimMutation::OutputApproved { run_id, claim_id } => {
                self.apply_output_approved(&run_id, &claim_id)
            }
            ClaimMutation::OutputRejected { run_id, claim_id } => {
                self.apply_output_rejected(&run_id, &claim_id)
            }
            ClaimMutation::OutputPackageQueued { run_id, claim_id, claim_version, package_id } => {
                self.apply_package(&run_id, &claim_id, claim_version, |c| {
                    c.output_package_status = OutputPackageStatus::Queued;
                    c.output_package_id = Some(package_id.clone());
                    c.output_package_error = None;
                })
            }
            ClaimMutation::OutputPackageReady { run_id, claim_id, claim_version, package_id } => {
                self.apply_package(&run_id, &claim_id, claim_version, |c| {
                    c.output_package_status = OutputPackageStatus::Ready;
                    c.output_package_id = Some(package_id.clone());
                    c.output_package_error = None;
                })
            }
            ClaimMutation::OutputPackageFailed {
                run_id,
                claim_id,
                claim_version,
                package_id,
                error,
            } => self.apply_package(&run_id, &claim_id, claim_version, |c| {
                c.output_package_status = OutputPackageStatus::Failed;
                c.output_package_id = Some(package_id.clone());
                c.output_package_error = Some(error.clone());
            }),
            ClaimMutation::RenderQueued { run_id, claim_id, claim_version, render_job_id } => {
                self.apply_render(&run_id, &claim_id, claim_version, &render_job_id, |c| {
                    c.render_status = RenderStatus::Queued;
                    c.render_job_id = Some(render_job_id.clone());
                    c.render_error = None;
                })
            }
            ClaimMutation::RenderReady {
                run_id,
                claim_id,
                claim_version,
                render_job_id,
                artifact_url,
            } => self.apply_render(&run_id, &claim_id, claim_version, &render_job_id, |c| {
                c.render_status = RenderStatus::Ready;
                c.render_job_id = Some(render_job_id.clone());
                c.artifact_url = Some(artifact_url.clone());
                c.render_error = None;
            }),
            ClaimMutation::RenderFailed { run_id, claim_id, claim_version, render_job_id, error } => {
                self.apply_render(&run_id, &claim_id, claim_version, &render_job_id, |c| {
                    c.render_status = RenderStatus::Failed;
                    c.render_job_id = Some(render_job_id.clone());
                    c.render_error = Some(error.clone());
                })
            }
        }
    }

    fn apply_detected(&mut self, mut claim: Claim) -> Result<Option<EventRecord>, PipelineError> {
        if claim.run_id != self.run_id {
            debug!(claim_run = %claim.run_id, "dropping claim.detected for stale run");
            return Ok(None);
        }
        claim.policy = veritas_policy::evaluate(&claim);
        let claim_id = claim.id.clone();
        self.claims.insert(claim_id, claim.clone());
        Ok(Some(self.push_event(EventBody::ClaimDetected(ClaimEventPayload { claim }))))
    }

    fn apply_researching(
        &mut self,
        run_id: &str,
        claim_id: &str,
    ) -> Result<Option<EventRecord>, PipelineError> {
        if run_id != self.run_id {
            return Ok(None);
        }
        let claim = self.mutate_existing(claim_id, |c| {
            c.status = ClaimStatus::Researching;
        })?;
        Ok(Some(self.push_event(EventBody::ClaimResearching(ClaimEventPayload { claim }))))
    }

    fn apply_updated(
        &mut self,
        run_id: &str,
        claim_id: &str,
        fields: veritas_protocol::ResearchUpdate,
    ) -> Result<Option<EventRecord>, PipelineError> {
        if run_id != self.run_id {
            return Ok(None);
        }
        let claim = self.mutate_existing(claim_id, move |c| {
            let was_approved = c.output_approval_state == OutputApprovalState::Approved;
            if let Some(status) = fields.status {
                c.status = status;
            }
            if let Some(google) = fields.google_evidence {
                c.google_evidence = google;
            }
            if let Some(fred) = fields.fred_evidence {
                c.fred_evidence = fred;
            }
            if let Some(congress) = fields.congress_evidence {
                c.congress_evidence = congress;
            }
            if let Some(verdict) = fields.verdict {
                c.verdict = verdict;
            }
            if let Some(confidence) = fields.confidence {
                c.confidence = confidence;
            }
            if let Some(summary) = fields.summary {
                c.summary = Some(summary);
            }
            if let Some(sources) = fields.sources {
                c.sources = sources;
            }
            if let Some(tag) = fields.claim_type_tag {
                c.claim_type_tag = tag;
            }
            if let Some(reason) = fields.tag_override_reason {
                c.tag_override_reason = Some(reason);
            }
            if was_approved {
                c.output_approval_state = OutputApprovalState::Pending;
                c.clear_downstream();
            }
        })?;
        Ok(Some(self.push_event(EventBody::ClaimUpdated(ClaimEventPayload { claim }))))
    }

    fn apply_output_approved(
        &mut self,
        run_id: &str,
        claim_id: &str,
    ) -> Result<Option<EventRecord>, PipelineError> {
        if run_id != self.run_id {
            return Ok(None);
        }
        let claim = self.mutate_existing(claim_id, |c| {
            c.output_approval_state = OutputApprovalState::Approved;
            c.approved_at = Some(Utc::now());
            // `mutate_existing` bumps `version` after this closure runs, so
            // `approved_version` must anticipate that increment to equal the
            // version the caller will actually see (spec §3 "approvedVersion
            // ... equals the version at the moment of approval").
            c.approved_version = Some(c.version + 1);
            c.rejected_at = None;
        })?;
        Ok(Some(self.push_event(EventBody::ClaimOutputApproved(ClaimEventPayload { claim }))))
    }

    fn apply_output_rejected(
        &mut self,
        run_id: &str,
        claim_id: &str,
    ) -> Result<Option<EventRecord>, PipelineError> {
        if run_id != self.run_id {
            return Ok(None);
        }
        let claim = self.mutate_existing(claim_id, |c| {
            c.output_approval_state = OutputApprovalState::Rejected;
            c.rejected_at = Some(Utc::now());
            c.approved_at = None;
            c.approved_version = None;
        })?;
        Ok(Some(self.push_event(EventBody::ClaimOutputRejected(ClaimEventPayload { claim }))))
    }

    fn apply_package(
        &mut self,
        run_id: &str,
        claim_id: &str,
        claim_version: u64,
        mutate: impl FnOnce(&mut Claim),
    ) -> Result<Option<EventRecord>, PipelineError> {
        if run_id != self.run_id {
            return Ok(None);
        }
        let Some(existing) = self.claims.get(claim_id) else {
            return Err(PipelineError::ClaimNotFound(claim_id.to_string()));
        };
        if existing.output_approval_state != OutputApprovalState::Approved
            || existing.approved_version != Some(claim_version)
        {
            debug!(claim_id, "dropping package event: approved_version mismatch");
            return Ok(None);
        }
        let claim = self.mutate_existing(claim_id, mutate)?;
        Ok(Some(self.push_event(package_event(&claim))))
    }

    fn apply_render(
        &mut self,
        run_id: &str,
        claim_id: &str,
        claim_version: u64,
        render_job_id: &str,
        mutate: impl FnOnce(&mut Claim),
    ) -> Result<Option<EventRecord>, PipelineError> {
        if run_id != self.run_id {
            return Ok(None);
        }
        let Some(existing) = self.claims.get(claim_id) else {
            return Err(PipelineError::ClaimNotFound(claim_id.to_string()));
        };
        if existing.output_approval_state != OutputApprovalState::Approved
            || existing.approved_version != Some(claim_version)
        {
            debug!(claim_id, "dropping render event: approved_version mismatch");
            return Ok(None);
        }
        if let Some(current_job) = existing.render_job_id.as_deref() {
            if current_job != render_job_id {
                debug!(claim_id, "dropping render event: render_job_id mismatch");
                return Ok(None);
            }
        }
        let claim = self.mutate_existing(claim_id, mutate)?;
        Ok(Some(self.push_event(render_event(&claim))))
    }

    fn mutate_existing(
        &mut self,
        claim_id: &str,
        mutate: impl FnOnce(&mut Claim),
    ) -> Result<Claim, PipelineError> {
        let claim = self
            .claims
            .get_mut(claim_id)
            .ok_or_else(|| PipelineError::ClaimNotFound(claim_id.to_string()))?;
        mutate(claim);
        claim.version += 1;
        claim.policy = veritas_policy::evaluate(claim);
        Ok(claim.clone())
    }

    fn push_event(&mut self, body: EventBody) -> EventRecord {
        let record = EventRecord { seq: self.next_seq, ts: Utc::now(), body };
        self.next_seq += 1;
        self.history.push_back(record.clone());
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
        record
    }
}

/// Which claim event a completed package-status mutation becomes,
/// matching the field just written.
fn package_event(claim: &Claim) -> EventBody {
    let payload = ClaimEventPayload { claim: claim.clone() };
    match claim.output_package_status {
        OutputPackageStatus::Queued => EventBody::ClaimOutputPackageQueued(payload),
        OutputPackageStatus::Ready => EventBody::ClaimOutputPackageReady(payload),
        OutputPackageStatus::Failed => EventBody::ClaimOutputPackageFailed(payload),
        OutputPackageStatus::None => EventBody::ClaimOutputPackageQueued(payload),
    }
}

fn render_event(claim: &Claim) -> EventBody {
    let payload = ClaimEventPayload { claim: claim.clone() };
    match claim.render_status {
        RenderStatus::Queued => EventBody::ClaimRenderQueued(payload),
        RenderStatus::Ready => EventBody::ClaimRenderReady(payload),
        RenderStatus::Failed => EventBody::ClaimRenderFailed(payload),
        RenderStatus::None | RenderStatus::Rendering => EventBody::ClaimRenderQueued(payload),
    }
}

/// Convenience constructors for the non-claim pipeline/audio/transcript
/// events, kept alongside the store since they share its `seq`
/// allocator (spec §4.8 step 5 applies to every event, not just claim
/// ones).
pub mod events {
    use super::*;

    pub fn pipeline_started(run_id: String, source_url: String, chunk_seconds: u32, transcription_model: String) -> EventBody {
        EventBody::PipelineStarted(PipelineStarted { run_id, source_url, chunk_seconds, transcription_model })
    }

    pub fn pipeline_stopped(run_id: String, reason: String) -> EventBody {
        EventBody::PipelineStopped(PipelineStopped { run_id, reason })
    }

    pub fn pipeline_error(run_id: String, message: String) -> EventBody {
        EventBody::PipelineError(PipelineErrorEvent { run_id, message })
    }

    pub fn pipeline_log(run_id: String, message: String) -> EventBody {
        EventBody::PipelineLog(PipelineLog { run_id, message })
    }

    pub fn reconnect_scheduled(run_id: String, attempt: u32, delay_ms: u64) -> EventBody {
        EventBody::PipelineReconnectScheduled(PipelineReconnectScheduled { run_id, attempt, delay_ms })
    }

    pub fn reconnect_started(run_id: String, attempt: u32) -> EventBody {
        EventBody::PipelineReconnectStarted(PipelineReconnectStarted { run_id, attempt })
    }

    pub fn reconnect_succeeded(run_id: String) -> EventBody {
        EventBody::PipelineReconnectSucceeded(PipelineReconnectSucceeded { run_id })
    }

    pub fn ingest_stalled(run_id: String, idle_ms: u64) -> EventBody {
        EventBody::PipelineIngestStalled(PipelineIngestStalled { run_id, idle_ms })
    }

    pub fn audio_chunk(run_id: String, chunk_index: u64, start_sec: f64, end_sec: f64, byte_len: usize) -> EventBody {
        EventBody::AudioChunk(AudioChunkEvent { run_id, chunk_index, start_sec, end_sec, byte_len })
    }

    pub fn transcript_segment(segment: veritas_protocol::TranscriptSegment) -> EventBody {
        EventBody::TranscriptSegmentEvent(TranscriptSegmentEvent { segment })
    }

    pub fn transcript_error(run_id: String, message: String) -> EventBody {
        EventBody::TranscriptError(TranscriptError { run_id, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use veritas_protocol::ClaimCategory;
    use veritas_protocol::ClaimTypeTag;
    use veritas_protocol::ResearchUpdate;

    fn new_claim(run_id: &str, index: u64) -> Claim {
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

    #[test]
    fn detected_inserts_at_version_one_and_assigns_seq() {
        let mut store = ClaimStore::new("run-1".to_string());
        let claim = new_claim("run-1", 0);
        let claim_id = claim.id.clone();
        let event = store.apply(ClaimMutation::Detected { claim }).unwrap().unwrap();
        assert_eq!(event.seq, 1);
        assert_eq!(store.get(&claim_id).unwrap().version, 1);
    }

    #[test]
    fn detected_for_stale_run_is_silently_dropped() {
        let mut store = ClaimStore::new("run-1".to_string());
        let claim = new_claim("run-2", 0);
        let result = store.apply(ClaimMutation::Detected { claim }).unwrap();
        assert!(result.is_none());
        assert!(store.list().is_empty());
    }

    #[test]
    fn researching_unknown_claim_errors() {
        let mut store = ClaimStore::new("run-1".to_string());
        let result = store.apply(ClaimMutation::Researching {
            run_id: "run-1".to_string(),
            claim_id: "run-1-000000".to_string(),
        });
        assert!(matches!(result, Err(PipelineError::ClaimNotFound(_))));
    }

    #[test]
    fn updated_content_change_revokes_prior_approval() {
        let mut store = ClaimStore::new("run-1".to_string());
        let claim = new_claim("run-1", 0);
        let claim_id = claim.id.clone();
        store.apply(ClaimMutation::Detected { claim }).unwrap();
        store
            .apply(ClaimMutation::Researching { run_id: "run-1".to_string(), claim_id: claim_id.clone() })
            .unwrap();
        store
            .apply(ClaimMutation::Updated {
                run_id: "run-1".to_string(),
                claim_id: claim_id.clone(),
                fields: Box::new(ResearchUpdate {
                    status: Some(ClaimStatus::Researched),
                    confidence: Some(0.95),
                    ..Default::default()
                }),
            })
            .unwrap();
        store
            .apply(ClaimMutation::OutputApproved { run_id: "run-1".to_string(), claim_id: claim_id.clone() })
            .unwrap();
        assert_eq!(store.get(&claim_id).unwrap().output_approval_state, OutputApprovalState::Approved);

        store
            .apply(ClaimMutation::Updated {
                run_id: "run-1".to_string(),
                claim_id: claim_id.clone(),
                fields: Box::new(ResearchUpdate { summary: Some("revised".to_string()), ..Default::default() }),
            })
            .unwrap();

        let claim = store.get(&claim_id).unwrap();
        assert_eq!(claim.output_approval_state, OutputApprovalState::Pending);
        assert!(claim.approved_version.is_none());
        assert!(claim.approved_at.is_none());
    }

    #[test]
    fn package_event_dropped_unless_approved_version_matches() {
        let mut store = ClaimStore::new("run-1".to_string());
        let claim = new_claim("run-1", 0);
        let claim_id = claim.id.clone();
        store.apply(ClaimMutation::Detected { claim }).unwrap();

        let dropped = store
            .apply(ClaimMutation::OutputPackageQueued {
                run_id: "run-1".to_string(),
                claim_id: claim_id.clone(),
                claim_version: 1,
                package_id: "pkg-1".to_string(),
            })
            .unwrap();
        assert!(dropped.is_none());
    }

    #[test]
    fn package_event_applies_once_approved_and_version_matches() {
        let mut store = ClaimStore::new("run-1".to_string());
        let claim = new_claim("run-1", 0);
        let claim_id = claim.id.clone();
        store.apply(ClaimMutation::Detected { claim }).unwrap();
        store
            .apply(ClaimMutation::Updated {
                run_id: "run-1".to_string(),
                claim_id: claim_id.clone(),
                fields: Box::new(ResearchUpdate { status: Some(ClaimStatus::Researched), confidence: Some(0.9), ..Default::default() }),
            })
            .unwrap();
        let event = store
            .apply(ClaimMutation::OutputApproved { run_id: "run-1".to_string(), claim_id: claim_id.clone() })
            .unwrap()
            .unwrap();
        let approved_version = match &event.body {
            EventBody::ClaimOutputApproved(payload) => payload.claim.approved_version.unwrap(),
            _ => panic!("expected ClaimOutputApproved"),
        };

        let applied = store
            .apply(ClaimMutation::OutputPackageReady {
                run_id: "run-1".to_string(),
                claim_id: claim_id.clone(),
                claim_version: approved_version,
                package_id: "pkg-1".to_string(),
            })
            .unwrap();
        assert!(applied.is_some());
        assert_eq!(store.get(&claim_id).unwrap().output_package_status, OutputPackageStatus::Ready);
    }

    #[test]
    fn history_since_respects_cap_and_strict_greater_than() {
        let mut store = ClaimStore::new("run-1".to_string());
        for i in 0..5 {
            let claim = new_claim("run-1", i);
            store.apply(ClaimMutation::Detected { claim }).unwrap();
        }
        let events = store.history_since(2);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.seq > 2));
    }

    #[test]
    fn history_tail_returns_the_most_recent_events_in_order() {
        let mut store = ClaimStore::new("run-1".to_string());
        for i in 0..5 {
            let claim = new_claim("run-1", i);
            store.apply(ClaimMutation::Detected { claim }).unwrap();
        }
        let tail = store.history_tail(2);
        assert_eq!(tail.len(), 2);
        assert!(tail[0].seq < tail[1].seq);
        assert_eq!(tail[1].seq, store.history_tail(1)[0].seq);
    }

    #[test]
    fn history_tail_saturates_when_n_exceeds_history_len() {
        let mut store = ClaimStore::new("run-1".to_string());
        store.apply(ClaimMutation::Detected { claim: new_claim("run-1", 0) }).unwrap();
        assert_eq!(store.history_tail(50).len(), 1);
    }
}
