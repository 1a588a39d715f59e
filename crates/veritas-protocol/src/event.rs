use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::claim::Claim;
use crate::segment::TranscriptSegment;

/// Every event type the stream can emit (spec §6 "Event types"). Kept as
/// one enum, in the spirit of `codex-protocol::EventMsg`, so that the
/// event fan-out layer has a single place that assigns `seq` and embeds
/// snapshots (Design Notes §9 "collapse to a single typed event bus").
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventBody {
    PipelineStarted(PipelineStarted),
    PipelineStopped(PipelineStopped),
    PipelineError(PipelineErrorEvent),
    PipelineLog(PipelineLog),
    PipelineReconnectScheduled(PipelineReconnectScheduled),
    PipelineReconnectStarted(PipelineReconnectStarted),
    PipelineReconnectSucceeded(PipelineReconnectSucceeded),
    PipelineIngestStalled(PipelineIngestStalled),
    AudioChunk(AudioChunkEvent),
    TranscriptSegmentEvent(TranscriptSegmentEvent),
    TranscriptError(TranscriptError),
    ClaimDetected(ClaimEventPayload),
    ClaimResearching(ClaimEventPayload),
    ClaimUpdated(ClaimEventPayload),
    ClaimOutputApproved(ClaimEventPayload),
    ClaimOutputRejected(ClaimEventPayload),
    ClaimOutputPackageQueued(ClaimEventPayload),
    ClaimOutputPackageReady(ClaimEventPayload),
    ClaimOutputPackageFailed(ClaimEventPayload),
    ClaimRenderQueued(ClaimEventPayload),
    ClaimRenderReady(ClaimEventPayload),
    ClaimRenderFailed(ClaimEventPayload),
}

impl EventBody {
    /// The dotted SSE `event:` field name (spec §6).
    pub fn name(&self) -> &'static str {
        match self {
            EventBody::PipelineStarted(_) => "pipeline.started",
            EventBody::PipelineStopped(_) => "pipeline.stopped",
            EventBody::PipelineError(_) => "pipeline.error",
            EventBody::PipelineLog(_) => "pipeline.log",
            EventBody::PipelineReconnectScheduled(_) => "pipeline.reconnect_scheduled",
            EventBody::PipelineReconnectStarted(_) => "pipeline.reconnect_started",
            EventBody::PipelineReconnectSucceeded(_) => "pipeline.reconnect_succeeded",
            EventBody::PipelineIngestStalled(_) => "pipeline.ingest_stalled",
            EventBody::AudioChunk(_) => "audio.chunk",
            EventBody::TranscriptSegmentEvent(_) => "transcript.segment",
            EventBody::TranscriptError(_) => "transcript.error",
            EventBody::ClaimDetected(_) => "claim.detected",
            EventBody::ClaimResearching(_) => "claim.researching",
            EventBody::ClaimUpdated(_) => "claim.updated",
            EventBody::ClaimOutputApproved(_) => "claim.output_approved",
            EventBody::ClaimOutputRejected(_) => "claim.output_rejected",
            EventBody::ClaimOutputPackageQueued(_) => "claim.output_package_queued",
            EventBody::ClaimOutputPackageReady(_) => "claim.output_package_ready",
            EventBody::ClaimOutputPackageFailed(_) => "claim.output_package_failed",
            EventBody::ClaimRenderQueued(_) => "claim.render_queued",
            EventBody::ClaimRenderReady(_) => "claim.render_ready",
            EventBody::ClaimRenderFailed(_) => "claim.render_failed",
        }
    }

    /// The run this event belongs to, used by subscribers to drop events
    /// from a run that is no longer current.
    pub fn run_id(&self) -> &str {
        match self {
            EventBody::PipelineStarted(e) => &e.run_id,
            EventBody::PipelineStopped(e) => &e.run_id,
            EventBody::PipelineError(e) => &e.run_id,
            EventBody::PipelineLog(e) => &e.run_id,
            EventBody::PipelineReconnectScheduled(e) => &e.run_id,
            EventBody::PipelineReconnectStarted(e) => &e.run_id,
            EventBody::PipelineReconnectSucceeded(e) => &e.run_id,
            EventBody::PipelineIngestStalled(e) => &e.run_id,
            EventBody::AudioChunk(e) => &e.run_id,
            EventBody::TranscriptSegmentEvent(e) => &e.segment.run_id,
            EventBody::TranscriptError(e) => &e.run_id,
            EventBody::ClaimDetected(e) => &e.claim.run_id,
            EventBody::ClaimResearching(e) => &e.claim.run_id,
            EventBody::ClaimUpdated(e) => &e.claim.run_id,
            EventBody::ClaimOutputApproved(e) => &e.claim.run_id,
            EventBody::ClaimOutputRejected(e) => &e.claim.run_id,
            EventBody::ClaimOutputPackageQueued(e) => &e.claim.run_id,
            EventBody::ClaimOutputPackageReady(e) => &e.claim.run_id,
            EventBody::ClaimOutputPackageFailed(e) => &e.claim.run_id,
            EventBody::ClaimRenderQueued(e) => &e.claim.run_id,
            EventBody::ClaimRenderReady(e) => &e.claim.run_id,
            EventBody::ClaimRenderFailed(e) => &e.claim.run_id,
        }
    }
}

/// The fully enriched record handed to subscribers: a server-assigned
/// monotonic `seq`, an ISO-8601 timestamp, and the event body (spec §4.8
/// step 5).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl EventRecord {
    pub fn name(&self) -> &'static str {
        self.body.name()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStarted {
    pub run_id: String,
    pub source_url: String,
    pub chunk_seconds: u32,
    pub transcription_model: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStopped {
    pub run_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineErrorEvent {
    pub run_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineLog {
    pub run_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReconnectScheduled {
    pub run_id: String,
    pub attempt: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReconnectStarted {
    pub run_id: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReconnectSucceeded {
    pub run_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineIngestStalled {
    pub run_id: String,
    pub idle_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunkEvent {
    pub run_id: String,
    pub chunk_index: u64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub byte_len: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegmentEvent {
    pub segment: TranscriptSegment,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptError {
    pub run_id: String,
    pub message: String,
}

/// Payload shared by every `claim.*` event: the full post-mutation
/// snapshot (spec §6 "Each claim event carries a full snapshot embed").
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimEventPayload {
    pub claim: Claim,
}
