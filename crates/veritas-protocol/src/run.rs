use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A single execution from start to stop, bound to one source URL.
///
/// At most one run is active at a time on a host (spec §3 "Run").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub source_url: String,
    pub chunk_seconds: u32,
    pub transcription_model: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<StopReason>,
}

impl Run {
    pub fn new(id: impl Into<String>, source_url: impl Into<String>, chunk_seconds: u32, transcription_model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            chunk_seconds,
            transcription_model: transcription_model.into(),
            started_at: Utc::now(),
            stopped_at: None,
            stop_reason: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.stopped_at.is_none()
    }
}

/// Why a run stopped. Covers both manual stops and every terminal
/// classification the audio supervisor can reach (spec §4.1/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    SourceEnded,
    UpstreamExitNonzero,
    ProcessError,
    ReconnectExhausted,
    SpawnFailed,
}

/// One chunk of canonical PCM audio handed from the audio supervisor to
/// the transcription queue (spec §3 "PcmChunk").
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    pub run_id: String,
    pub chunk_index: u64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub pcm: bytes::Bytes,
}
