use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Shared error type for the pipeline crates, in the same spirit as
/// `codex-core::error::CodexErr`: a flat enum covering both the
/// automatic conversions from common external error types and the
/// handful of domain-specific conditions every component can hit.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no run is currently active")]
    NoActiveRun,

    #[error("run {0} is not the active run")]
    StaleRun(String),

    #[error("claim not found: {0}")]
    ClaimNotFound(String),

    #[error("version conflict: expected {expected}, current is {current}")]
    VersionConflict { expected: u64, current: u64 },

    #[error("policy blocked: {0:?}")]
    PolicyBlocked(crate::claim::BlockReason),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cancelled")]
    Cancelled,

    #[error("collaborator call failed: {0}")]
    Collaborator(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// `true` for errors that must be swallowed silently rather than
    /// surfaced as a `claim.updated`/`pipeline.error` — see spec §7.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
