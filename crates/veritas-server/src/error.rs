//! Maps [`PipelineError`] onto the status codes spec §7 assigns each
//! error kind, in a JSON envelope every route handler returns through.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde_json::json;
use veritas_protocol::BlockReason;
use veritas_protocol::PipelineError;

pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

/// Human-readable text for a policy block, keyed by reason (spec §6
/// "409 with a human-readable block message keyed by reason").
pub fn block_message(reason: BlockReason) -> &'static str {
    match reason {
        BlockReason::RejectedLocked => "claim was explicitly rejected and is locked against re-approval",
        BlockReason::StillResearching => "claim research has not finished yet",
        BlockReason::NotResearched => "claim has not been researched yet",
        BlockReason::ProviderDegraded => "one or more evidence providers returned a degraded state",
        BlockReason::InsufficientSources => "not enough independent sources to support approval",
        BlockReason::ConflictedSources => "sources disagree on the verdict",
        BlockReason::BelowThreshold => "confidence is below the policy threshold for this claim type",
        BlockReason::NotApproved => "claim output has not been approved",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            PipelineError::NoActiveRun => {
                (StatusCode::CONFLICT, json!({"ok": false, "error": "no run is currently active"}))
            }
            PipelineError::StaleRun(run_id) => (
                StatusCode::CONFLICT,
                json!({"ok": false, "error": format!("run {run_id} is no longer the active run")}),
            ),
            PipelineError::ClaimNotFound(id) => {
                (StatusCode::NOT_FOUND, json!({"ok": false, "error": format!("claim not found: {id}")}))
            }
            PipelineError::VersionConflict { expected, current } => (
                StatusCode::CONFLICT,
                json!({"ok": false, "error": "version conflict", "expectedVersion": expected, "currentVersion": current}),
            ),
            PipelineError::PolicyBlocked(reason) => (
                StatusCode::CONFLICT,
                json!({"ok": false, "error": block_message(*reason), "reason": reason}),
            ),
            PipelineError::InvalidRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({"ok": false, "error": message}))
            }
            PipelineError::Cancelled => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({"ok": false, "error": "cancelled"}))
            }
            PipelineError::Collaborator(message) => {
                (StatusCode::BAD_GATEWAY, json!({"ok": false, "error": message}))
            }
            PipelineError::Io(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({"ok": false, "error": err.to_string()}))
            }
            PipelineError::Json(err) => {
                (StatusCode::BAD_REQUEST, json!({"ok": false, "error": err.to_string()}))
            }
        };
        (status, Json(body)).into_response()
    }
}
