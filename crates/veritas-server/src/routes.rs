//! Control-surface route handlers (spec §6). Every request/response body
//! uses the spec's camelCase wire contract; internal fields stay
//! snake_case per Rust convention.

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use veritas_protocol::Claim;
use veritas_protocol::ClaimTypeTag;
use veritas_protocol::PipelineError;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub youtube_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    pub expected_version: u64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderImageRequest {
    pub expected_version: u64,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub force_nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagOverrideRequest {
    pub expected_version: u64,
    pub tag: ClaimTypeTag,
    pub reason: String,
}

pub async fn start(State(state): State<AppState>, Json(body): Json<StartRequest>) -> Result<Response, ApiError> {
    let handle = state.runs.start(body.youtube_url)?;
    Ok(Response::new(StatusCode::ACCEPTED, json!({"ok": true, "runId": handle.run_id})))
}

pub async fn stop(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.runs.stop()?;
    Ok(Response::new(StatusCode::OK, json!({"ok": true, "running": false})))
}

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let running = state.runs.current().is_some();
    Json(json!({"ok": true, "running": running}))
}

pub async fn list_claims(State(state): State<AppState>) -> Json<Value> {
    match state.runs.current() {
        Some(run) => {
            let claims = run.store.list().await;
            Json(json!({"ok": true, "running": true, "runId": run.run_id, "claims": claims}))
        }
        None => Json(json!({"ok": true, "running": false, "runId": Value::Null, "claims": Vec::<Claim>::new()})),
    }
}

pub async fn get_claim(State(state): State<AppState>, Path(claim_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let run = state.runs.current().ok_or(PipelineError::NoActiveRun)?;
    let claim = run.store.get(&claim_id).await.ok_or_else(|| PipelineError::ClaimNotFound(claim_id))?;
    Ok(Json(json!({"ok": true, "claim": claim})))
}

pub async fn approve_output(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
    Json(body): Json<MutationRequest>,
) -> Result<Json<Value>, ApiError> {
    let run = state.runs.current().ok_or(PipelineError::NoActiveRun)?;
    let claim = run.approval.approve_output(&claim_id, body.expected_version).await?;
    Ok(Json(claim_response(&claim)))
}

pub async fn reject_output(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
    Json(body): Json<MutationRequest>,
) -> Result<Json<Value>, ApiError> {
    let run = state.runs.current().ok_or(PipelineError::NoActiveRun)?;
    let claim = run.approval.reject_output(&claim_id, body.expected_version).await?;
    Ok(Json(json!({"ok": true, "claim": claim})))
}

pub async fn generate_package(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
    Json(body): Json<MutationRequest>,
) -> Result<Json<Value>, ApiError> {
    let run = state.runs.current().ok_or(PipelineError::NoActiveRun)?;
    let claim = run.approval.generate_package(&claim_id, body.expected_version).await?;
    Ok(Json(claim_response(&claim)))
}

pub async fn render_image(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
    Json(body): Json<RenderImageRequest>,
) -> Result<Response, ApiError> {
    let run = state.runs.current().ok_or(PipelineError::NoActiveRun)?;
    let claim = run
        .approval
        .render_image(&claim_id, body.expected_version, body.force, body.force_nonce)
        .await?;
    Ok(Response::new(StatusCode::ACCEPTED, claim_response(&claim)))
}

pub async fn tag_override(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
    Json(body): Json<TagOverrideRequest>,
) -> Result<Json<Value>, ApiError> {
    let run = state.runs.current().ok_or(PipelineError::NoActiveRun)?;
    let claim = run.approval.tag_override(&claim_id, body.expected_version, body.tag, body.reason).await?;
    Ok(Json(json!({"ok": true, "claim": claim})))
}

/// `{ok, claim, package, renderJob}`, with `package`/`renderJob`
/// derived from the claim's own embedded package/render fields rather
/// than duplicated bookkeeping (the claim snapshot is the single source
/// of truth; see DESIGN.md).
fn claim_response(claim: &Claim) -> Value {
    json!({
        "ok": true,
        "claim": claim,
        "package": {
            "packageId": claim.output_package_id,
            "status": claim.output_package_status,
            "error": claim.output_package_error,
        },
        "renderJob": {
            "renderJobId": claim.render_job_id,
            "status": claim.render_status,
            "artifactUrl": claim.artifact_url,
            "error": claim.render_error,
        },
    })
}

/// A JSON body paired with a non-200 status code; `Json<Value>` alone
/// always answers 200, so mutation routes that succeed with `202`
/// (start, render-image) go through this instead.
pub struct Response {
    status: StatusCode,
    body: Value,
}

impl Response {
    fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }
}

impl axum::response::IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}
