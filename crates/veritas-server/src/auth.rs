//! Control-password auth (spec §6): a header or query-parameter secret
//! checked by constant-time comparison, with two protection tiers
//! (control endpoints always; read endpoints only when
//! `protectReadEndpoints` is set).

use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::state::AppState;

const HEADER_NAME: &str = "x-veritas-control-password";
const QUERY_PARAM: &str = "password";

fn matches(configured: &str, supplied: &str) -> bool {
    configured.as_bytes().ct_eq(supplied.as_bytes()).into()
}

fn extract_supplied(request: &Request) -> Option<String> {
    if let Some(header) = request.headers().get(HEADER_NAME).and_then(|v| v.to_str().ok()) {
        return Some(header.to_string());
    }
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"ok": false, "error": "invalid or missing control password"})))
        .into_response()
}

/// Require the configured control password on every request this layer
/// wraps. A no-op when no password is configured.
pub async fn require_control_password(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(configured) = state.config.control_password.as_deref() else {
        return next.run(request).await;
    };
    match extract_supplied(&request) {
        Some(supplied) if matches(configured, &supplied) => next.run(request).await,
        _ => unauthorized(),
    }
}

/// Same check, applied only when `VERITAS_PROTECT_READ_ENDPOINTS` is set.
pub async fn require_control_password_if_reads_protected(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.protect_read_endpoints {
        return next.run(request).await;
    }
    require_control_password(State(state), request, next).await
}
