//! Binary entry point: wires the control surface (spec §6) on top of
//! the run controller. Tracing setup mirrors the teacher's own
//! `tracing_subscriber::fmt` + `EnvFilter` pattern; graceful shutdown
//! extends its `notify_on_sigint` idea to also catch `SIGTERM`, since a
//! long-lived service (unlike a CLI) is as likely to be stopped by an
//! orchestrator as by a terminal.

mod auth;
mod error;
mod rate_limit;
mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::routing::post;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use veritas_config::Config;

use crate::rate_limit::RateLimiter;
use crate::state::AppState;

/// Spec §7 "bad input ... oversized body > 1 MB returns 4xx".
const MAX_BODY_BYTES: usize = 1024 * 1024;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Resolves when either `SIGINT` or `SIGTERM` is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut term) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            return;
        };
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn control_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/start", post(routes::start))
        .route("/stop", post(routes::stop))
        .route("/claims/:id/approve-output", post(routes::approve_output))
        .route("/claims/:id/reject-output", post(routes::reject_output))
        .route("/claims/:id/generate-package", post(routes::generate_package))
        .route("/claims/:id/render-image", post(routes::render_image))
        .route("/claims/:id/tag-override", post(routes::tag_override))
        .layer(middleware::from_fn_with_state(state, auth::require_control_password))
}

fn read_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/claims", get(routes::list_claims))
        .route("/claims/:id", get(routes::get_claim))
        .route("/events", get(sse::events))
        .layer(middleware::from_fn_with_state(state, auth::require_control_password_if_reads_protected))
}

fn build_router(state: AppState, limiter: RateLimiter) -> Router {
    Router::new()
        .merge(control_routes(state.clone()))
        .merge(read_routes(state.clone()))
        .route("/healthz", get(routes::healthz))
        .layer(middleware::from_fn_with_state(limiter, rate_limit::rate_limit))
        .layer(CatchPanicLayer::new())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Arc::new(Config::from_env());
    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let rate_limiter = RateLimiter::new(config.rate_limit_per_minute);
    let state = AppState::new(config);

    let app = build_router(state, rate_limiter).into_make_service_with_connect_info::<SocketAddr>();

    info!(%bind_addr, "veritas-server listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}
