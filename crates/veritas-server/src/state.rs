use std::sync::Arc;

use veritas_config::Config;
use veritas_orchestrator::RunManager;

/// Shared application state handed to every route handler (see
/// `codex-core`'s own pattern of threading a single `Arc<Config>`
/// through its surfaces rather than re-reading the environment).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub runs: RunManager,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let runs = RunManager::new(config.clone());
        Self { config, runs }
    }
}
