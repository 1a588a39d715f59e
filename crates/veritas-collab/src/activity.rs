//! Activity sink collaborator (spec §6 "Collaborator: activity sink"):
//! a best-effort downstream log of everything happening in a run —
//! events, operator actions, run lifecycle, claim snapshots, package
//! and render-job updates. Batched and fire-and-forget; a sink outage
//! must never slow down or fail the pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

const FLUSH_INTERVAL: Duration = Duration::from_millis(500);
const MAX_BATCH: usize = 200;

/// One best-effort record handed to the sink. Callers pass whatever
/// JSON-shaped payload they already have (event body, claim snapshot,
/// package/render-job record) under a `kind` tag.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    pub kind: String,
    pub payload: serde_json::Value,
}

struct Inner {
    endpoint: Option<String>,
    http: reqwest::Client,
    queue: Mutex<Vec<ActivityRecord>>,
}

/// Spawns its own flush loop; drop the handle to stop it.
#[derive(Clone)]
pub struct ActivitySink {
    inner: Arc<Inner>,
}

impl ActivitySink {
    pub fn spawn(endpoint: Option<String>) -> Self {
        let inner = Arc::new(Inner { endpoint, http: reqwest::Client::new(), queue: Mutex::new(Vec::new()) });
        let sink = Self { inner: inner.clone() };
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                ticker.tick().await;
                Self::flush(&inner).await;
            }
        });
        sink
    }

    /// Enqueue a record for the next batch flush. Never blocks on I/O
    /// and never returns an error: a sink outage is invisible to
    /// callers by design.
    pub async fn record(&self, kind: impl Into<String>, payload: serde_json::Value) {
        if self.inner.endpoint.is_none() {
            return;
        }
        let mut queue = self.inner.queue.lock().await;
        if queue.len() >= MAX_BATCH * 4 {
            queue.remove(0);
        }
        queue.push(ActivityRecord { kind: kind.into(), payload });
    }

    async fn flush(inner: &Arc<Inner>) {
        let Some(endpoint) = inner.endpoint.as_deref() else { return };
        let batch = {
            let mut queue = inner.queue.lock().await;
            if queue.is_empty() {
                return;
            }
            let drain_to = queue.len().min(MAX_BATCH);
            queue.drain(..drain_to).collect::<Vec<_>>()
        };
        if let Err(err) = inner.http.post(endpoint).json(&batch).send().await {
            warn!(error = %err, batch_len = batch.len(), "activity sink flush failed, dropping batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn disabled_sink_never_queues() {
        let sink = ActivitySink::spawn(None);
        sink.record("event", json!({"seq": 1})).await;
        assert!(sink.inner.queue.lock().await.is_empty());
    }

    #[tokio::test]
    async fn enabled_sink_queues_until_flush() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let sink = ActivitySink::spawn(Some(server.uri()));
        sink.record("event", json!({"seq": 1})).await;
        assert_eq!(sink.inner.queue.lock().await.len(), 1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(sink.inner.queue.lock().await.is_empty());
    }
}
