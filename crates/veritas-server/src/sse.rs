//! `GET /events` (spec §6): one SSE event per record, replaying history
//! on connect and then following the live broadcast. Subscribing before
//! fetching replay (per `StoreHandle::subscribe`'s own doc comment)
//! avoids a gap between the two calls; records already seen during
//! replay are skipped once the live feed starts to repeat them.

use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use futures::stream;
use futures::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use veritas_protocol::EventRecord;

use crate::state::AppState;

/// Replay on no `Last-Event-ID` (spec §6 "the last 25 if none").
const NO_HEADER_REPLAY_COUNT: usize = 25;

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers.get("last-event-id")?.to_str().ok()?.trim().parse().ok()
}

fn to_sse_event(record: EventRecord) -> Event {
    let name = record.body.name().to_string();
    let data = serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string());
    Event::default().id(record.seq.to_string()).event(name).data(data)
}

pub async fn events(State(state): State<AppState>, headers: HeaderMap) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = match state.runs.current() {
        Some(run) => {
            let live = run.store.subscribe().await;
            let replay = match last_event_id(&headers) {
                Some(last_seq) => run.store.history_since(last_seq).await,
                None => run.store.history_tail(NO_HEADER_REPLAY_COUNT).await,
            };
            let replayed_seqs: HashSet<u64> = replay.iter().map(|r| r.seq).collect();

            let replay_stream = stream::iter(replay.into_iter().map(|r| Ok(to_sse_event(r))));
            let live_stream = BroadcastStream::new(live).filter_map(move |result| {
                let replayed_seqs = replayed_seqs.clone();
                async move {
                    match result {
                        Ok(record) if !replayed_seqs.contains(&record.seq) => Some(Ok(to_sse_event(record))),
                        Ok(_) => None,
                        Err(_) => None,
                    }
                }
            });
            replay_stream.chain(live_stream).boxed()
        }
        None => stream::empty::<Result<Event, Infallible>>().boxed(),
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"))
}
