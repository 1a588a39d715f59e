//! Run controller (spec §4.9, §5): the component that owns the single
//! active run for this host, wires the audio supervisor, transcript
//! assembler, claim detector and research scheduler together, and
//! exposes the start/stop/current surface the control-surface handlers
//! call. Everything downstream of `claim.detected` flows through the
//! claim store's own actor (see [`store_actor`]); this module's job is
//! ingestion -> transcription -> claim detection -> research enqueue.

pub mod approval;
pub mod store_actor;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;
use uuid::Uuid;
use veritas_audio::AudioSupervisor;
use veritas_audio::AudioSupervisorConfig;
use veritas_claimdetect::DedupeCache;
use veritas_claimdetect::DetectOptions;
use veritas_collab::ActivitySink;
use veritas_collab::PackageClient;
use veritas_collab::RenderClient;
use veritas_collab::TranscriptionClient;
use veritas_collab::TranscriptionOutcome;
use veritas_config::Config;
use veritas_evidence::EconomicClient;
use veritas_evidence::FactCheckClient;
use veritas_evidence::LegislativeClient;
use veritas_protocol::seconds_to_clock;
use veritas_protocol::Claim;
use veritas_protocol::ClaimCategory;
use veritas_protocol::ClaimMutation;
use veritas_protocol::EventBody;
use veritas_protocol::PcmChunk;
use veritas_protocol::PipelineError;
use veritas_research::ResearchClients;
use veritas_research::ResearchJob;
use veritas_research::ResearchScheduler;
use veritas_store::events;
use veritas_transcript::TranscriptAssembler;
use veritas_verifier::VerifierClient;

pub use approval::ApprovalServices;
pub use store_actor::RenderDecision;
pub use store_actor::StoreHandle;

/// How often the chunk-processing task checks the transcript
/// assembler's idle-flush timer (spec §4.2's four-second flush timeout
/// only needs to fire within a second or so of elapsing).
const ASSEMBLER_TICK: Duration = Duration::from_millis(500);

/// Front for the one active run a caller (the control surface) can
/// reach; cheap to clone, shares state with every clone.
#[derive(Clone)]
pub struct RunManager {
    inner: Arc<Mutex<Option<ActiveRun>>>,
    config: Arc<Config>,
}

struct ActiveRun {
    run_id: String,
    handle: RunHandle,
    cancel: CancellationToken,
}

/// Everything a control-surface handler needs for the currently active
/// run: the claim store front and the approval/export operations.
#[derive(Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub source_url: String,
    pub store: StoreHandle,
    pub approval: ApprovalServices,
}

impl RunManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self { inner: Arc::new(Mutex::new(None)), config }
    }

    /// The currently active run, if any.
    pub fn current(&self) -> Option<RunHandle> {
        self.lock().as_ref().map(|active| active.handle.clone())
    }

    /// Start ingesting `source_url` as the host's one active run (spec
    /// §5 "at most one active run per host"). Builds every collaborator
    /// and spawns the pipeline before racing to register itself, so two
    /// concurrent calls can never both become the active run.
    pub fn start(&self, source_url: String) -> Result<RunHandle, PipelineError> {
        if source_url.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("source_url must not be empty".to_string()));
        }

        let run_id = Uuid::new_v4().to_string();
        let store = StoreHandle::spawn(run_id.clone());
        let cancel = CancellationToken::new();
        let activity = ActivitySink::spawn(self.config.activity_sink_endpoint.clone());
        let package_client = Arc::new(PackageClient::new(self.config.package_endpoint.clone()));
        let render_client = Arc::new(RenderClient::new(
            self.config.render_endpoint.clone(),
            self.config.render_timeout_ms,
            self.config.render_max_attempts,
        ));
        let approval =
            ApprovalServices::new(run_id.clone(), store.clone(), package_client, render_client, activity);
        let handle = RunHandle { run_id: run_id.clone(), source_url: source_url.clone(), store: store.clone(), approval: approval.clone() };

        {
            let mut guard = self.lock();
            if guard.is_some() {
                cancel.cancel();
                return Err(PipelineError::InvalidRequest("a run is already active".to_string()));
            }
            *guard = Some(ActiveRun { run_id: run_id.clone(), handle: handle.clone(), cancel: cancel.clone() });
        }

        let manager = self.clone();
        let config = self.config.clone();
        let pipeline_run_id = run_id.clone();
        tokio::spawn(async move {
            run_pipeline(pipeline_run_id.clone(), source_url, config, store, cancel).await;
            manager.clear_if_current(&pipeline_run_id);
        });

        info!(run_id, "run started");
        Ok(handle)
    }

    /// Request cancellation of the active run. The run clears itself
    /// from the registry once its pipeline task observes the
    /// cancellation and finishes tearing down.
    pub fn stop(&self) -> Result<String, PipelineError> {
        match self.lock().as_ref() {
            Some(active) => {
                active.cancel.cancel();
                Ok(active.run_id.clone())
            }
            None => Err(PipelineError::NoActiveRun),
        }
    }

    fn clear_if_current(&self, run_id: &str) {
        let mut guard = self.lock();
        if guard.as_ref().map(|active| active.run_id.as_str()) == Some(run_id) {
            *guard = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run one ingest/transcribe/detect/research pipeline end to end, from
/// `pipeline.started` to `pipeline.stopped`. Returns once the audio
/// supervisor's attempt/reconnect loop has ended, either because the
/// source stopped or the run was cancelled.
async fn run_pipeline(run_id: String, source_url: String, config: Arc<Config>, store: StoreHandle, cancel: CancellationToken) {
    store
        .publish(events::pipeline_started(
            run_id.clone(),
            source_url.clone(),
            config.chunk_seconds,
            config.transcription_model.clone(),
        ))
        .await;

    let (event_tx, event_rx) = async_channel::unbounded::<EventBody>();
    let (chunk_tx, chunk_rx) = async_channel::unbounded::<PcmChunk>();
    let (mutation_tx, mutation_rx) = async_channel::unbounded::<ClaimMutation>();

    let research_clients = Arc::new(ResearchClients {
        fact_check: FactCheckClient::new(config.factcheck_api_key.clone()),
        economic: EconomicClient::new(config.fred_api_key.clone()),
        legislative: LegislativeClient::new(config.congress_api_key.clone()),
        verifier: VerifierClient::new(config.verifier_api_key.clone()),
    });
    let scheduler =
        ResearchScheduler::spawn(config.max_research_concurrency, research_clients, cancel.clone(), mutation_tx);

    let mutation_forwarder = {
        let store = store.clone();
        tokio::spawn(async move {
            while let Ok(mutation) = mutation_rx.recv().await {
                if let Err(err) = store.apply(mutation).await {
                    if !err.is_cancellation() {
                        warn!(error = %err, "failed to apply research mutation");
                    }
                }
            }
        })
    };

    let event_forwarder = {
        let store = store.clone();
        tokio::spawn(async move {
            while let Ok(body) = event_rx.recv().await {
                store.publish(body).await;
            }
        })
    };

    let chunk_task = spawn_chunk_task(run_id.clone(), config.clone(), store.clone(), chunk_rx, scheduler, cancel.clone());

    let supervisor_config = AudioSupervisorConfig {
        chunk_seconds: config.chunk_seconds,
        reconnect_enabled: config.ingest_reconnect_enabled,
        max_retries: config.ingest_max_retries,
        retry_base_ms: config.ingest_retry_base_ms,
        retry_max_ms: config.ingest_retry_max_ms,
        stall_timeout_ms: config.ingest_stall_timeout.as_millis() as u64,
        extractor_argv: config.extractor_argv.clone(),
        decoder_argv: config.decoder_argv.clone(),
    };
    let stop_reason =
        AudioSupervisor::new(supervisor_config).run(run_id.clone(), source_url, event_tx, chunk_tx, cancel).await;

    // Dropping the chunk/mutation senders above (they went out of scope
    // with the audio supervisor call) lets the forwarders drain and exit.
    let _ = chunk_task.await;
    let _ = mutation_forwarder.await;
    let _ = event_forwarder.await;

    store.publish(events::pipeline_stopped(run_id, format!("{stop_reason:?}"))).await;
}

/// Spawn the task that turns PCM chunks into transcript segments and
/// claim candidates: one chunk in flight at a time (spec §5 "at most
/// one transcription call in flight per run"), with an idle-flush timer
/// running alongside it.
fn spawn_chunk_task(
    run_id: String,
    config: Arc<Config>,
    store: StoreHandle,
    chunk_rx: async_channel::Receiver<PcmChunk>,
    scheduler: ResearchScheduler,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let transcription =
            TranscriptionClient::new(config.transcription_api_key.clone(), config.transcription_model.clone());
        let mut assembler = TranscriptAssembler::new(run_id.clone());
        let mut dedupe = DedupeCache::default();
        let mut next_claim_index: u64 = 0;
        let mut ticker = tokio::time::interval(ASSEMBLER_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                maybe_chunk = chunk_rx.recv() => {
                    let Ok(chunk) = maybe_chunk else { break };
                    handle_chunk(
                        &run_id,
                        &config,
                        &store,
                        &scheduler,
                        &transcription,
                        &mut assembler,
                        &mut dedupe,
                        &mut next_claim_index,
                        chunk,
                        &cancel,
                    )
                    .await;
                }
                _ = ticker.tick() => {
                    if let Some(segment) = assembler.tick(Instant::now()) {
                        store.publish(events::transcript_segment(segment)).await;
                    }
                }
            }
        }

        if let Some(segment) = assembler.force_flush() {
            store.publish(events::transcript_segment(segment)).await;
        }
    })
}

#[allow(clippy::too_many_arguments)]
async fn handle_chunk(
    run_id: &str,
    config: &Config,
    store: &StoreHandle,
    scheduler: &ResearchScheduler,
    transcription: &TranscriptionClient,
    assembler: &mut TranscriptAssembler,
    dedupe: &mut DedupeCache,
    next_claim_index: &mut u64,
    chunk: PcmChunk,
    cancel: &CancellationToken,
) {
    store
        .publish(events::audio_chunk(run_id.to_string(), chunk.chunk_index, chunk.start_sec, chunk.end_sec, chunk.pcm.len()))
        .await;

    let wav = veritas_wav::wrap_canonical(&chunk.pcm);
    let prior_context = assembler.prior_context().to_string();
    let prior_context = (!prior_context.is_empty()).then_some(prior_context.as_str());

    let outcome = match transcription.transcribe(wav, prior_context, cancel).await {
        Ok(TranscriptionOutcome::Text(text)) => text,
        Ok(TranscriptionOutcome::Blocked { reason }) => {
            store.publish(events::transcript_error(run_id.to_string(), format!("transcription blocked: {reason}"))).await;
            return;
        }
        Ok(TranscriptionOutcome::Error { message }) => {
            store.publish(events::transcript_error(run_id.to_string(), message)).await;
            return;
        }
        Err(err) => {
            if !err.is_cancellation() {
                store.publish(events::transcript_error(run_id.to_string(), err.to_string())).await;
            }
            return;
        }
    };

    let accepted = assembler.accept(&outcome, chunk.start_sec, chunk.end_sec);
    if let Some(segment) = accepted.segment {
        store.publish(events::transcript_segment(segment)).await;
    }
    if accepted.claim_sentences.is_empty() {
        return;
    }

    let text = accepted.claim_sentences.join(" ");
    let options = DetectOptions { chunk_start_sec: chunk.start_sec, threshold: config.claim_threshold };
    for candidate in veritas_claimdetect::detect(&text, options) {
        if !dedupe.accept(&candidate.text) {
            continue;
        }
        let claim = Claim::detected(
            Claim::make_id(run_id, *next_claim_index),
            run_id.to_string(),
            candidate.text,
            candidate.reasons,
            candidate.chunk_start_sec,
            seconds_to_clock(candidate.chunk_start_sec),
            candidate.category,
            candidate.tag,
            candidate.score,
        );
        *next_claim_index += 1;

        let job = ResearchJob {
            run_id: run_id.to_string(),
            claim_id: claim.id.clone(),
            claim_text: claim.text.clone(),
            claim_category: claim.claim_category,
        };

        if let Err(err) = store.apply(ClaimMutation::Detected { claim }).await {
            warn!(error = %err, "failed to record detected claim");
            continue;
        }
        if scheduler.enqueue(job).await.is_err() {
            warn!("research scheduler is no longer accepting jobs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starting_twice_without_stopping_is_rejected() {
        let manager = RunManager::new(Arc::new(Config::from_env()));
        let first = manager.start("https://example.com/live".to_string());
        assert!(first.is_ok());
        let second = manager.start("https://example.com/live".to_string());
        assert!(matches!(second, Err(PipelineError::InvalidRequest(_))));
        manager.stop().unwrap();
    }

    #[tokio::test]
    async fn stop_without_a_run_is_no_active_run() {
        let manager = RunManager::new(Arc::new(Config::from_env()));
        assert!(matches!(manager.stop(), Err(PipelineError::NoActiveRun)));
    }

    #[tokio::test]
    async fn empty_source_url_is_rejected() {
        let manager = RunManager::new(Arc::new(Config::from_env()));
        assert!(matches!(manager.start(String::new()), Err(PipelineError::InvalidRequest(_))));
    }
}
