//! Audio supervisor (spec §4.1): drives a stream-extractor/decoder
//! subprocess pair, slices their combined output into canonical PCM
//! chunks, and owns the reconnect and stall-watchdog machinery. Modeled
//! on the teacher's child-process handling (piped stdio,
//! `kill_on_drop`, a `tokio::select!` over read/wait/cancel) but spread
//! across an attempt loop instead of a single run-to-completion call.

pub mod backoff;
pub mod chunker;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use veritas_protocol::EventBody;
use veritas_protocol::PcmChunk;
use veritas_protocol::StopReason;

use crate::backoff::ExitRecord;
use crate::chunker::ChunkSlicer;

const WATCHDOG_TICK: Duration = Duration::from_secs(2);
const CLOSE_WAIT: Duration = Duration::from_millis(1_500);
const TEARDOWN_ESCALATE_AFTER: Duration = Duration::from_millis(2_000);
const READ_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct AudioSupervisorConfig {
    pub chunk_seconds: u32,
    pub reconnect_enabled: bool,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub stall_timeout_ms: u64,
    pub extractor_argv: Vec<String>,
    pub decoder_argv: Vec<String>,
}

impl AudioSupervisorConfig {
    fn stall_timeout(&self) -> u64 {
        self.stall_timeout_ms.clamp(1_000, 300_000)
    }
}

pub struct AudioSupervisor {
    config: AudioSupervisorConfig,
}

enum AttemptOutcome {
    Cancelled,
    SpawnFailed,
    Finished { classification: StopReason, saw_first_byte: bool },
}

impl AudioSupervisor {
    pub fn new(config: AudioSupervisorConfig) -> Self {
        Self { config }
    }

    /// Run the full attempt/reconnect loop until the run stops, either
    /// manually (cancellation) or terminally (spawn failure or
    /// exhausted retries). Returns the reason the run ended.
    pub async fn run(
        &self,
        run_id: String,
        source_url: String,
        events: async_channel::Sender<EventBody>,
        chunks: async_channel::Sender<PcmChunk>,
        cancel: CancellationToken,
    ) -> StopReason {
        let mut slicer = ChunkSlicer::new(run_id.clone(), self.config.chunk_seconds);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return StopReason::Manual;
            }
            slicer.reset();

            let outcome = self
                .run_attempt(&run_id, &source_url, attempt > 0, &mut slicer, &events, &chunks, &cancel)
                .await;

            match outcome {
                AttemptOutcome::Cancelled => return StopReason::Manual,
                AttemptOutcome::SpawnFailed => {
                    let _ = events
                        .send(veritas_store_events::pipeline_error(
                            run_id.clone(),
                            "failed to spawn audio ingest pipeline".to_string(),
                        ))
                        .await;
                    return StopReason::SpawnFailed;
                }
                AttemptOutcome::Finished { classification, saw_first_byte } => {
                    if saw_first_byte {
                        attempt = 0;
                    }
                    if !self.config.reconnect_enabled {
                        return classification;
                    }
                    attempt += 1;
                    if self.config.max_retries > 0 && attempt > self.config.max_retries {
                        return StopReason::ReconnectExhausted;
                    }
                    let jitter =
                        backoff::sample_jitter(attempt, self.config.retry_base_ms, self.config.retry_max_ms);
                    let delay =
                        backoff::reconnect_delay_ms(attempt, self.config.retry_base_ms, self.config.retry_max_ms, jitter);
                    let _ = events
                        .send(veritas_store_events::reconnect_scheduled(run_id.clone(), attempt, delay))
                        .await;
                    tokio::select! {
                        _ = cancel.cancelled() => return StopReason::Manual,
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                    let _ = events
                        .send(veritas_store_events::reconnect_started(run_id.clone(), attempt))
                        .await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        run_id: &str,
        source_url: &str,
        is_reconnect: bool,
        slicer: &mut ChunkSlicer,
        events: &async_channel::Sender<EventBody>,
        chunks: &async_channel::Sender<PcmChunk>,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let extractor_argv = substitute_url(&self.config.extractor_argv, source_url);
        let mut extractor = match spawn_piped(&extractor_argv, None) {
            Ok(child) => child,
            Err(err) => {
                warn!(error = %err, "failed to spawn stream extractor");
                return AttemptOutcome::SpawnFailed;
            }
        };
        let extractor_stdout = match extractor.stdout.take() {
            Some(s) => s,
            None => return AttemptOutcome::SpawnFailed,
        };

        let mut decoder = match spawn_piped(&self.config.decoder_argv, Some(extractor_stdout)) {
            Ok(child) => child,
            Err(err) => {
                warn!(error = %err, "failed to spawn decoder");
                let _ = extractor.start_kill();
                return AttemptOutcome::SpawnFailed;
            }
        };
        let mut decoder_stdout = match decoder.stdout.take() {
            Some(s) => s,
            None => return AttemptOutcome::SpawnFailed,
        };

        let mut last_byte_at = Instant::now();
        let mut saw_first_byte = false;
        let mut had_process_error = false;
        let mut had_stall = false;
        let mut extractor_exit: Option<ExitRecord> = None;
        let mut decoder_exit: Option<ExitRecord> = None;

        let mut watchdog = tokio::time::interval(WATCHDOG_TICK);
        let mut read_buf = vec![0u8; READ_BUF_SIZE];

        let classification = 'attempt: loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    teardown(&mut extractor, &mut decoder).await;
                    return AttemptOutcome::Cancelled;
                }

                read_result = decoder_stdout.read(&mut read_buf) => {
                    match read_result {
                        Ok(0) => {
                            // decoder stdout closed; wait for exits below.
                        }
                        Ok(n) => {
                            last_byte_at = Instant::now();
                            if is_reconnect && !saw_first_byte {
                                saw_first_byte = true;
                                let _ = events.send(veritas_store_events::reconnect_succeeded(run_id.to_string())).await;
                            }
                            for chunk in slicer.push(&read_buf[..n]) {
                                let _ = events.send(veritas_store_events::audio_chunk(
                                    run_id.to_string(),
                                    chunk.chunk_index,
                                    chunk.start_sec,
                                    chunk.end_sec,
                                    chunk.pcm.len(),
                                )).await;
                                let _ = chunks.send(chunk).await;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "decoder read error");
                            had_process_error = true;
                            teardown(&mut extractor, &mut decoder).await;
                            break 'attempt backoff::classify_attempt(true, had_stall, extractor_exit, decoder_exit);
                        }
                    }
                }

                status = extractor.wait(), if extractor_exit.is_none() => {
                    extractor_exit = Some(exit_record(status));
                    if extractor_exit.is_some() && decoder_exit.is_some() {
                        break 'attempt backoff::classify_attempt(had_process_error, had_stall, extractor_exit, decoder_exit);
                    }
                }

                status = decoder.wait(), if decoder_exit.is_none() => {
                    decoder_exit = Some(exit_record(status));
                    if extractor_exit.is_some() {
                        break 'attempt backoff::classify_attempt(had_process_error, had_stall, extractor_exit, decoder_exit);
                    }
                    // Give the extractor CLOSE_WAIT_MS to also close before finalizing.
                    tokio::select! {
                        _ = tokio::time::sleep(CLOSE_WAIT) => {
                            let _ = extractor.start_kill();
                            break 'attempt backoff::classify_attempt(had_process_error, had_stall, extractor_exit, decoder_exit);
                        }
                        status = extractor.wait() => {
                            extractor_exit = Some(exit_record(status));
                            break 'attempt backoff::classify_attempt(had_process_error, had_stall, extractor_exit, decoder_exit);
                        }
                    }
                }

                _ = watchdog.tick() => {
                    let idle_ms = last_byte_at.elapsed().as_millis() as u64;
                    if idle_ms >= self.config.stall_timeout() {
                        had_stall = true;
                        let _ = events.send(veritas_store_events::ingest_stalled(run_id.to_string(), idle_ms)).await;
                        teardown(&mut extractor, &mut decoder).await;
                        break 'attempt backoff::classify_attempt(had_process_error, true, extractor_exit, decoder_exit);
                    }
                }
            }
        };

        AttemptOutcome::Finished { classification, saw_first_byte }
    }
}

fn substitute_url(argv: &[String], url: &str) -> Vec<String> {
    argv.iter().map(|arg| arg.replace("{url}", url)).collect()
}

fn spawn_piped(argv: &[String], stdin_from: Option<tokio::process::ChildStdout>) -> std::io::Result<Child> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        std::io::Error::other("empty command")
    })?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::null());
    match stdin_from {
        Some(stdout) => {
            let stdio: Stdio = stdout
                .try_into()
                .map_err(|_| std::io::Error::other("failed to pipe extractor stdout into decoder stdin"))?;
            cmd.stdin(stdio);
        }
        None => {
            cmd.stdin(Stdio::null());
        }
    }
    cmd.kill_on_drop(true).spawn()
}

fn exit_record(status: std::io::Result<std::process::ExitStatus>) -> ExitRecord {
    match status {
        Ok(status) => ExitRecord {
            code: status.code(),
            #[cfg(unix)]
            signal: status.signal(),
            #[cfg(not(unix))]
            signal: None,
        },
        Err(_) => ExitRecord { code: None, signal: None },
    }
}

async fn teardown(extractor: &mut Child, decoder: &mut Child) {
    let _ = extractor.start_kill();
    let _ = decoder.start_kill();
    tokio::select! {
        _ = tokio::time::sleep(TEARDOWN_ESCALATE_AFTER) => {
            let _ = extractor.kill().await;
            let _ = decoder.kill().await;
        }
        _ = async {
            let _ = extractor.wait().await;
            let _ = decoder.wait().await;
        } => {}
    }
}

/// Thin re-export so `run()` can build events without this crate
/// depending on `veritas-store` for its event-constructor helpers
/// (would be a cycle: store depends on policy, not audio). Mirrors the
/// constructors in `veritas_store::events` exactly.
mod veritas_store_events {
    use veritas_protocol::AudioChunkEvent;
    use veritas_protocol::EventBody;
    use veritas_protocol::PipelineErrorEvent;
    use veritas_protocol::PipelineIngestStalled;
    use veritas_protocol::PipelineReconnectScheduled;
    use veritas_protocol::PipelineReconnectStarted;
    use veritas_protocol::PipelineReconnectSucceeded;

    pub fn pipeline_error(run_id: String, message: String) -> EventBody {
        EventBody::PipelineError(PipelineErrorEvent { run_id, message })
    }

    pub fn reconnect_scheduled(run_id: String, attempt: u32, delay_ms: u64) -> EventBody {
        EventBody::PipelineReconnectScheduled(PipelineReconnectScheduled { run_id, attempt, delay_ms })
    }

    pub fn reconnect_started(run_id: String, attempt: u32) -> EventBody {
        EventBody::PipelineReconnectStarted(PipelineReconnectStarted { run_id, attempt })
    }

    pub fn reconnect_succeeded(run_id: String) -> EventBody {
        EventBody::PipelineReconnectSucceeded(PipelineReconnectSucceeded { run_id })
    }

    pub fn ingest_stalled(run_id: String, idle_ms: u64) -> EventBody {
        EventBody::PipelineIngestStalled(PipelineIngestStalled { run_id, idle_ms })
    }

    pub fn audio_chunk(run_id: String, chunk_index: u64, start_sec: f64, end_sec: f64, byte_len: usize) -> EventBody {
        EventBody::AudioChunk(AudioChunkEvent { run_id, chunk_index, start_sec, end_sec, byte_len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_url_replaces_placeholder() {
        let argv = vec!["yt-dlp".to_string(), "-o".to_string(), "-".to_string(), "{url}".to_string()];
        let substituted = substitute_url(&argv, "https://example.com/stream");
        assert_eq!(substituted.last().unwrap(), "https://example.com/stream");
    }

    #[test]
    fn stall_timeout_is_clamped_to_documented_range() {
        let config = AudioSupervisorConfig {
            chunk_seconds: 15,
            reconnect_enabled: true,
            max_retries: 0,
            retry_base_ms: 1000,
            retry_max_ms: 15000,
            stall_timeout_ms: 10,
            extractor_argv: vec!["true".to_string()],
            decoder_argv: vec!["true".to_string()],
        };
        assert_eq!(config.stall_timeout(), 1_000);

        let config = AudioSupervisorConfig { stall_timeout_ms: 10_000_000, ..config };
        assert_eq!(config.stall_timeout(), 300_000);
    }
}
