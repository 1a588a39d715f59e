//! Environment-driven configuration, in the style of
//! `codex-core::flags` (`env_flags!`) rather than a TOML file.
//!
//! `.env` loading is explicitly out of scope (spec §1) — whatever
//! process starts this binary is expected to have the environment
//! already populated. Every tunable named in spec §6 gets one flag
//! here; [`Config::from_env`] snapshots them once at startup into a
//! plain struct that is then handed around as an `Arc` (Design Notes
//! §9 "shared-mutable global run state" calls for exactly this: avoid
//! re-reading env on every access).

use std::time::Duration;

use env_flags::env_flags;

env_flags! {
    /// External API keys. All optional: a missing key degrades the
    /// owning collaborator to its typed `error` state rather than
    /// failing the pipeline (spec §4.4/§4.5, Design Notes "Graceful
    /// degradation").
    pub VERITAS_TRANSCRIPTION_API_KEY: Option<&str> = None;
    pub VERITAS_VERIFIER_API_KEY: Option<&str> = None;
    pub VERITAS_FACTCHECK_API_KEY: Option<&str> = None;
    pub VERITAS_FRED_API_KEY: Option<&str> = None;
    pub VERITAS_CONGRESS_API_KEY: Option<&str> = None;

    pub VERITAS_TRANSCRIPTION_MODEL: &str = "whisper-1";

    /// Chunk duration in seconds, clamped to `[5,30]` (spec §4.1).
    pub VERITAS_CHUNK_SECONDS: u32 = 15;

    /// Bounded-concurrency limit for the research scheduler, clamped
    /// to `[1,10]` (spec §4.6).
    pub VERITAS_MAX_RESEARCH_CONCURRENCY: usize = 3;

    /// Claim-detector score threshold, clamped to `[0.55,0.9]` (spec §4.3).
    pub VERITAS_CLAIM_THRESHOLD: f64 = 0.62;

    pub VERITAS_INGEST_RECONNECT_ENABLED: bool = true;

    /// `0` means unlimited retries (spec §4.1 "reconnect policy").
    pub VERITAS_INGEST_MAX_RETRIES: u32 = 0;

    pub VERITAS_INGEST_RETRY_BASE_MS: u64 = 1_000;
    pub VERITAS_INGEST_RETRY_MAX_MS: u64 = 15_000;

    /// Clamped to `[1_000,300_000]` (spec §4.1).
    pub VERITAS_INGEST_STALL_TIMEOUT_MS: u64 = 45_000, |value| {
        value.parse().map(Duration::from_millis)
    };

    pub VERITAS_CONTROL_PASSWORD: Option<&str> = None;
    pub VERITAS_PROTECT_READ_ENDPOINTS: bool = false;
    pub VERITAS_RATE_LIMIT_PER_MINUTE: u32 = 60;

    pub VERITAS_RENDER_ENDPOINT: Option<&str> = None;
    pub VERITAS_RENDER_TIMEOUT_MS: u64 = 10_000;
    pub VERITAS_RENDER_MAX_ATTEMPTS: u32 = 3;

    pub VERITAS_PACKAGE_ENDPOINT: Option<&str> = None;
    pub VERITAS_ACTIVITY_SINK_ENDPOINT: Option<&str> = None;

    pub VERITAS_BIND_ADDR: &str = "0.0.0.0:8080";

    /// Stream-extractor argv, `{url}` substituted with the run's source
    /// URL (spec §4.1 "stream extractor"). Space-separated; an argument
    /// containing spaces is not supported since the teacher's own
    /// config layer has no shell-quoting parser.
    pub VERITAS_EXTRACTOR_ARGV: &str = "yt-dlp -q -o - -f bestaudio {url}";
    /// Decoder argv (spec §4.1 "decoder"): consumes the extractor's
    /// stdout and emits canonical 16 kHz mono 16-bit PCM on its stdout.
    pub VERITAS_DECODER_ARGV: &str =
        "ffmpeg -hide_banner -loglevel error -i pipe:0 -ar 16000 -ac 1 -f s16le -acodec pcm_s16le pipe:1";
}

/// Startup snapshot of every tunable in spec §6, read once and handed
/// around as an `Arc` (see `codex_core::config::Config`).
#[derive(Debug, Clone)]
pub struct Config {
    pub transcription_api_key: Option<String>,
    pub verifier_api_key: Option<String>,
    pub factcheck_api_key: Option<String>,
    pub fred_api_key: Option<String>,
    pub congress_api_key: Option<String>,
    pub transcription_model: String,

    pub chunk_seconds: u32,
    pub max_research_concurrency: usize,
    pub claim_threshold: f64,

    pub ingest_reconnect_enabled: bool,
    pub ingest_max_retries: u32,
    pub ingest_retry_base_ms: u64,
    pub ingest_retry_max_ms: u64,
    pub ingest_stall_timeout: Duration,

    pub control_password: Option<String>,
    pub protect_read_endpoints: bool,
    pub rate_limit_per_minute: u32,

    pub render_endpoint: Option<String>,
    pub render_timeout_ms: u64,
    pub render_max_attempts: u32,

    pub package_endpoint: Option<String>,
    pub activity_sink_endpoint: Option<String>,

    pub bind_addr: String,

    pub extractor_argv: Vec<String>,
    pub decoder_argv: Vec<String>,
}

fn split_argv(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// Clamp helper shared by every tunable with a documented range (spec
/// §4.1, §4.3, §4.6).
fn clamp_u32(value: u32, lo: u32, hi: u32) -> u32 {
    value.clamp(lo, hi)
}

fn clamp_usize(value: usize, lo: usize, hi: usize) -> usize {
    value.clamp(lo, hi)
}

fn clamp_f64(value: f64, lo: f64, hi: f64) -> f64 {
    value.clamp(lo, hi)
}

impl Config {
    /// Snapshot every flag above into a `Config`. Values outside their
    /// documented range are clamped rather than rejected, matching the
    /// teacher's preference for permissive runtime config over a hard
    /// startup failure on a bad env var.
    pub fn from_env() -> Self {
        let stall = *VERITAS_INGEST_STALL_TIMEOUT_MS;
        Self {
            transcription_api_key: VERITAS_TRANSCRIPTION_API_KEY.map(str::to_string),
            verifier_api_key: VERITAS_VERIFIER_API_KEY.map(str::to_string),
            factcheck_api_key: VERITAS_FACTCHECK_API_KEY.map(str::to_string),
            fred_api_key: VERITAS_FRED_API_KEY.map(str::to_string),
            congress_api_key: VERITAS_CONGRESS_API_KEY.map(str::to_string),
            transcription_model: VERITAS_TRANSCRIPTION_MODEL.to_string(),

            chunk_seconds: clamp_u32(*VERITAS_CHUNK_SECONDS, 5, 30),
            max_research_concurrency: clamp_usize(*VERITAS_MAX_RESEARCH_CONCURRENCY, 1, 10),
            claim_threshold: clamp_f64(*VERITAS_CLAIM_THRESHOLD, 0.55, 0.9),

            ingest_reconnect_enabled: *VERITAS_INGEST_RECONNECT_ENABLED,
            ingest_max_retries: *VERITAS_INGEST_MAX_RETRIES,
            ingest_retry_base_ms: *VERITAS_INGEST_RETRY_BASE_MS,
            ingest_retry_max_ms: *VERITAS_INGEST_RETRY_MAX_MS,
            ingest_stall_timeout: Duration::from_millis(
                stall.as_millis().clamp(1_000, 300_000) as u64
            ),

            control_password: VERITAS_CONTROL_PASSWORD.map(str::to_string),
            protect_read_endpoints: *VERITAS_PROTECT_READ_ENDPOINTS,
            rate_limit_per_minute: *VERITAS_RATE_LIMIT_PER_MINUTE,

            render_endpoint: VERITAS_RENDER_ENDPOINT.map(str::to_string),
            render_timeout_ms: *VERITAS_RENDER_TIMEOUT_MS,
            render_max_attempts: (*VERITAS_RENDER_MAX_ATTEMPTS).max(1),

            package_endpoint: VERITAS_PACKAGE_ENDPOINT.map(str::to_string),
            activity_sink_endpoint: VERITAS_ACTIVITY_SINK_ENDPOINT.map(str::to_string),

            bind_addr: VERITAS_BIND_ADDR.to_string(),

            extractor_argv: split_argv(&VERITAS_EXTRACTOR_ARGV),
            decoder_argv: split_argv(&VERITAS_DECODER_ARGV),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_within_documented_ranges() {
        let cfg = Config::from_env();
        assert!((5..=30).contains(&cfg.chunk_seconds));
        assert!((1..=10).contains(&cfg.max_research_concurrency));
        assert!((0.55..=0.9).contains(&cfg.claim_threshold));
        assert!(cfg.ingest_stall_timeout.as_millis() >= 1_000);
        assert!(cfg.ingest_stall_timeout.as_millis() <= 300_000);
    }

    #[test]
    fn extractor_argv_has_url_placeholder() {
        let cfg = Config::from_env();
        assert!(cfg.extractor_argv.iter().any(|a| a.contains("{url}")));
        assert!(!cfg.decoder_argv.is_empty());
    }

    #[test]
    fn clamp_helpers_saturate() {
        assert_eq!(clamp_u32(999, 5, 30), 30);
        assert_eq!(clamp_u32(1, 5, 30), 5);
        assert_eq!(clamp_usize(0, 1, 10), 1);
        assert_eq!(clamp_f64(1.5, 0.55, 0.9), 0.9);
    }
}
