//! Reconnect backoff and attempt classification (spec §4.1), kept as
//! pure functions so the delay and classification math can be tested
//! without spawning anything.

use veritas_protocol::StopReason;

/// `min(ingestRetryMaxMs, ingestRetryBaseMs × 2^(attempt−1))`, the
/// pre-jitter backoff for `attempt` (1-indexed).
pub fn backoff_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(32);
    let scaled = base_ms.saturating_mul(1u64 << exponent);
    scaled.min(max_ms)
}

/// `min(500, max(80, backoff × 0.2))`, the exclusive upper bound for the
/// jitter sampled on top of `backoff_ms`.
pub fn jitter_bound_ms(backoff: u64) -> u64 {
    let scaled = (backoff as f64 * 0.2).round() as u64;
    scaled.clamp(80, 500)
}

/// `clamp(250, min(ingestRetryMaxMs, base × 2^(attempt−1)) + jitter)`
/// (spec §4.1 reconnect policy).
pub fn reconnect_delay_ms(attempt: u32, base_ms: u64, max_ms: u64, jitter: u64) -> u64 {
    (backoff_ms(attempt, base_ms, max_ms) + jitter).max(250)
}

/// Uniformly sample a jitter value in `[0, jitter_bound_ms(backoff))`.
pub fn sample_jitter(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let bound = jitter_bound_ms(backoff_ms(attempt, base_ms, max_ms));
    if bound == 0 {
        0
    } else {
        rand::random::<u64>() % bound
    }
}

/// The recorded outcome of one child process within an attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitRecord {
    fn is_clean(self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

/// Classify a finalized attempt into the stop-reason vocabulary the
/// reconnect machine reasons about (spec §4.1 "Classification of a
/// finalized attempt").
pub fn classify_attempt(
    had_process_error: bool,
    had_stall: bool,
    extractor_exit: Option<ExitRecord>,
    decoder_exit: Option<ExitRecord>,
) -> StopReason {
    if had_process_error || had_stall {
        return StopReason::ProcessError;
    }
    let both_clean = matches!(extractor_exit, Some(e) if e.is_clean())
        && matches!(decoder_exit, Some(e) if e.is_clean());
    if both_clean {
        StopReason::SourceEnded
    } else {
        StopReason::UpstreamExitNonzero
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        assert_eq!(backoff_ms(1, 1000, 15000), 1000);
        assert_eq!(backoff_ms(2, 1000, 15000), 2000);
        assert_eq!(backoff_ms(4, 1000, 15000), 8000);
        assert_eq!(backoff_ms(5, 1000, 15000), 15000);
        assert_eq!(backoff_ms(10, 1000, 15000), 15000);
    }

    #[test]
    fn jitter_bound_is_clamped() {
        assert_eq!(jitter_bound_ms(100), 80);
        assert_eq!(jitter_bound_ms(10_000), 500);
        assert_eq!(jitter_bound_ms(1000), 200);
    }

    #[test]
    fn reconnect_delay_never_below_250() {
        assert_eq!(reconnect_delay_ms(1, 1000, 15000, 0), 1000);
        assert_eq!(reconnect_delay_ms(1, 50, 15000, 0), 250);
    }

    #[test]
    fn attempt_one_delay_is_within_documented_range() {
        for _ in 0..50 {
            let jitter = sample_jitter(1, 1000, 15000);
            let delay = reconnect_delay_ms(1, 1000, 15000, jitter);
            assert!((250..=1700).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn process_error_or_stall_classifies_as_process_error() {
        assert_eq!(
            classify_attempt(true, false, None, None),
            StopReason::ProcessError
        );
        assert_eq!(
            classify_attempt(false, true, None, None),
            StopReason::ProcessError
        );
    }

    #[test]
    fn both_clean_exits_classify_as_source_ended() {
        let clean = ExitRecord { code: Some(0), signal: None };
        assert_eq!(
            classify_attempt(false, false, Some(clean), Some(clean)),
            StopReason::SourceEnded
        );
    }

    #[test]
    fn nonzero_exit_classifies_as_upstream_exit_nonzero() {
        let clean = ExitRecord { code: Some(0), signal: None };
        let dirty = ExitRecord { code: Some(1), signal: None };
        assert_eq!(
            classify_attempt(false, false, Some(clean), Some(dirty)),
            StopReason::UpstreamExitNonzero
        );
    }
}
