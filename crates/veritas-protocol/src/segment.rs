use serde::Deserialize;
use serde::Serialize;

/// A flushed, sentence-aligned range of transcript text (spec §3
/// "TranscriptSegment").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub id: String,
    pub run_id: String,
    pub index: u64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub start_clock: String,
    pub end_clock: String,
    pub text: String,
}

/// Format a run-relative offset in seconds as a wall-clock `HH:MM:SS`
/// string, the representation every timestamp in the event stream uses.
pub fn seconds_to_clock(total_seconds: f64) -> String {
    let total = total_seconds.max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_formats_zero() {
        assert_eq!(seconds_to_clock(0.0), "00:00:00");
    }

    #[test]
    fn clock_formats_over_an_hour() {
        assert_eq!(seconds_to_clock(3725.0), "01:02:05");
    }

    #[test]
    fn clock_clamps_negative() {
        assert_eq!(seconds_to_clock(-4.0), "00:00:00");
    }
}
