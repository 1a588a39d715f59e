//! PCM chunk slicing (spec §4.1 "Chunking").

use bytes::Bytes;
use veritas_protocol::PcmChunk;

const SAMPLE_RATE: usize = 16_000;
const BYTES_PER_SAMPLE: usize = 2;

/// Clamp applied to the configured `chunkSeconds` (spec §4.1).
pub const CHUNK_SECONDS_RANGE: std::ops::RangeInclusive<u32> = 5..=30;

pub struct ChunkSlicer {
    run_id: String,
    buffer: Vec<u8>,
    chunk_bytes: usize,
    chunk_seconds: u32,
    next_index: u64,
}

impl ChunkSlicer {
    pub fn new(run_id: String, chunk_seconds: u32) -> Self {
        let chunk_seconds = chunk_seconds.clamp(*CHUNK_SECONDS_RANGE.start(), *CHUNK_SECONDS_RANGE.end());
        Self {
            run_id,
            buffer: Vec::new(),
            chunk_bytes: chunk_seconds as usize * SAMPLE_RATE * BYTES_PER_SAMPLE,
            chunk_seconds,
            next_index: 0,
        }
    }

    /// Append freshly decoded bytes and slice off as many complete
    /// chunks as the buffer now holds, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<PcmChunk> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();
        while self.buffer.len() >= self.chunk_bytes {
            let tail = self.buffer.split_off(self.chunk_bytes);
            let pcm = std::mem::replace(&mut self.buffer, tail);
            let chunk_index = self.next_index;
            self.next_index += 1;
            let start_sec = chunk_index as f64 * self.chunk_seconds as f64;
            chunks.push(PcmChunk {
                run_id: self.run_id.clone(),
                chunk_index,
                start_sec,
                end_sec: start_sec + self.chunk_seconds as f64,
                pcm: Bytes::from(pcm),
            });
        }
        chunks
    }

    /// Clear the buffer and restart chunk indexing from 0 — called at
    /// the start of every attempt, including reconnects (spec §4.1
    /// "startIngestAttempt clears the PCM buffer").
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.next_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_exact_multiples_of_chunk_bytes() {
        let mut slicer = ChunkSlicer::new("run-1".to_string(), 5);
        let chunk_bytes = 5 * SAMPLE_RATE * BYTES_PER_SAMPLE;
        let chunks = slicer.push(&vec![0u8; chunk_bytes * 2]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[0].start_sec, 0.0);
        assert_eq!(chunks[1].start_sec, 5.0);
        assert_eq!(chunks[1].end_sec, 10.0);
    }

    #[test]
    fn leftover_partial_bytes_stay_buffered() {
        let mut slicer = ChunkSlicer::new("run-1".to_string(), 5);
        let chunk_bytes = 5 * SAMPLE_RATE * BYTES_PER_SAMPLE;
        let chunks = slicer.push(&vec![0u8; chunk_bytes + 10]);
        assert_eq!(chunks.len(), 1);
        let more = slicer.push(&vec![0u8; chunk_bytes - 10]);
        assert_eq!(more.len(), 1);
        assert_eq!(more[0].chunk_index, 1);
    }

    #[test]
    fn reset_clears_buffer_and_restarts_index() {
        let mut slicer = ChunkSlicer::new("run-1".to_string(), 5);
        let chunk_bytes = 5 * SAMPLE_RATE * BYTES_PER_SAMPLE;
        slicer.push(&vec![0u8; chunk_bytes]);
        slicer.reset();
        let chunks = slicer.push(&vec![0u8; chunk_bytes]);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn chunk_seconds_is_clamped_to_documented_range() {
        let slicer = ChunkSlicer::new("run-1".to_string(), 1);
        assert_eq!(slicer.chunk_seconds, 5);
        let slicer = ChunkSlicer::new("run-1".to_string(), 100);
        assert_eq!(slicer.chunk_seconds, 30);
    }
}
