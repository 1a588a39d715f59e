//! Wraps a raw PCM byte run in a canonical WAV header.
//!
//! The transcription collaborator (spec §6) expects a self-describing
//! audio file per chunk rather than a bare PCM blob, so every chunk the
//! audio supervisor hands off gets one of these headers prepended before
//! it leaves the process.

const RIFF_HEADER_LEN: u32 = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    /// The canonical format every chunk in this pipeline uses: mono,
    /// 16 kHz, 16-bit little-endian PCM (spec §1).
    pub const CANONICAL: WavFormat = WavFormat {
        sample_rate: 16_000,
        channels: 1,
        bits_per_sample: 16,
    };
}

/// Prepend a 44-byte canonical WAV header to `pcm`, returning a new
/// buffer of length `pcm.len() + 44`.
pub fn wrap_pcm(pcm: &[u8], format: WavFormat) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let byte_rate =
        format.sample_rate * u32::from(format.channels) * u32::from(format.bits_per_sample) / 8;
    let block_align = format.channels * (format.bits_per_sample / 8);

    let mut out = Vec::with_capacity(pcm.len() + RIFF_HEADER_LEN as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(data_len + RIFF_HEADER_LEN - 8).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM format tag
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}

/// Convenience wrapper using [`WavFormat::CANONICAL`].
pub fn wrap_canonical(pcm: &[u8]) -> Vec<u8> {
    wrap_pcm(pcm, WavFormat::CANONICAL)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn header_declares_riff_wave_and_length() {
        let pcm = vec![0u8; 100];
        let wav = wrap_canonical(&pcm);
        assert_eq!(wav.len(), pcm.len() + 44);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
    }

    #[test]
    fn trailing_bytes_equal_input_pcm() {
        let pcm: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
        let wav = wrap_canonical(&pcm);
        assert_eq!(&wav[44..], pcm.as_slice());
    }

    #[test]
    fn declares_configured_sample_rate_channels_bit_depth() {
        let wav = wrap_canonical(&[0u8; 4]);
        let sample_rate = u32::from_le_bytes(wav[24..28].try_into().unwrap());
        let channels = u16::from_le_bytes(wav[22..24].try_into().unwrap());
        let bits = u16::from_le_bytes(wav[34..36].try_into().unwrap());
        assert_eq!(sample_rate, 16_000);
        assert_eq!(channels, 1);
        assert_eq!(bits, 16);
    }

    #[test]
    fn empty_pcm_still_produces_valid_header() {
        let wav = wrap_canonical(&[]);
        assert_eq!(wav.len(), 44);
        let riff_len = u32::from_le_bytes(wav[4..8].try_into().unwrap());
        assert_eq!(riff_len, 36);
    }
}
