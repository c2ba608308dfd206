//! Audio codec utilities: PCM16 ↔ transport text, raw bytes → playable buffers
//!
//! All functions here are pure. Malformed transport text and sample-misaligned
//! byte buffers fail with `SessionError::Codec`; nothing else can fail.

use crate::error::{SessionError, SessionResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rodio::buffer::SamplesBuffer;

/// Encode little-endian PCM16 samples as transport text (base64).
pub fn encode_for_transport(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    B64.encode(&bytes)
}

/// Decode transport text back to raw bytes.
pub fn decode_from_transport(text: &str) -> SessionResult<Vec<u8>> {
    B64.decode(text)
        .map_err(|e| SessionError::Codec(format!("invalid transport text: {}", e)))
}

/// Reinterpret raw bytes as little-endian PCM16 samples.
///
/// Fails when the byte length is not aligned to the 2-byte sample width.
pub fn bytes_to_pcm16(bytes: &[u8]) -> SessionResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(SessionError::Codec(format!(
            "byte length {} not aligned to sample width",
            bytes.len()
        )));
    }
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        samples.push(i16::from_le_bytes([chunk[0], chunk[1]]));
    }
    Ok(samples)
}

/// Build a playable buffer from raw PCM16 bytes at the given rate/channel count.
pub fn to_playable(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> SessionResult<SamplesBuffer<i16>> {
    let samples = bytes_to_pcm16(bytes)?;
    Ok(SamplesBuffer::new(channels, sample_rate, samples))
}

/// Duration in seconds of a PCM16 sample count at the given rate/channel count.
pub fn pcm16_duration_secs(sample_count: usize, sample_rate: u32, channels: u16) -> f64 {
    sample_count as f64 / (sample_rate as f64 * channels as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_round_trip() {
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN, 12345];
        let text = encode_for_transport(&samples);
        let bytes = decode_from_transport(&text).unwrap();
        assert_eq!(bytes_to_pcm16(&bytes).unwrap(), samples);
    }

    #[test]
    fn malformed_transport_text_is_codec_error() {
        let result = decode_from_transport("not!!valid@@base64");
        assert!(matches!(result, Err(SessionError::Codec(_))));
    }

    #[test]
    fn misaligned_bytes_are_codec_error() {
        let result = bytes_to_pcm16(&[0x01, 0x02, 0x03]);
        assert!(matches!(result, Err(SessionError::Codec(_))));
    }

    #[test]
    fn playable_buffer_carries_format_and_length() {
        use rodio::Source;
        use std::time::Duration;

        // 24000 mono samples at 24kHz: a one-second buffer.
        let samples: Vec<i16> = vec![100; 24_000];
        let text = encode_for_transport(&samples);
        let bytes = decode_from_transport(&text).unwrap();

        let buffer = to_playable(&bytes, 24_000, 1).unwrap();
        assert_eq!(buffer.channels(), 1);
        assert_eq!(buffer.sample_rate(), 24_000);
        assert_eq!(buffer.total_duration(), Some(Duration::from_secs(1)));
        assert_eq!(buffer.count(), 24_000);
    }

    #[test]
    fn playable_rejects_misaligned_bytes() {
        let result = to_playable(&[0xAA], 24_000, 1);
        assert!(matches!(result, Err(SessionError::Codec(_))));
    }

    #[test]
    fn duration_accounts_for_channels() {
        // 24000 mono samples at 24kHz is one second
        assert_eq!(pcm16_duration_secs(24_000, 24_000, 1), 1.0);
        // the same count in stereo is half a second
        assert_eq!(pcm16_duration_secs(24_000, 24_000, 2), 0.5);
    }
}
