//! Wire audio codec: base64-encoded little-endian PCM16 frames.
//!
//! Outbound microphone frames are f32 samples in [-1, 1] converted to
//! PCM16 and base64-encoded; inbound model audio is the inverse. All
//! functions are pure; resampling is the playback subsystem's concern.

use crate::error::{AssistantError, Result};
use base64::{Engine, engine::general_purpose::STANDARD};

/// A decoded, playable audio fragment.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// f32 samples in [-1, 1], interleaved when multi-channel.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
}

impl AudioBuffer {
    /// Duration in seconds on this buffer's own clock.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.channels) / f64::from(self.sample_rate)
    }
}

/// Encode f32 samples as a base64 PCM16 payload.
///
/// Samples are clamped to [-1, 1] and scaled to i16, little-endian.
/// A zero-length input produces an empty payload.
#[must_use]
pub fn encode_frame(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    STANDARD.encode(&bytes)
}

/// Decode a base64 payload into raw bytes.
///
/// # Errors
///
/// Returns a decode error on malformed base64.
pub fn decode_frame(payload: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(payload)
        .map_err(|e| AssistantError::Decode(format!("invalid base64 payload: {e}")))
}

/// Interpret raw bytes as little-endian PCM16 and build a playable buffer
/// tagged with the given sample rate and channel count.
///
/// # Errors
///
/// Returns a decode error if the byte length is not a multiple of 2.
pub fn decode_to_buffer(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    if bytes.len() % 2 != 0 {
        return Err(AssistantError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32767.0)
        .collect();

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels,
    })
}
