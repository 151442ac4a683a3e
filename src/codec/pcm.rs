//! PCM16-LE ⇄ f32 conversion with base64 framing
//!
//! Encoding maps each float sample in [-1.0, 1.0] to `round(sample * 32767)`
//! clamped to the i16 range, serialized little-endian, then base64. Decoding
//! is the exact inverse (divide by 32768.0), so a round trip reproduces the
//! input to within one quantization step per sample.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::buffer::AudioFrame;
use crate::error::CodecError;

/// Encodes captured frames into base64 PCM16-LE payloads.
pub struct PcmEncoder {
    /// Frames encoded
    frames_encoded: u64,
    /// Raw PCM bytes produced (before base64)
    bytes_produced: u64,
}

impl PcmEncoder {
    pub fn new() -> Self {
        Self {
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode a frame to raw PCM16-LE bytes.
    pub fn encode_pcm(&mut self, frame: &AudioFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(frame.samples.len() * 2);
        for &sample in &frame.samples {
            let quantized = (sample * 32767.0)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            buf.put_i16_le(quantized);
        }

        self.frames_encoded += 1;
        self.bytes_produced += buf.len() as u64;

        buf.freeze()
    }

    /// Encode a frame to a base64 payload for text-safe transports.
    pub fn encode(&mut self, frame: &AudioFrame) -> String {
        BASE64.encode(self.encode_pcm(frame))
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }
}

impl Default for PcmEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes base64 PCM16-LE payloads into frames at a fixed sample rate.
pub struct PcmDecoder {
    sample_rate: u32,
    /// Frames decoded
    frames_decoded: u64,
    /// Chunks rejected as corrupt
    chunks_dropped: u64,
}

impl PcmDecoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_decoded: 0,
            chunks_dropped: 0,
        }
    }

    /// Decode a base64 payload into a frame.
    ///
    /// Invalid base64 and odd byte counts are `CorruptAudioData`; the caller
    /// drops the chunk and continues, it is never retried.
    pub fn decode(&mut self, payload: &str) -> Result<AudioFrame, CodecError> {
        let bytes = BASE64.decode(payload).map_err(|e| {
            self.chunks_dropped += 1;
            CodecError::CorruptAudioData(format!("invalid base64: {e}"))
        })?;
        self.decode_pcm(&bytes)
    }

    /// Decode raw PCM16-LE bytes into a frame.
    pub fn decode_pcm(&mut self, bytes: &[u8]) -> Result<AudioFrame, CodecError> {
        if bytes.len() % 2 != 0 {
            self.chunks_dropped += 1;
            return Err(CodecError::CorruptAudioData(format!(
                "odd byte length: {}",
                bytes.len()
            )));
        }

        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();

        self.frames_decoded += 1;
        Ok(AudioFrame::new(samples, self.sample_rate))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn chunks_dropped(&self) -> u64 {
        self.chunks_dropped
    }
}
