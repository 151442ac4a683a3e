//! Session configuration

use serde::Deserialize;
use std::path::Path;

use crate::constants::*;
use crate::error::Error;

/// Configuration for a voice session.
///
/// All fields except `endpoint` have working defaults; a session against a
/// standard backend only needs the WebSocket URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint of the conversational backend
    pub endpoint: String,

    /// Microphone sample rate in Hz
    pub input_sample_rate: u32,

    /// Backend speech sample rate in Hz
    pub output_sample_rate: u32,

    /// Samples per capture frame
    pub capture_frame_samples: usize,

    /// Exponential smoothing factor for volume updates (0..1)
    pub meter_smoothing: f32,

    /// Input device name, or None for the system default
    pub input_device: Option<String>,

    /// Output device name, or None for the system default
    pub output_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            capture_frame_samples: CAPTURE_FRAME_SAMPLES,
            meter_smoothing: METER_SMOOTHING,
            input_device: None,
            output_device: None,
        }
    }
}

impl SessionConfig {
    /// Create a config for the given endpoint with default audio settings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Parse a config from TOML.
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<(), Error> {
        if self.endpoint.is_empty() {
            return Err(Error::Config("endpoint must not be empty".into()));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".into()));
        }
        if self.capture_frame_samples == 0 {
            return Err(Error::Config("capture_frame_samples must be non-zero".into()));
        }
        if !(0.0..1.0).contains(&self.meter_smoothing) {
            return Err(Error::Config(format!(
                "meter_smoothing must be in [0, 1): {}",
                self.meter_smoothing
            )));
        }
        Ok(())
    }

    /// MIME type advertised for uplink audio payloads.
    pub fn uplink_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.input_sample_rate)
    }
}
