//! # Voice Session Engine
//!
//! Full-duplex voice conversation engine: streams microphone audio to a
//! remote conversational backend while rendering the backend's speech as it
//! arrives, with gapless playback scheduling and barge-in interruption.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             UPLINK                               │
//! │  ┌────────────┐   ┌─────────────┐   ┌─────────┐   ┌───────────┐  │
//! │  │ Microphone │──▶│ CaptureStage│──▶│ PCM16   │──▶│ Transport │  │
//! │  │   (cpal)   │   │ 4096-sample │   │ encode  │   │   send    │──┼──▶ backend
//! │  └────────────┘   │   frames    │   │ +base64 │   └───────────┘  │
//! │                   └──────┬──────┘   └─────────┘                  │
//! │                          ▼                                       │
//! │                   ┌─────────────┐                                │
//! │                   │ VolumeMeter │──▶ on_volume hook              │
//! │                   └─────────────┘                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                            DOWNLINK                              │
//! │  ┌───────────┐   ┌─────────┐   ┌───────────────────┐  ┌───────┐  │
//! │  │ Transport │──▶│ PCM16   │──▶│ PlaybackScheduler │─▶│Speaker│  │
//! │  │  receive  │   │ decode  │   │ gapless timeline  │  │(cpal) │  │
//! │  └─────┬─────┘   └─────────┘   └───────────────────┘  └───────┘  │
//! │        │ "interrupted"                  ▲                        │
//! │        └──────────── flush ─────────────┘                        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`session::SessionController`] wires the stages together and owns the
//! session lifecycle state machine.

pub mod audio;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use session::{SessionController, SessionHooks, SessionState};


/// Engine-wide constants
pub mod constants {
    /// Sample rate of microphone capture (uplink)
    pub const INPUT_SAMPLE_RATE: u32 = 16_000;

    /// Sample rate of backend speech (downlink)
    pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

    /// Channel count; the engine is mono end to end
    pub const CHANNELS: u16 = 1;

    /// Samples per capture frame (256 ms at 16 kHz)
    pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

    /// Exponential smoothing factor for the volume meter
    pub const METER_SMOOTHING: f32 = 0.8;

    /// Capture-to-uplink ring buffer capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 64;

    /// How often the uplink task polls the capture ring buffer
    pub const UPLINK_POLL_INTERVAL_US: u64 = 500;
}
