//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod meter;
pub mod playback;

pub use buffer::{AudioFrame, RingBuffer};
pub use capture::CaptureStage;
pub use device::{get_input_device, get_output_device, AudioDevice};
pub use meter::VolumeMeter;
pub use playback::{AudioPlayback, PlaybackScheduler};
