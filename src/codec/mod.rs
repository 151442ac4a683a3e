//! PCM16 wire codec
//!
//! The backend speaks 16-bit little-endian PCM wrapped in base64 for
//! text-safe transport; this module converts between that wire format and
//! the engine's normalized f32 frames.

pub mod pcm;

pub use pcm::{PcmDecoder, PcmEncoder};
