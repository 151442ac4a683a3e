//! Bidirectional transport to the conversational backend
//!
//! The backend is consumed purely as a message stream: audio frames go up,
//! audio chunks and control events come down. The WebSocket implementation
//! lives in [`ws`]; the session wiring only depends on [`TransportLink`] and
//! the event stream, so tests can substitute an in-memory link.

pub mod message;
pub mod ws;

pub use message::{ClientMessage, ServerEvent};
pub use ws::WsTransport;

use crate::error::TransportError;

/// Downlink events delivered to the session.
#[derive(Debug)]
pub enum TransportEvent {
    /// Base64 PCM audio chunk from the backend
    Audio(String),
    /// The backend detected user speech; queued playback must be flushed
    Interrupted,
    /// Remote closed the session
    Closed,
    /// The transport failed mid-session; terminal, never retried here
    Error(TransportError),
}

/// Uplink half of a connected transport session.
pub trait TransportLink: Send + Sync + 'static {
    /// Fire-and-forget audio send; must never block capture.
    ///
    /// Calls made while the link is not streaming are dropped and counted
    /// (deliberate contract: drop-and-count, no backpressure to the caller).
    fn send_audio(&self, payload: String);

    /// Close the link. Idempotent.
    fn close(&self);

    /// Whether the link is accepting uplink audio.
    fn is_streaming(&self) -> bool;

    /// Frames dropped because the link was not streaming.
    fn dropped_frames(&self) -> u64;
}
