//! Wire message types
//!
//! JSON messages tagged by `type`. Uplink audio advertises its PCM format
//! through `mimeType`; downlink audio is base64 PCM at the session's output
//! rate.

use serde::{Deserialize, Serialize};

/// Messages sent to the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One captured audio frame
    Audio {
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Base64 PCM16-LE payload
        data: String,
    },
}

/// Events received from the backend.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// One chunk of backend speech
    Audio { data: String },
    /// User barge-in detected; stop queued playback
    Interrupted,
    /// Session ended normally
    Closed,
    /// Session ended with a backend-side error
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}
