//! Error types for the voice session engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
///
/// Device errors are fatal to the session and never retried; the caller
/// must start a new session after fixing the device situation.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),
}

/// Codec errors
///
/// `CorruptAudioData` is recovered locally: the offending chunk is dropped
/// and the session continues.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Corrupt audio data: {0}")]
    CorruptAudioData(String),
}

/// Transport errors
///
/// None of these are retried automatically; recovery is caller-driven via a
/// fresh `connect()`.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Remote error: {0}")]
    Remote(String),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;
