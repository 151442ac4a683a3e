//! Session lifecycle state machine
//!
//! `Idle → Connecting → Streaming ⇄ Interrupting → Closing → Closed`, with
//! `Error` reachable from every non-terminal state and leading only to
//! `Closed`. Errors are terminal: the session is never retried, the caller
//! must connect a fresh one.

use parking_lot::Mutex;

use crate::error::SessionError;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Interrupting,
    Closing,
    Closed,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Interrupting => "interrupting",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    fn allows(&self, next: SessionState) -> bool {
        use SessionState::*;

        // Error is reachable from any non-terminal state
        if next == Error {
            return !matches!(self, Closed | Error);
        }

        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Closing)
                | (Streaming, Interrupting)
                | (Streaming, Closing)
                | (Interrupting, Streaming)
                | (Interrupting, Closing)
                | (Closing, Closed)
                | (Error, Closed)
        )
    }
}

/// Shared, checked holder for the session state.
pub struct StateCell {
    state: Mutex<SessionState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
        }
    }

    pub fn get(&self) -> SessionState {
        *self.state.lock()
    }

    /// Apply a transition, rejecting anything the lifecycle does not allow.
    pub fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.lock();

        if !state.allows(next) {
            tracing::warn!(
                from = state.as_str(),
                to = next.as_str(),
                "Rejected session state transition"
            );
            return Err(SessionError::InvalidTransition {
                from: state.as_str(),
                to: next.as_str(),
            });
        }

        tracing::debug!(from = state.as_str(), to = next.as_str(), "Session state");
        *state = next;
        Ok(())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
