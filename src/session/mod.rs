//! Session lifecycle and orchestration

pub mod controller;
pub mod state;

pub use controller::{SessionController, SessionHooks};
pub use state::SessionState;
