//! Engine state machine
//!
//! ```text
//! Uninitialized            (construction failed, terminal)
//!
//! Ready ──run()/start()──► Running ◄──resume()── Paused
//!   ▲                         │   ──pause()──►
//!   │                         ▼
//!   └──────run()/start()── Stopped
//! ```

use std::fmt;

/// Dispatch engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Construction failed; every operation returns `NotInitialized`
    Uninitialized,
    /// Transport attached, no dispatch loop running
    Ready,
    /// A dispatch loop is delivering frames
    Running,
    /// A dispatch loop is running but only queueing frames
    Paused,
    /// The dispatch loop exited after `stop()`
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Ready => "ready",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::Stopped => "stopped",
        }
    }

    /// Whether a dispatch loop currently owns the transport
    pub fn is_running(&self) -> bool {
        matches!(self, EngineState::Running | EngineState::Paused)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
