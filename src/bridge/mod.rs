//! Callback bridge
//!
//! Every user callback runs through [`CallbackBridge::invoke`]:
//!
//! ```text
//! enter gate ──► in-flight begin ──► catch_unwind(callback) ──► in-flight end ──► leave gate
//!      │               │                     │
//!      │               └─ disabled: skip     └─ panic: report to ErrorSink, continue
//!      └─ held by host: wait
//! ```
//!
//! The gate is taken before the in-flight mark, so a host thread holding the
//! gate while it unsubscribes never waits on a dispatch that is itself
//! waiting for the gate.

pub mod gate;
pub mod inflight;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub use gate::{ExecutionGate, GateGuard, MutexGate, NoGate};
pub use inflight::{InFlight, InFlightGuard};

use crate::error::DispatchError;
use crate::frame::Frame;
use crate::registry::SubscriptionEntry;

/// Receives problems observed on the dispatch path
pub type ErrorSink = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Sink that reports through `tracing`
pub fn log_sink() -> ErrorSink {
    Arc::new(|err: &DispatchError| match err {
        DispatchError::CallbackPanicked { .. } => tracing::error!(error = %err, "Callback failed"),
        _ => tracing::warn!(error = %err, "Dispatch problem"),
    })
}

/// Outcome of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Callback ran to completion
    Delivered,
    /// Subscription was disabled before the callback could start
    Skipped,
    /// Callback panicked; the panic was contained
    Panicked,
}

/// Serializes entry into host callback code and contains callback failures
#[derive(Clone)]
pub struct CallbackBridge {
    gate: Arc<dyn ExecutionGate>,
    sink: ErrorSink,
}

impl CallbackBridge {
    /// Bridge without a gate, reporting through `tracing`
    pub fn new() -> Self {
        Self::with_gate(Arc::new(NoGate))
    }

    /// Bridge using `gate` around every callback
    pub fn with_gate(gate: Arc<dyn ExecutionGate>) -> Self {
        Self {
            gate,
            sink: log_sink(),
        }
    }

    /// Replace the error sink
    pub fn set_error_sink(&mut self, sink: ErrorSink) {
        self.sink = sink;
    }

    /// Replace the gate
    pub fn set_gate(&mut self, gate: Arc<dyn ExecutionGate>) {
        self.gate = gate;
    }

    /// Report a problem to the sink
    pub fn report(&self, err: &DispatchError) {
        (self.sink)(err);
    }

    /// Run one subscription's callback for one frame
    pub fn invoke(&self, entry: &SubscriptionEntry, frame: &Frame) -> Invocation {
        let outcome = {
            let _gate = GateGuard::enter(self.gate.as_ref());
            let Some(_running) = entry.in_flight.try_begin() else {
                return Invocation::Skipped;
            };
            let callback = entry.callback.as_ref();
            catch_unwind(AssertUnwindSafe(|| callback(frame)))
        };

        match outcome {
            Ok(()) => {
                entry.record_delivery();
                Invocation::Delivered
            }
            Err(panic) => {
                let message = if let Some(msg) = panic.downcast_ref::<&'static str>() {
                    (*msg).to_string()
                } else if let Some(msg) = panic.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "unknown panic".to_string()
                };
                self.report(&DispatchError::CallbackPanicked {
                    subscription: entry.id,
                    channel: frame.channel().to_string(),
                    message,
                });
                Invocation::Panicked
            }
        }
    }
}

impl Default for CallbackBridge {
    fn default() -> Self {
        Self::new()
    }
}
