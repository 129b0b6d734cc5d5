//! Execution gates
//!
//! Some embeddings only allow one thread at a time to run host code (an
//! interpreter-wide lock, a UI thread, ...). A gate is held for exactly the
//! duration of one callback invocation and is released by [`GateGuard`] on
//! every exit path, including unwinding.

use parking_lot::{Condvar, Mutex};

/// Exclusive access to the host execution context
pub trait ExecutionGate: Send + Sync {
    /// Block until the host context is exclusively held by this thread
    fn acquire(&self);

    /// Give the host context back
    fn release(&self);
}

/// Scoped gate acquisition; releases on drop
pub struct GateGuard<'a> {
    gate: &'a dyn ExecutionGate,
}

impl<'a> GateGuard<'a> {
    pub fn enter(gate: &'a dyn ExecutionGate) -> Self {
        gate.acquire();
        Self { gate }
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Gate for hosts without an execution-context discipline
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGate;

impl ExecutionGate for NoGate {
    fn acquire(&self) {}

    fn release(&self) {}
}

/// Non-reentrant mutual exclusion gate
///
/// Share one instance between the bus and the host: host code that must not
/// overlap with callbacks runs inside [`MutexGate::lock`].
#[derive(Debug, Default)]
pub struct MutexGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl MutexGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the gate from host code
    pub fn lock(&self) -> GateGuard<'_> {
        GateGuard::enter(self)
    }

    /// Whether some thread currently holds the gate
    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

impl ExecutionGate for MutexGate {
    fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }
}
