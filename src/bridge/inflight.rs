//! In-flight invocation tracking
//!
//! Every subscription owns an [`InFlight`] tracker. Dispatch registers each
//! invocation with it; `unsubscribe` disables the tracker and waits until the
//! count of invocations running on *other* threads reaches zero. Invocations
//! on the waiting thread itself (a callback unsubscribing itself) are not
//! waited for, since they can only finish after the wait returns.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct State {
    enabled: bool,
    active: Vec<ThreadId>,
}

/// Per-subscription in-flight counter with a zero condition
#[derive(Debug)]
pub struct InFlight {
    state: Mutex<State>,
    idle: Condvar,
}

impl InFlight {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                enabled: true,
                active: Vec::new(),
            }),
            idle: Condvar::new(),
        }
    }

    /// Register an invocation on the current thread
    ///
    /// Returns `None` once the subscription has been disabled.
    pub fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        let mut state = self.state.lock();
        if !state.enabled {
            return None;
        }
        state.active.push(thread::current().id());
        Some(InFlightGuard { tracker: self })
    }

    /// Stop new invocations and wait out the ones running on other threads
    pub fn disable_and_wait(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        state.enabled = false;
        while state.active.iter().any(|&id| id != me) {
            self.idle.wait(&mut state);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Invocations currently running
    pub fn active(&self) -> usize {
        self.state.lock().active.len()
    }

    fn end(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if let Some(pos) = state.active.iter().position(|&id| id == me) {
            state.active.swap_remove(pos);
        }
        drop(state);
        self.idle.notify_all();
    }
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one running invocation; ends it on drop
pub struct InFlightGuard<'a> {
    tracker: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.tracker.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn test_disabled_rejects_new_invocations() {
        let t = InFlight::new();
        assert!(t.try_begin().is_some());
        t.disable_and_wait();
        assert!(!t.is_enabled());
        assert!(t.try_begin().is_none());
    }

    #[test]
    fn test_wait_for_other_thread() {
        let t = Arc::new(InFlight::new());
        let started = Arc::new(Barrier::new(2));
        let finished = Arc::new(AtomicBool::new(false));

        let worker = {
            let t = Arc::clone(&t);
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                let _g = t.try_begin().unwrap();
                started.wait();
                thread::sleep(Duration::from_millis(50));
                finished.store(true, Ordering::SeqCst);
            })
        };

        started.wait();
        t.disable_and_wait();
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(t.active(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_self_unsubscribe_does_not_deadlock() {
        let t = InFlight::new();
        let _g = t.try_begin().unwrap();
        t.disable_and_wait();
        assert_eq!(t.active(), 1);
    }
}
