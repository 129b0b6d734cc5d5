//! In-process transport
//!
//! Endpoints attached to the same hub see every frame sent on that hub,
//! including their own. Named hubs are shared process-wide so several buses
//! can talk to each other without touching the network.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::mailbox::{Mailbox, DEFAULT_MAILBOX_CAPACITY};
use super::Transport;
use crate::codec;
use crate::error::{RecvError, TransportError};
use crate::frame::Frame;

#[derive(Debug, Default)]
struct Hub {
    endpoints: Mutex<Vec<Weak<Mailbox<Frame>>>>,
}

impl Hub {
    fn attach(&self, mailbox: &Arc<Mailbox<Frame>>) {
        self.endpoints.lock().push(Arc::downgrade(mailbox));
    }

    fn detach(&self, mailbox: &Arc<Mailbox<Frame>>) {
        self.endpoints
            .lock()
            .retain(|w| w.upgrade().is_some_and(|m| !Arc::ptr_eq(&m, mailbox)));
    }

    fn deliver(&self, frame: &Frame) -> usize {
        let targets: Vec<Arc<Mailbox<Frame>>> = {
            let mut endpoints = self.endpoints.lock();
            endpoints.retain(|w| w.strong_count() > 0);
            endpoints.iter().filter_map(Weak::upgrade).collect()
        };
        targets
            .iter()
            .filter(|mailbox| mailbox.push(frame.clone()))
            .count()
    }
}

fn named_hubs() -> &'static Mutex<HashMap<String, Weak<Hub>>> {
    static HUBS: OnceLock<Mutex<HashMap<String, Weak<Hub>>>> = OnceLock::new();
    HUBS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn hub_named(name: &str) -> Arc<Hub> {
    let mut hubs = named_hubs().lock();
    hubs.retain(|_, hub| hub.strong_count() > 0);
    if let Some(hub) = hubs.get(name).and_then(Weak::upgrade) {
        return hub;
    }
    let hub = Arc::new(Hub::default());
    hubs.insert(name.to_string(), Arc::downgrade(&hub));
    hub
}

/// In-process transport endpoint
#[derive(Debug)]
pub struct InprocTransport {
    hub: Arc<Hub>,
    mailbox: Arc<Mailbox<Frame>>,
    name: Option<String>,
}

impl InprocTransport {
    /// Private loopback endpoint: frames come back only to this endpoint
    pub fn new() -> Self {
        Self::attach(Arc::new(Hub::default()), None, DEFAULT_MAILBOX_CAPACITY)
    }

    /// Endpoint on the process-wide hub called `name`
    pub fn connect(name: &str) -> Self {
        Self::connect_with_capacity(name, DEFAULT_MAILBOX_CAPACITY)
    }

    /// Endpoint on a named hub with a custom receive buffer size
    pub fn connect_with_capacity(name: &str, capacity: usize) -> Self {
        Self::attach(hub_named(name), Some(name.to_string()), capacity)
    }

    fn attach(hub: Arc<Hub>, name: Option<String>, capacity: usize) -> Self {
        let mailbox = Arc::new(Mailbox::new(capacity));
        hub.attach(&mailbox);
        tracing::debug!(hub = ?name, "Inproc endpoint attached");
        Self { hub, mailbox, name }
    }

    /// Hub name, if this endpoint is on a shared hub
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Default for InprocTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InprocTransport {
    fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        if self.mailbox.is_closed() {
            return Err(TransportError::Closed);
        }
        codec::validate_channel(channel).map_err(|e| TransportError::Other(e.to_string()))?;

        let frame = Frame::new(channel, payload);
        let receivers = self.hub.deliver(&frame);
        tracing::trace!(channel = %channel, receivers, "Inproc frame delivered");
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Frame, RecvError> {
        self.mailbox.pop(timeout)
    }

    fn dropped(&self) -> u64 {
        self.mailbox.dropped()
    }

    fn close(&self) {
        self.mailbox.close();
        self.hub.detach(&self.mailbox);
        tracing::debug!(hub = ?self.name, "Inproc endpoint closed");
    }
}

impl Drop for InprocTransport {
    fn drop(&mut self) {
        self.hub.detach(&self.mailbox);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback() {
        let t = InprocTransport::new();
        t.send("A", b"one").unwrap();

        let frame = t.recv(Duration::from_millis(100)).unwrap();
        assert_eq!(frame.channel(), "A");
        assert_eq!(frame.payload().as_ref(), b"one");
        assert!(matches!(t.recv(Duration::ZERO), Err(RecvError::Timeout)));
    }

    #[test]
    fn test_named_hub_shared() {
        let a = InprocTransport::connect("inproc-test-shared");
        let b = InprocTransport::connect("inproc-test-shared");
        a.send("CHAN", b"x").unwrap();

        assert_eq!(b.recv(Duration::from_millis(100)).unwrap().channel(), "CHAN");
        assert_eq!(a.recv(Duration::from_millis(100)).unwrap().channel(), "CHAN");
    }

    #[test]
    fn test_private_hubs_isolated() {
        let a = InprocTransport::new();
        let b = InprocTransport::new();
        a.send("CHAN", b"x").unwrap();
        assert!(matches!(b.recv(Duration::ZERO), Err(RecvError::Timeout)));
    }

    #[test]
    fn test_full_mailbox_drops_oldest() {
        let t = InprocTransport::connect_with_capacity("inproc-test-full", 2);
        for channel in ["A", "B", "C"] {
            t.send(channel, b"").unwrap();
        }
        assert_eq!(t.dropped(), 1);
        assert_eq!(t.recv(Duration::ZERO).unwrap().channel(), "B");
    }

    #[test]
    fn test_closed_endpoint() {
        let t = InprocTransport::new();
        t.close();
        assert!(matches!(t.send("A", b""), Err(TransportError::Closed)));
        assert!(matches!(t.recv(Duration::ZERO), Err(RecvError::Closed)));
    }

    #[test]
    fn test_closed_peer_detached() {
        let a = InprocTransport::connect("inproc-test-detach");
        let b = InprocTransport::connect("inproc-test-detach");
        b.close();
        a.send("A", b"x").unwrap();
        assert!(a.recv(Duration::from_millis(50)).is_ok());
        assert!(matches!(b.recv(Duration::ZERO), Err(RecvError::Closed)));
    }
}
