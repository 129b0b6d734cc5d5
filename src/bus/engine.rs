//! Dispatch engine
//!
//! Owns the transport, the pending-frame queue and the subscription
//! registry. Exactly one loop (a `run()` caller, the thread spawned by
//! `start()`, or a `handle*()` caller) owns the transport at a time.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;

use super::config::BusConfig;
use super::queue::FrameQueue;
use super::state::EngineState;
use crate::bridge::{CallbackBridge, ErrorSink, ExecutionGate, Invocation};
use crate::codec;
use crate::error::{BusError, ConstructionError, DispatchError, RecvError, Result, TransportError};
use crate::frame::Frame;
use crate::registry::{Pattern, SubscriptionId, SubscriptionInfo, SubscriptionRegistry};
use crate::stats::{BusCounters, BusStats, ChannelStats, ChannelTable};
use crate::topology::{self, Topology};
use crate::transport::{self, Transport, TransportUrl};

/// Longest pause after a failed transport receive
const TRANSPORT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    /// Thread spawned by `start()`
    Owned,
    /// Caller of `run()`
    Caller,
    /// Caller of one of the `handle*()` calls
    Handle,
}

#[derive(Debug)]
struct LoopOwner {
    kind: LoopKind,
    thread: Option<ThreadId>,
}

#[derive(Debug, Default)]
struct Control {
    owner: Option<LoopOwner>,
    stopped: bool,
}

struct Shared {
    transport: Box<dyn Transport>,
    config: BusConfig,
    registry: SubscriptionRegistry,
    bridge: Mutex<Arc<CallbackBridge>>,
    queue: Mutex<FrameQueue>,
    counters: BusCounters,
    channels: ChannelTable,
    control: Mutex<Control>,
    loop_exited: Condvar,
    stop_requested: AtomicBool,
    paused: AtomicBool,
    /// Last value seen from `Transport::dropped`
    transport_dropped: AtomicU64,
}

/// Releases loop ownership when dropped
struct LoopClaim<'a> {
    shared: &'a Shared,
    kind: LoopKind,
}

impl Drop for LoopClaim<'_> {
    fn drop(&mut self) {
        self.shared.release(self.kind);
    }
}

impl Shared {
    fn state(&self) -> EngineState {
        let control = self.control.lock();
        self.state_locked(&control)
    }

    fn state_locked(&self, control: &Control) -> EngineState {
        match &control.owner {
            Some(owner) if owner.kind != LoopKind::Handle => {
                if self.paused.load(Ordering::SeqCst) {
                    EngineState::Paused
                } else {
                    EngineState::Running
                }
            }
            _ if control.stopped => EngineState::Stopped,
            _ => EngineState::Ready,
        }
    }

    fn claim(&self, kind: LoopKind, op: &'static str) -> Result<LoopClaim<'_>> {
        self.acquire(kind, op)?;
        Ok(LoopClaim { shared: self, kind })
    }

    /// Take loop ownership without a guard; pair with `release`
    fn acquire(&self, kind: LoopKind, op: &'static str) -> Result<()> {
        let mut control = self.control.lock();
        if let Some(owner) = &control.owner {
            let state = match owner.kind {
                LoopKind::Handle => "handling",
                _ => self.state_locked(&control).as_str(),
            };
            return Err(BusError::InvalidState { op, state });
        }
        let thread = match kind {
            LoopKind::Owned => None,
            _ => Some(thread::current().id()),
        };
        control.owner = Some(LoopOwner { kind, thread });
        if kind != LoopKind::Handle {
            control.stopped = false;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, kind: LoopKind) {
        let mut control = self.control.lock();
        control.owner = None;
        if kind != LoopKind::Handle {
            control.stopped = true;
        }
        drop(control);
        self.loop_exited.notify_all();
    }

    fn bridge(&self) -> Arc<CallbackBridge> {
        Arc::clone(&self.bridge.lock())
    }

    fn update_bridge(&self, update: impl FnOnce(&mut CallbackBridge)) {
        let mut current = self.bridge.lock();
        let mut next = CallbackBridge::clone(&current);
        update(&mut next);
        *current = Arc::new(next);
    }

    fn report(&self, err: DispatchError) {
        self.bridge().report(&err);
    }

    /// Move frames from the transport into the queue
    ///
    /// Waits up to `wait` for the first frame, then drains everything the
    /// transport has ready so the queue, not the transport, decides which
    /// frames are dropped. Returns `true` when the transport reported it is
    /// closed.
    fn ingest(&self, wait: Duration) -> bool {
        let mut wait = wait;
        let mut overflow = 0;
        let mut closed = false;

        loop {
            match self.transport.recv(wait) {
                Ok(frame) => {
                    self.channels
                        .record_receive(frame.channel(), frame.len(), frame.receive_time());
                    let evicted = self.queue.lock().push(frame);
                    if evicted > 0 {
                        BusCounters::add(&self.counters.frames_dropped, evicted);
                        overflow += evicted;
                    }
                    BusCounters::incr(&self.counters.frames_received);
                    wait = Duration::ZERO;
                }
                Err(RecvError::Timeout) => break,
                Err(RecvError::Closed) => {
                    closed = true;
                    break;
                }
                Err(RecvError::Malformed(e)) => {
                    BusCounters::incr(&self.counters.malformed_frames);
                    self.report(DispatchError::MalformedFrame(e));
                    wait = Duration::ZERO;
                }
                Err(RecvError::Transport(e)) => {
                    BusCounters::incr(&self.counters.transport_errors);
                    self.report(DispatchError::Transport(e.to_string()));
                    if !wait.is_zero() {
                        thread::sleep(wait.min(TRANSPORT_ERROR_BACKOFF));
                    }
                    break;
                }
            }
        }

        // Frames the transport discarded before we could take them
        let total = self.transport.dropped();
        let seen = self.transport_dropped.swap(total, Ordering::SeqCst);
        if total > seen {
            BusCounters::add(&self.counters.frames_dropped, total - seen);
            overflow += total - seen;
        }

        if overflow > 0 {
            tracing::debug!(dropped = overflow, "Queue full, oldest frames dropped");
            self.report(DispatchError::QueueOverflow { count: overflow });
        }
        closed
    }

    /// Deliver one frame to every matching subscription, in registration order
    fn dispatch(&self, frame: &Frame) {
        BusCounters::incr(&self.counters.frames_dispatched);

        let entries = self.registry.match_entries(frame.channel());
        if entries.is_empty() {
            tracing::trace!(channel = %frame.channel(), "No subscribers");
            return;
        }

        let bridge = self.bridge();
        for entry in &entries {
            match bridge.invoke(entry, frame) {
                Invocation::Delivered => BusCounters::incr(&self.counters.callbacks_invoked),
                Invocation::Panicked => BusCounters::incr(&self.counters.callback_panics),
                Invocation::Skipped => {}
            }
        }
    }

    /// Dispatch the frames queued right now; nothing while paused
    fn dispatch_pending(&self) -> usize {
        if self.paused.load(Ordering::SeqCst) {
            return 0;
        }
        let pending = self.queue.lock().len();
        let mut dispatched = 0;
        for _ in 0..pending {
            let Some(frame) = self.queue.lock().pop() else {
                break;
            };
            self.dispatch(&frame);
            dispatched += 1;
        }
        dispatched
    }

    fn dispatch_loop(&self) {
        let receive_timeout = self.config.receive_timeout;

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let idle = self.paused.load(Ordering::SeqCst) || self.queue.lock().is_empty();
            let wait = if idle { receive_timeout } else { Duration::ZERO };
            let closed = self.ingest(wait);

            if !self.paused.load(Ordering::SeqCst) {
                let next = self.queue.lock().pop();
                if let Some(frame) = next {
                    self.dispatch(&frame);
                    continue;
                }
            }

            if closed {
                tracing::warn!("Transport closed, dispatch loop exiting");
                break;
            }
        }
    }

    fn handle_until(&self, deadline: Option<Instant>) -> Result<usize> {
        let _claim = self.claim(LoopKind::Handle, "handle")?;
        let receive_timeout = self.config.receive_timeout;

        let mut closed = self.ingest(Duration::ZERO);
        while self.queue.lock().is_empty() {
            if closed {
                return Err(TransportError::Closed.into());
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                return Ok(0);
            }
            let wait = match deadline {
                None => receive_timeout,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(0);
                    }
                    (deadline - now).min(receive_timeout)
                }
            };
            closed = self.ingest(wait);
        }

        Ok(self.dispatch_pending())
    }
}

/// Publish/subscribe bus
///
/// Frames received from the transport are queued (bounded, oldest dropped
/// first) and delivered in receive order. For each frame, matching
/// subscriptions run in registration order on the dispatch thread.
///
/// Construction through [`Bus::new`] never fails; a bus whose transport
/// could not be attached reports `good() == false` and every operation
/// returns [`BusError::NotInitialized`].
pub struct Bus {
    inner: std::result::Result<Arc<Shared>, ConstructionError>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    /// Create a bus for a transport selector, e.g. `"inproc://robot"`
    ///
    /// An empty selector uses `ZCM_DEFAULT_URL`, then in-process loopback.
    pub fn new(url: &str) -> Self {
        Self::with_config(BusConfig::with_url(url))
    }

    /// Create a bus from a full configuration
    pub fn with_config(config: BusConfig) -> Self {
        match Self::connect(&config) {
            Ok(transport) => Self::with_transport(transport, config),
            Err(e) => {
                tracing::error!(url = %config.transport_url, error = %e, "Bus construction failed");
                Self {
                    inner: Err(e),
                    worker: Mutex::new(None),
                }
            }
        }
    }

    /// Create a bus, failing if the transport cannot be attached
    pub fn open(url: &str) -> std::result::Result<Self, ConstructionError> {
        let config = BusConfig::with_url(url);
        let transport = Self::connect(&config)?;
        Ok(Self::with_transport(transport, config))
    }

    /// Create a bus over a transport supplied by the embedder
    pub fn with_transport(transport: Box<dyn Transport>, config: BusConfig) -> Self {
        let queue = FrameQueue::new(config.queue_size);
        tracing::debug!(
            url = %config.transport_url,
            queue_size = config.queue_size,
            "Bus created"
        );

        let shared = Shared {
            transport,
            config,
            registry: SubscriptionRegistry::new(),
            bridge: Mutex::new(Arc::new(CallbackBridge::new())),
            queue: Mutex::new(queue),
            counters: BusCounters::new(),
            channels: ChannelTable::new(),
            control: Mutex::new(Control::default()),
            loop_exited: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            transport_dropped: AtomicU64::new(0),
        };

        Self {
            inner: Ok(Arc::new(shared)),
            worker: Mutex::new(None),
        }
    }

    fn connect(config: &BusConfig) -> std::result::Result<Box<dyn Transport>, ConstructionError> {
        let url = TransportUrl::parse(&config.transport_url)?;
        transport::open(&url)
    }

    fn shared(&self) -> Result<&Arc<Shared>> {
        self.inner.as_ref().map_err(|_| BusError::NotInitialized)
    }

    /// Whether the transport was attached successfully
    pub fn good(&self) -> bool {
        self.inner.is_ok()
    }

    /// Why construction failed, if it did
    pub fn construction_error(&self) -> Option<&ConstructionError> {
        self.inner.as_ref().err()
    }

    /// Current engine state
    pub fn state(&self) -> EngineState {
        match &self.inner {
            Ok(shared) => shared.state(),
            Err(_) => EngineState::Uninitialized,
        }
    }

    /// Register a callback for every channel matching `pattern`
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let shared = self.shared()?;
        Ok(shared.registry.subscribe(pattern, callback)?)
    }

    /// Register a callback for an already parsed pattern
    pub fn subscribe_pattern<F>(&self, pattern: Pattern, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let shared = self.shared()?;
        Ok(shared.registry.subscribe_pattern(pattern, Arc::new(callback)))
    }

    /// Receive matching frames through a bounded async channel
    ///
    /// Frames arriving while the channel is full are dropped for this
    /// receiver only. Dropping the receiver leaves the subscription in place
    /// until it is unsubscribed.
    pub fn subscribe_stream(
        &self,
        pattern: &str,
        capacity: usize,
    ) -> Result<(SubscriptionId, mpsc::Receiver<Frame>)> {
        let shared = self.shared()?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = shared.registry.subscribe(pattern, move |frame: &Frame| {
            if let Err(mpsc::error::TrySendError::Full(frame)) = tx.try_send(frame.clone()) {
                tracing::trace!(channel = %frame.channel(), "Stream receiver full, frame dropped");
            }
        })?;
        Ok((id, rx))
    }

    /// Remove a subscription
    ///
    /// Blocks until no other thread is running its callback. Safe to call
    /// from inside the subscription's own callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let shared = self.shared()?;
        Ok(shared.registry.unsubscribe(id)?)
    }

    /// Publish a payload on a channel
    pub fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let shared = self.shared()?;
        codec::validate_channel(channel)?;

        match shared.transport.send(channel, payload) {
            Ok(()) => {
                BusCounters::incr(&shared.counters.frames_published);
                shared.channels.record_publish(channel, payload.len());
                Ok(())
            }
            Err(e) => {
                BusCounters::incr(&shared.counters.publish_failures);
                tracing::debug!(channel = %channel, error = %e, "Publish failed");
                Err(e.into())
            }
        }
    }

    /// Run the dispatch loop on the calling thread until `stop()`
    pub fn run(&self) -> Result<()> {
        let shared = self.shared()?;
        let _claim = shared.claim(LoopKind::Caller, "run")?;
        tracing::info!("Dispatch loop running on caller thread");
        shared.dispatch_loop();
        tracing::info!("Dispatch loop stopped");
        Ok(())
    }

    /// Spawn an owned dispatch thread
    pub fn start(&self) -> Result<()> {
        let shared = Arc::clone(self.shared()?);
        let mut worker = self.worker.lock();

        // Acquire first so a previous worker is never this thread
        shared.acquire(LoopKind::Owned, "start")?;
        if let Some(previous) = worker.take() {
            if previous.join().is_err() {
                tracing::warn!("Previous dispatch thread panicked");
            }
        }

        let loop_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(shared.config.thread_name.clone())
            .spawn(move || {
                let claim = LoopClaim {
                    shared: &loop_shared,
                    kind: LoopKind::Owned,
                };
                if let Some(owner) = loop_shared.control.lock().owner.as_mut() {
                    owner.thread = Some(thread::current().id());
                }
                loop_shared.dispatch_loop();
                drop(claim);
                tracing::debug!("Dispatch thread exiting");
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::info!(thread = %shared.config.thread_name, "Dispatch thread started");
                Ok(())
            }
            Err(e) => {
                shared.release(LoopKind::Owned);
                Err(e.into())
            }
        }
    }

    /// Stop the dispatch loop
    ///
    /// Returns once the loop has exited. Called from the dispatch thread
    /// itself (e.g. inside a callback) it only requests the stop. Do not
    /// hold an [`ExecutionGate`] the loop needs while calling this.
    pub fn stop(&self) -> Result<()> {
        let shared = self.shared()?;
        shared.stop_requested.store(true, Ordering::SeqCst);
        let me = thread::current().id();

        {
            let mut control = shared.control.lock();
            loop {
                match &control.owner {
                    None => break,
                    Some(owner) if owner.thread == Some(me) => {
                        tracing::debug!("Stop requested from the dispatch thread");
                        return Ok(());
                    }
                    Some(_) => shared.loop_exited.wait(&mut control),
                }
            }
        }

        let finished = self.worker.lock().take();
        if let Some(handle) = finished {
            if handle.thread().id() != me && handle.join().is_err() {
                tracing::warn!("Dispatch thread panicked");
            }
        }
        Ok(())
    }

    /// Keep ingesting frames but stop delivering them
    pub fn pause(&self) -> Result<()> {
        let shared = self.shared()?;
        shared.paused.store(true, Ordering::SeqCst);
        tracing::debug!("Dispatch paused");
        Ok(())
    }

    /// Resume delivery after `pause()`
    pub fn resume(&self) -> Result<()> {
        let shared = self.shared()?;
        shared.paused.store(false, Ordering::SeqCst);
        tracing::debug!("Dispatch resumed");
        Ok(())
    }

    /// Dispatch the frames currently queued, or wait until one arrives
    ///
    /// Returns the number of frames dispatched. The wait happens in
    /// receive-timeout steps and ends early on `stop()`.
    pub fn handle(&self) -> Result<usize> {
        self.shared()?.handle_until(None)
    }

    /// Like [`Bus::handle`], giving up after `timeout`
    pub fn handle_timeout(&self, timeout: Duration) -> Result<usize> {
        self.shared()?.handle_until(Some(Instant::now() + timeout))
    }

    /// Dispatch whatever is available without blocking
    pub fn handle_nonblock(&self) -> Result<usize> {
        let shared = self.shared()?;
        let _claim = shared.claim(LoopKind::Handle, "handle_nonblock")?;
        let closed = shared.ingest(Duration::ZERO);
        if closed && shared.queue.lock().is_empty() {
            return Err(TransportError::Closed.into());
        }
        Ok(shared.dispatch_pending())
    }

    /// Flush the transport and, if no loop is running, dispatch what is available
    pub fn flush(&self) -> Result<()> {
        let shared = self.shared()?;
        shared.transport.flush()?;
        match self.handle_nonblock() {
            Ok(_) | Err(BusError::InvalidState { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Change the pending-queue bound; shrinking drops the oldest frames
    pub fn set_queue_size(&self, size: usize) -> Result<()> {
        let shared = self.shared()?;
        if size == 0 {
            return Err(BusError::InvalidQueueSize);
        }
        let evicted = shared.queue.lock().set_capacity(size);
        if evicted > 0 {
            BusCounters::add(&shared.counters.frames_dropped, evicted);
            tracing::debug!(dropped = evicted, queue_size = size, "Queue shrunk");
        }
        Ok(())
    }

    /// Current pending-queue bound
    pub fn queue_size(&self) -> Result<usize> {
        Ok(self.shared()?.queue.lock().capacity())
    }

    /// Frames waiting for dispatch
    pub fn pending(&self) -> Result<usize> {
        Ok(self.shared()?.queue.lock().len())
    }

    /// Replace the sink that receives dispatch problems
    pub fn set_error_sink(&self, sink: ErrorSink) -> Result<()> {
        self.shared()?.update_bridge(|bridge| bridge.set_error_sink(sink));
        Ok(())
    }

    /// Replace the gate every callback runs under
    pub fn set_gate(&self, gate: Arc<dyn ExecutionGate>) -> Result<()> {
        self.shared()?.update_bridge(|bridge| bridge.set_gate(gate));
        Ok(())
    }

    /// Snapshot of the bus counters
    pub fn stats(&self) -> Result<BusStats> {
        Ok(self.shared()?.counters.snapshot())
    }

    /// Traffic seen per channel
    pub fn channel_stats(&self) -> Result<BTreeMap<String, ChannelStats>> {
        Ok(self.shared()?.channels.snapshot())
    }

    /// Current subscriptions in registration order
    pub fn subscriptions(&self) -> Result<Vec<SubscriptionInfo>> {
        Ok(self.shared()?.registry.subscriptions())
    }

    /// Static view of channels and subscriptions
    pub fn topology(&self) -> Result<Topology> {
        let shared = self.shared()?;
        Ok(Topology {
            transport: shared.config.transport_url.clone(),
            channels: shared.channels.snapshot(),
            subscriptions: shared.registry.subscriptions(),
            stats: shared.counters.snapshot(),
        })
    }

    /// Write the topology snapshot as pretty JSON
    pub fn write_topology(&self, path: impl AsRef<Path>) -> Result<()> {
        let topology = self.topology()?;
        topology::write_topology(&topology, path)
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if let Ok(shared) = &self.inner {
            let _ = self.stop();
            shared.transport.close();
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("state", &self.state())
            .field("good", &self.good())
            .finish()
    }
}
