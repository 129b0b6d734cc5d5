//! Statistics and metrics for the bus

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Bus-level counters, updated lock-free from any thread
#[derive(Debug, Default)]
pub struct BusCounters {
    pub frames_received: AtomicU64,
    pub frames_dispatched: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub transport_errors: AtomicU64,
    pub callbacks_invoked: AtomicU64,
    pub callback_panics: AtomicU64,
    pub frames_published: AtomicU64,
    pub publish_failures: AtomicU64,
}

impl BusCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> BusStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BusStats {
            frames_received: load(&self.frames_received),
            frames_dispatched: load(&self.frames_dispatched),
            frames_dropped: load(&self.frames_dropped),
            malformed_frames: load(&self.malformed_frames),
            transport_errors: load(&self.transport_errors),
            callbacks_invoked: load(&self.callbacks_invoked),
            callback_panics: load(&self.callback_panics),
            frames_published: load(&self.frames_published),
            publish_failures: load(&self.publish_failures),
        }
    }
}

/// Snapshot of bus counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Frames taken from the transport into the queue
    pub frames_received: u64,
    /// Frames taken from the queue and matched against subscriptions
    pub frames_dispatched: u64,
    /// Frames evicted from a full queue (drop-oldest)
    pub frames_dropped: u64,
    /// Undecodable frames reported by the transport
    pub malformed_frames: u64,
    /// Transport receive failures
    pub transport_errors: u64,
    /// Callbacks that ran to completion
    pub callbacks_invoked: u64,
    /// Callbacks that panicked
    pub callback_panics: u64,
    /// Frames handed to the transport
    pub frames_published: u64,
    /// Publishes the transport rejected
    pub publish_failures: u64,
}

/// Per-channel traffic counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Messages published on this channel by this bus
    pub published: u64,
    /// Messages received on this channel
    pub received: u64,
    /// Payload bytes published
    pub bytes_published: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// Receive time of the last received message (µs)
    pub last_receive_time: Option<i64>,
}

/// Traffic seen per channel, ordered by channel name
#[derive(Debug, Default)]
pub struct ChannelTable {
    channels: Mutex<BTreeMap<String, ChannelStats>>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_publish(&self, channel: &str, bytes: usize) {
        let mut channels = self.channels.lock();
        let stats = channels.entry(channel.to_string()).or_default();
        stats.published += 1;
        stats.bytes_published += bytes as u64;
    }

    pub fn record_receive(&self, channel: &str, bytes: usize, receive_time: i64) {
        let mut channels = self.channels.lock();
        let stats = channels.entry(channel.to_string()).or_default();
        stats.received += 1;
        stats.bytes_received += bytes as u64;
        stats.last_receive_time = Some(receive_time);
    }

    pub fn get(&self, channel: &str) -> Option<ChannelStats> {
        self.channels.lock().get(channel).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ChannelStats> {
        self.channels.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_counters_new() {
        let stats = BusCounters::new().snapshot();
        assert_eq!(stats, BusStats::default());
    }

    #[test]
    fn test_bus_counters_snapshot() {
        let counters = BusCounters::new();
        BusCounters::incr(&counters.frames_received);
        BusCounters::incr(&counters.frames_received);
        BusCounters::add(&counters.frames_dropped, 5);

        let stats = counters.snapshot();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_dropped, 5);
        assert_eq!(stats.frames_dispatched, 0);
    }

    #[test]
    fn test_channel_table() {
        let table = ChannelTable::new();
        table.record_publish("POSE", 10);
        table.record_receive("POSE", 10, 1000);
        table.record_receive("POSE", 20, 2000);
        table.record_receive("IMU", 4, 3000);

        let pose = table.get("POSE").unwrap();
        assert_eq!(pose.published, 1);
        assert_eq!(pose.received, 2);
        assert_eq!(pose.bytes_received, 30);
        assert_eq!(pose.last_receive_time, Some(2000));

        let names: Vec<_> = table.snapshot().into_keys().collect();
        assert_eq!(names, vec!["IMU".to_string(), "POSE".to_string()]);
        assert!(table.get("NONE").is_none());
    }
}
