//! Subscription entry types
//!
//! This module defines the per-subscription state stored in the registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::pattern::Pattern;
use crate::bridge::InFlight;
use crate::frame::Frame;

/// Callback invoked for every matching frame
pub type Callback = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Opaque subscription handle
///
/// Ids are handed out in increasing order and never reused for the lifetime
/// of a registry, so they double as registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Entry for a single subscription in the registry
pub struct SubscriptionEntry {
    /// Handle returned to the subscriber
    pub id: SubscriptionId,

    /// Channel selector
    pub pattern: Pattern,

    /// User callback
    pub(crate) callback: Callback,

    /// In-flight tracking used by unsubscribe
    pub(crate) in_flight: InFlight,

    /// Frames delivered to this subscription
    delivered: AtomicU64,
}

impl SubscriptionEntry {
    pub(super) fn new(id: SubscriptionId, pattern: Pattern, callback: Callback) -> Self {
        Self {
            id,
            pattern,
            callback,
            in_flight: InFlight::new(),
            delivered: AtomicU64::new(0),
        }
    }

    /// Whether the subscription still accepts frames
    pub fn is_enabled(&self) -> bool {
        self.in_flight.is_enabled()
    }

    /// Number of completed deliveries
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot for diagnostics
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            pattern: self.pattern.as_str().to_string(),
            is_regex: self.pattern.is_regex(),
            delivered: self.delivered(),
        }
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("enabled", &self.is_enabled())
            .field("delivered", &self.delivered())
            .finish()
    }
}

/// Read-only view of a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub pattern: String,
    pub is_regex: bool,
    pub delivered: u64,
}
