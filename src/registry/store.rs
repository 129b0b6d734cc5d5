//! Subscription registry implementation
//!
//! The central table of subscriptions. Exact patterns are indexed by
//! channel name for O(1) lookup; regex patterns are kept in registration
//! order and tested one by one.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::entry::{Callback, SubscriptionEntry, SubscriptionId, SubscriptionInfo};
use super::error::RegistryError;
use super::pattern::Pattern;
use crate::frame::Frame;

#[derive(Default)]
struct Tables {
    exact: HashMap<String, Vec<Arc<SubscriptionEntry>>>,
    regex: Vec<Arc<SubscriptionEntry>>,
    by_id: BTreeMap<SubscriptionId, Arc<SubscriptionEntry>>,
}

/// Central registry for all subscriptions
///
/// Mutated only under its own lock. Dispatch takes the read side, so
/// matching never waits for other matches.
pub struct SubscriptionRegistry {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a callback to every channel matching `pattern`
    ///
    /// See [`Pattern::parse`] for how exact and regex patterns are told
    /// apart. The subscription sees frames from the next dispatch cycle on.
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> Result<SubscriptionId, RegistryError>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let pattern = Pattern::parse(pattern)?;
        Ok(self.subscribe_pattern(pattern, Arc::new(callback)))
    }

    /// Subscribe with an already-built pattern
    pub fn subscribe_pattern(&self, pattern: Pattern, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(SubscriptionEntry::new(id, pattern, callback));

        let mut tables = self.tables.write();
        match &entry.pattern {
            Pattern::Exact(channel) => tables
                .exact
                .entry(channel.clone())
                .or_default()
                .push(Arc::clone(&entry)),
            Pattern::Regex { .. } => tables.regex.push(Arc::clone(&entry)),
        }
        tables.by_id.insert(id, Arc::clone(&entry));

        tracing::debug!(
            subscription = %id,
            pattern = %entry.pattern,
            subscriptions = tables.by_id.len(),
            "Subscription added"
        );

        id
    }

    /// Remove a subscription
    ///
    /// Blocks until every invocation of its callback running on another
    /// thread has returned; after this returns the callback is never called
    /// again. A second call with the same id fails with
    /// [`RegistryError::UnknownSubscription`].
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RegistryError> {
        let entry = {
            let mut tables = self.tables.write();
            let entry = tables
                .by_id
                .remove(&id)
                .ok_or(RegistryError::UnknownSubscription(id))?;

            match &entry.pattern {
                Pattern::Exact(channel) => {
                    if let Some(list) = tables.exact.get_mut(channel) {
                        list.retain(|e| e.id != id);
                        if list.is_empty() {
                            tables.exact.remove(channel);
                        }
                    }
                }
                Pattern::Regex { .. } => tables.regex.retain(|e| e.id != id),
            }
            entry
        };

        // Registry lock is released before waiting so dispatch can progress
        entry.in_flight.disable_and_wait();

        tracing::debug!(
            subscription = %id,
            pattern = %entry.pattern,
            delivered = entry.delivered(),
            "Subscription removed"
        );
        Ok(())
    }

    /// Ids of the subscriptions matching `channel`, in registration order
    pub fn matches(&self, channel: &str) -> Vec<SubscriptionId> {
        self.match_entries(channel).iter().map(|e| e.id).collect()
    }

    /// Entries matching `channel`, deduplicated, in registration order
    pub(crate) fn match_entries(&self, channel: &str) -> Vec<Arc<SubscriptionEntry>> {
        let tables = self.tables.read();

        let mut matched: Vec<Arc<SubscriptionEntry>> = tables
            .exact
            .get(channel)
            .map(|list| list.to_vec())
            .unwrap_or_default();

        matched.extend(
            tables
                .regex
                .iter()
                .filter(|e| e.pattern.matches(channel))
                .cloned(),
        );
        drop(tables);

        matched.sort_by_key(|e| e.id);
        matched.dedup_by_key(|e| e.id);
        matched
    }

    /// Whether `id` is currently subscribed
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.tables.read().by_id.contains_key(&id)
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live subscription, in registration order
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.tables
            .read()
            .by_id
            .values()
            .map(|e| e.info())
            .collect()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn noop(_: &Frame) {}

    #[test]
    fn test_subscribe_assigns_increasing_ids() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe("A", noop).unwrap();
        let b = registry.subscribe("B", noop).unwrap();
        assert!(b > a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_not_reused_after_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe("A", noop).unwrap();
        registry.unsubscribe(a).unwrap();
        let b = registry.subscribe("A", noop).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_exact_and_regex_matching() {
        let registry = SubscriptionRegistry::new();
        let exact = registry.subscribe("A", noop).unwrap();
        let regex = registry.subscribe("A.*", noop).unwrap();

        assert_eq!(registry.matches("AB"), vec![regex]);
        assert_eq!(registry.matches("A"), vec![exact, regex]);
        assert!(registry.matches("B").is_empty());
    }

    #[test]
    fn test_registration_order_across_kinds() {
        let registry = SubscriptionRegistry::new();
        let regex = registry.subscribe("IMU.*", noop).unwrap();
        let exact = registry.subscribe("IMU", noop).unwrap();
        let other = registry.subscribe("I.U", noop).unwrap();

        assert_eq!(registry.matches("IMU"), vec![regex, exact, other]);
    }

    #[test]
    fn test_multiple_exact_subscribers_same_channel() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe("POSE", noop).unwrap();
        let b = registry.subscribe("POSE", noop).unwrap();
        assert_eq!(registry.matches("POSE"), vec![a, b]);

        registry.unsubscribe(a).unwrap();
        assert_eq!(registry.matches("POSE"), vec![b]);
    }

    #[test]
    fn test_invalid_pattern() {
        let registry = SubscriptionRegistry::new();
        assert!(matches!(
            registry.subscribe("(", noop),
            Err(RegistryError::InvalidPattern { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_double_unsubscribe_fails() {
        let registry = SubscriptionRegistry::new();
        let id = registry.subscribe("A", noop).unwrap();
        registry.unsubscribe(id).unwrap();
        assert_eq!(
            registry.unsubscribe(id),
            Err(RegistryError::UnknownSubscription(id))
        );
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_unsubscribe_waits_for_in_flight_invocation() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let id = registry.subscribe("A", noop).unwrap();
        let entry = registry.match_entries("A").remove(0);

        let started = Arc::new(Barrier::new(2));
        let finished = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let entry = Arc::clone(&entry);
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                let _running = entry.in_flight.try_begin().unwrap();
                started.wait();
                thread::sleep(Duration::from_millis(50));
                finished.store(true, Ordering::SeqCst);
            })
        };

        started.wait();
        registry.unsubscribe(id).unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert!(entry.in_flight.try_begin().is_none());
        dispatcher.join().unwrap();
    }

    #[test]
    fn test_subscriptions_snapshot() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("A", noop).unwrap();
        registry.subscribe("B.*", noop).unwrap();

        let subs = registry.subscriptions();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].pattern, "A");
        assert!(!subs[0].is_regex);
        assert_eq!(subs[1].pattern, "B.*");
        assert!(subs[1].is_regex);
    }
}
