//! Subscription registry for pub/sub routing
//!
//! The registry owns every subscription and decides which of them a frame is
//! delivered to. Callers only ever hold a [`SubscriptionId`].
//!
//! # Architecture
//!
//! ```text
//!                        SubscriptionRegistry
//!                 ┌──────────────────────────────────┐
//!                 │ exact: HashMap<channel, [entry]> │◄── O(1) lookup
//!                 │ regex: [entry] (registration ord)│◄── linear scan
//!                 │ by_id: BTreeMap<id, entry>       │
//!                 └───────────────┬──────────────────┘
//!                                 │ match_entries(channel)
//!                                 ▼
//!                   sorted by id, deduplicated
//!                                 │
//!                                 ▼
//!                   CallbackBridge::invoke(entry, frame)
//! ```
//!
//! # Teardown
//!
//! `unsubscribe` removes the entry from the tables, then waits on the
//! entry's in-flight tracker until no other thread is running its callback.
//! Dispatch holding a stale `Arc<SubscriptionEntry>` finds the tracker
//! disabled and skips it.

pub mod entry;
pub mod error;
pub mod pattern;
pub mod store;

pub use entry::{Callback, SubscriptionEntry, SubscriptionId, SubscriptionInfo};
pub use error::RegistryError;
pub use pattern::Pattern;
pub use store::SubscriptionRegistry;
