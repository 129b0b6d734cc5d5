//! Dispatch engine
//!
//! ```text
//!  Transport::recv ──► FrameQueue (bounded, drop oldest) ──► dispatch
//!                                                              │
//!                          SubscriptionRegistry::match_entries ◄┘
//!                                                              │
//!                           CallbackBridge::invoke (per entry) ◄┘
//! ```
//!
//! One loop owns the transport at a time: the caller of [`Bus::run`], the
//! thread spawned by [`Bus::start`], or a caller of [`Bus::handle`] and
//! friends.

pub mod config;
pub mod engine;
pub mod queue;
pub mod state;

pub use config::{BusConfig, DEFAULT_QUEUE_SIZE, DEFAULT_RECEIVE_TIMEOUT};
pub use engine::Bus;
pub use queue::FrameQueue;
pub use state::EngineState;
