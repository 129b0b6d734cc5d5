//! zcm-rs: transport-agnostic publish/subscribe bus with a durable event log
//!
//! # Overview
//!
//! ```text
//!  Transport ──► Frame Codec ──► Bus (queue + dispatch) ──► SubscriptionRegistry
//!                                                                  │
//!                                        user callback ◄── CallbackBridge
//!
//!  Bus ◄──► LogRecorder / LogPlayer ◄──► LogFile
//! ```
//!
//! - [`bus`]: dispatch engine with an owned or caller-driven loop
//! - [`registry`]: exact and regex channel subscriptions
//! - [`bridge`]: execution gate and panic isolation around callbacks
//! - [`codec`]: LCM-style packet format with fragmentation
//! - [`transport`]: the `Transport` trait plus in-process and datagram adapters
//! - [`log`]: binary event log with bidirectional reads and timestamp seek
//!
//! # Example
//!
//! ```no_run
//! use zcm_rs::Bus;
//!
//! let bus = Bus::new("inproc");
//! bus.subscribe("POSE.*", |frame| {
//!     println!("{} bytes on {}", frame.len(), frame.channel());
//! })?;
//! bus.start()?;
//! bus.publish("POSE_LEFT", b"\x01\x02")?;
//! bus.stop()?;
//! # Ok::<(), zcm_rs::BusError>(())
//! ```

pub mod bridge;
pub mod bus;
pub mod codec;
pub mod error;
pub mod frame;
pub mod log;
pub mod registry;
pub mod stats;
pub mod topology;
pub mod transport;

pub use bridge::{ErrorSink, ExecutionGate, MutexGate, NoGate};
pub use bus::{Bus, BusConfig, EngineState};
pub use error::{
    BusError, CodecError, ConstructionError, DispatchError, LogError, RecvError, RegistryError,
    Result, TransportError,
};
pub use frame::Frame;
pub use log::{LogConfig, LogEvent, LogFile, LogMode, LogPlayer, LogRecorder};
pub use registry::{Pattern, SubscriptionId, SubscriptionInfo};
pub use stats::{BusStats, ChannelStats};
pub use topology::Topology;
pub use transport::{Transport, TransportUrl};
