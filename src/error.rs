//! Error types
//!
//! Each layer of the bus has its own error enum. Registry and log errors are
//! returned synchronously to the caller; transport and codec errors raised
//! inside the dispatch loop are absorbed, counted and handed to the
//! [`ErrorSink`](crate::bridge::ErrorSink) instead.

use std::io;

use thiserror::Error;

pub use crate::registry::RegistryError;
use crate::registry::SubscriptionId;

/// Result alias for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Failure to build a bus from a transport selector
#[derive(Debug, Clone, Error)]
pub enum ConstructionError {
    /// The selector string could not be parsed
    #[error("invalid transport url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The selector is well formed but no built-in transport serves it
    #[error("unsupported transport scheme '{0}'")]
    Unsupported(String),
}

/// Send/receive failure reported by a transport (recoverable)
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been closed
    #[error("transport closed")]
    Closed,

    /// The payload does not fit the transport
    #[error("message of {size} bytes exceeds transport limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// Underlying I/O failure
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// Anything else the transport wants to report
    #[error("{0}")]
    Other(String),
}

/// Why a `recv` call produced no frame
#[derive(Debug, Error)]
pub enum RecvError {
    /// Nothing arrived within the timeout (or immediately, for nonblocking)
    #[error("receive timed out")]
    Timeout,

    /// The transport has been closed
    #[error("transport closed")]
    Closed,

    /// Bytes arrived but did not decode into a frame
    #[error(transparent)]
    Malformed(#[from] CodecError),

    /// The transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Frame codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Channel name exceeds [`MAX_CHANNEL_LEN`](crate::codec::MAX_CHANNEL_LEN)
    #[error("channel name is {len} bytes, limit is {max}")]
    ChannelNameTooLong { len: usize, max: usize },

    /// Channel name is empty
    #[error("channel name is empty")]
    EmptyChannel,

    /// Payload cannot be represented in the packet format
    #[error("message of {len} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },

    /// Input bytes are not a valid packet
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}

/// Event log errors
#[derive(Debug, Error)]
pub enum LogError {
    /// Write attempted on a log opened for reading
    #[error("log file is not writable")]
    LogFileNotWritable,

    /// Read attempted on a log opened for writing
    #[error("log file is not readable")]
    LogFileNotReadable,

    /// Cursor is at the end of the log
    #[error("end of log")]
    EndOfLog,

    /// Cursor is at the start of the log
    #[error("start of log")]
    StartOfLog,

    /// No valid record starts at this offset
    #[error("no record starts at offset {0}")]
    InvalidOffset(u64),

    /// Operation on a closed log
    #[error("log file is closed")]
    LogFileClosed,

    /// Unknown open mode string
    #[error("invalid log mode '{0}', expected \"r\", \"w\" or \"a\"")]
    InvalidMode(String),

    /// Event does not fit the record format
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Underlying I/O failure
    #[error("log I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Dispatch engine errors
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus failed construction; every call returns this
    #[error("bus is not initialized")]
    NotInitialized,

    /// Operation not allowed in the current engine state
    #[error("operation '{op}' not allowed while {state}")]
    InvalidState { op: &'static str, state: &'static str },

    /// Queue size must be positive
    #[error("queue size must be greater than zero")]
    InvalidQueueSize,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("topology serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Problems observed inside the dispatch loop, reported to the error sink
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// A callback panicked; dispatch continued with the next subscription
    #[error("callback for subscription {subscription} on '{channel}' panicked: {message}")]
    CallbackPanicked {
        subscription: SubscriptionId,
        channel: String,
        message: String,
    },

    /// Corrupt bytes from the transport were dropped
    #[error("dropped malformed frame: {0}")]
    MalformedFrame(CodecError),

    /// The transport failed while receiving
    #[error("transport receive failed: {0}")]
    Transport(String),

    /// Frames were evicted from the pending queue
    #[error("queue overflow dropped {count} frame(s)")]
    QueueOverflow { count: u64 },
}
