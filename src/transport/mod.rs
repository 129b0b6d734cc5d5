//! Transports
//!
//! The bus only needs a transport to send `(channel, bytes)`, receive a
//! [`Frame`] with a timeout, and close. Wire-level transports (IPC, UDP
//! multicast, serial) live outside this crate and plug in through the
//! [`Transport`] trait, or through [`DatagramLink`] when they move raw
//! datagrams and want the packet codec to do framing.

pub mod datagram;
pub mod inproc;
pub mod mailbox;
pub mod url;

use std::time::Duration;

pub use datagram::{DatagramLink, MemoryLink, PacketTransport};
pub use inproc::InprocTransport;
pub use url::TransportUrl;

use crate::error::{ConstructionError, RecvError, TransportError};
use crate::frame::Frame;

/// Byte-level channel send/receive
pub trait Transport: Send + Sync {
    /// Send a payload on a channel
    fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Receive the next frame, waiting up to `timeout`
    ///
    /// A zero timeout makes the call nonblocking.
    fn recv(&self, timeout: Duration) -> Result<Frame, RecvError>;

    /// Push out anything buffered for sending
    fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Frames discarded by the transport's own receive buffer so far
    fn dropped(&self) -> u64 {
        0
    }

    /// Release the transport; later sends fail and receives report `Closed`
    fn close(&self);
}

/// Build one of the built-in transports from a selector
pub fn open(url: &TransportUrl) -> Result<Box<dyn Transport>, ConstructionError> {
    match url.scheme.as_str() {
        "inproc" => {
            let transport = if url.address.is_empty() {
                InprocTransport::new()
            } else {
                match url.param("capacity") {
                    Some(cap) => {
                        let cap = cap.parse().map_err(|_| ConstructionError::InvalidUrl {
                            url: url.to_string(),
                            reason: "capacity must be a positive integer".to_string(),
                        })?;
                        InprocTransport::connect_with_capacity(&url.address, cap)
                    }
                    None => InprocTransport::connect(&url.address),
                }
            };
            Ok(Box::new(transport))
        }
        other => Err(ConstructionError::Unsupported(other.to_string())),
    }
}
