//! Frame type
//!
//! A [`Frame`] is one in-flight message: the channel it was sent on, its
//! payload and the time it was received.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Current time in microseconds since the Unix epoch
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// A received or published message
///
/// The payload is always an owned copy of the bytes it was built from, so a
/// frame never outlives or aliases caller memory. Cloning only bumps the
/// `Bytes` reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    channel: String,
    payload: Bytes,
    receive_time: i64,
}

impl Frame {
    /// Create a frame stamped with the current time
    pub fn new(channel: impl Into<String>, payload: &[u8]) -> Self {
        Self::with_time(channel, payload, now_micros())
    }

    /// Create a frame with an explicit receive time (µs)
    pub fn with_time(channel: impl Into<String>, payload: &[u8], receive_time: i64) -> Self {
        Self {
            channel: channel.into(),
            payload: Bytes::copy_from_slice(payload),
            receive_time,
        }
    }

    /// Build a frame around an already-owned buffer
    pub(crate) fn from_owned(channel: String, payload: Bytes, receive_time: i64) -> Self {
        Self {
            channel,
            payload,
            receive_time,
        }
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Payload bytes
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Receive time in microseconds
    pub fn receive_time(&self) -> i64 {
        self.receive_time
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_copies_payload() {
        let mut buf = vec![1u8, 2, 3];
        let frame = Frame::with_time("chan", &buf, 42);
        buf[0] = 99;

        assert_eq!(frame.payload().as_ref(), &[1, 2, 3]);
        assert_eq!(frame.channel(), "chan");
        assert_eq!(frame.receive_time(), 42);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_now_micros_advances() {
        let a = now_micros();
        let b = now_micros();
        assert!(a > 0);
        assert!(b >= a);
    }
}
