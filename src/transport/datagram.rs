//! Packet transport over a datagram link
//!
//! Adapts any byte-level link that moves whole datagrams into a
//! [`Transport`]: outgoing messages are encoded (and fragmented at the link
//! MTU), incoming packets are decoded and reassembled.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use super::mailbox::{Mailbox, DEFAULT_MAILBOX_CAPACITY};
use super::Transport;
use crate::codec::{self, Packet, Reassembler, DEFAULT_MTU};
use crate::error::{RecvError, TransportError};
use crate::frame::{now_micros, Frame};

/// A link that carries whole datagrams
pub trait DatagramLink: Send + Sync {
    /// Send one datagram
    fn send_packet(&self, packet: &[u8]) -> Result<(), TransportError>;

    /// Receive one datagram, waiting up to `timeout` (zero never blocks)
    fn recv_packet(&self, timeout: Duration) -> Result<Bytes, RecvError>;

    /// Largest datagram the link carries
    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }

    /// Release the link
    fn close(&self);
}

/// Transport that speaks the packet codec over a [`DatagramLink`]
pub struct PacketTransport<L: DatagramLink> {
    link: L,
    next_seqno: AtomicU32,
    reassembler: Mutex<Reassembler>,
    malformed: AtomicU64,
}

impl<L: DatagramLink> PacketTransport<L> {
    /// Wrap a link
    pub fn new(link: L) -> Self {
        Self::with_reassembly_slots(link, codec::fragment::DEFAULT_MAX_PARTIALS)
    }

    /// Wrap a link, tracking at most `slots` partially received messages
    pub fn with_reassembly_slots(link: L, slots: usize) -> Self {
        Self {
            link,
            next_seqno: AtomicU32::new(0),
            reassembler: Mutex::new(Reassembler::with_max_partials(slots)),
            malformed: AtomicU64::new(0),
        }
    }

    /// The underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Packets rejected by the decoder so far
    pub fn malformed_packets(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

impl<L: DatagramLink> Transport for PacketTransport<L> {
    fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        let seqno = self.next_seqno.fetch_add(1, Ordering::Relaxed);
        let packets = codec::encode_packets(seqno, channel, payload, self.link.mtu())
            .map_err(|e| TransportError::Other(e.to_string()))?;

        for packet in &packets {
            self.link.send_packet(packet)?;
        }
        tracing::trace!(
            channel = %channel,
            seqno,
            packets = packets.len(),
            "Message sent"
        );
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Frame, RecvError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let packet = self.link.recv_packet(remaining)?;

            let decoded = codec::decode_packet(&packet).and_then(|p| match p {
                Packet::Short {
                    channel, payload, ..
                } => Ok(Some(Frame::from_owned(channel, payload, now_micros()))),
                Packet::Fragment(fragment) => self.reassembler.lock().push(fragment, now_micros()),
            });

            match decoded {
                Ok(Some(frame)) => return Ok(frame),
                // Partial message; keep reading until the link runs dry
                Ok(None) => continue,
                Err(e) => {
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                    return Err(RecvError::Malformed(e));
                }
            }
        }
    }

    fn close(&self) {
        self.link.close();
    }
}

/// In-memory datagram link, created in connected pairs
#[derive(Debug)]
pub struct MemoryLink {
    inbox: Arc<Mailbox<Bytes>>,
    outbox: Arc<Mailbox<Bytes>>,
    mtu: usize,
}

impl MemoryLink {
    /// Two links wired to each other
    pub fn pair(mtu: usize) -> (Self, Self) {
        let a = Arc::new(Mailbox::new(DEFAULT_MAILBOX_CAPACITY));
        let b = Arc::new(Mailbox::new(DEFAULT_MAILBOX_CAPACITY));
        (
            Self {
                inbox: Arc::clone(&a),
                outbox: Arc::clone(&b),
                mtu,
            },
            Self {
                inbox: b,
                outbox: a,
                mtu,
            },
        )
    }

    /// Inject raw bytes as if the peer had sent them
    pub fn inject(&self, packet: &[u8]) {
        self.inbox.push(Bytes::copy_from_slice(packet));
    }
}

impl DatagramLink for MemoryLink {
    fn send_packet(&self, packet: &[u8]) -> Result<(), TransportError> {
        if packet.len() > self.mtu {
            return Err(TransportError::MessageTooLarge {
                size: packet.len(),
                limit: self.mtu,
            });
        }
        if !self.outbox.push(Bytes::copy_from_slice(packet)) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn recv_packet(&self, timeout: Duration) -> Result<Bytes, RecvError> {
        self.inbox.pop(timeout)
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn close(&self) {
        self.inbox.close();
        self.outbox.close();
    }
}
