//! Packet encoder and decoder
//!
//! Two packet kinds share a 4-byte magic prefix, all integers big-endian:
//!
//! ```text
//! Short (whole message in one packet):
//! +-------------+-----------+-------------------+------+-------------+
//! | magic "LC02"| seqno(4)  | channel (1..255)  | 0x00 | payload ... |
//! +-------------+-----------+-------------------+------+-------------+
//!
//! Fragment (one piece of a larger message):
//! +-------------+-----------+-------------+-------------+-----------+-----------+
//! | magic "LC03"| seqno(4)  | msg_size(4) | offset(4)   | frag_no(2)| n_frags(2)|
//! +-------------+-----------+-------------+-------------+-----------+-----------+
//! | channel + 0x00 (fragment 0 only)  | fragment data ...                      |
//! +-----------------------------------+----------------------------------------+
//! ```
//!
//! Input is treated as untrusted: every length is checked before it is used
//! and decoding never panics.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::frame::{now_micros, Frame};

/// Magic for a short (unfragmented) packet
pub const SHORT_MAGIC: u32 = 0x4C43_3032;

/// Magic for a fragment packet
pub const FRAGMENT_MAGIC: u32 = 0x4C43_3033;

/// Longest channel name the codec accepts, in bytes
pub const MAX_CHANNEL_LEN: usize = 255;

/// Largest message the codec will encode or reassemble
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Short packet header size (magic + seqno)
pub const SHORT_HEADER_SIZE: usize = 8;

/// Fragment packet header size
pub const FRAGMENT_HEADER_SIZE: usize = 20;

/// Smallest MTU that still fits a fragment header, a maximal channel and one data byte
pub const MIN_MTU: usize = FRAGMENT_HEADER_SIZE + MAX_CHANNEL_LEN + 2;

/// Default MTU for datagram links (Ethernet UDP payload)
pub const DEFAULT_MTU: usize = 1472;

/// One piece of a fragmented message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Message sequence number shared by all fragments
    pub seqno: u32,
    /// Total message size in bytes
    pub msg_size: u32,
    /// Byte offset of this fragment's data within the message
    pub offset: u32,
    /// Index of this fragment
    pub fragment_no: u16,
    /// Number of fragments in the message
    pub fragments_in_msg: u16,
    /// Channel name, present on fragment 0 only
    pub channel: Option<String>,
    /// Fragment data
    pub data: Bytes,
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Complete message
    Short {
        seqno: u32,
        channel: String,
        payload: Bytes,
    },
    /// Piece of a larger message, see [`Reassembler`](super::Reassembler)
    Fragment(Fragment),
}

/// Check a channel name against the codec limits
pub fn validate_channel(channel: &str) -> Result<(), CodecError> {
    if channel.is_empty() {
        return Err(CodecError::EmptyChannel);
    }
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(CodecError::ChannelNameTooLong {
            len: channel.len(),
            max: MAX_CHANNEL_LEN,
        });
    }
    if channel.as_bytes().contains(&0) {
        return Err(CodecError::MalformedFrame("channel contains NUL byte"));
    }
    Ok(())
}

/// Encode a message as a single short packet with sequence number 0
pub fn encode(channel: &str, payload: &[u8]) -> Result<Bytes, CodecError> {
    encode_short(0, channel, payload)
}

/// Encode a message as a single short packet
pub fn encode_short(seqno: u32, channel: &str, payload: &[u8]) -> Result<Bytes, CodecError> {
    validate_channel(channel)?;
    check_message_size(payload.len())?;

    let mut buf = BytesMut::with_capacity(SHORT_HEADER_SIZE + channel.len() + 1 + payload.len());
    buf.put_u32(SHORT_MAGIC);
    buf.put_u32(seqno);
    buf.put_slice(channel.as_bytes());
    buf.put_u8(0);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode a message into as many packets as needed to respect `mtu`
///
/// Messages that fit are sent as one short packet; larger ones are split
/// into fragments. MTUs below [`MIN_MTU`] are raised to it.
pub fn encode_packets(
    seqno: u32,
    channel: &str,
    payload: &[u8],
    mtu: usize,
) -> Result<Vec<Bytes>, CodecError> {
    validate_channel(channel)?;
    check_message_size(payload.len())?;

    let mtu = mtu.max(MIN_MTU);
    if SHORT_HEADER_SIZE + channel.len() + 1 + payload.len() <= mtu {
        return Ok(vec![encode_short(seqno, channel, payload)?]);
    }

    let first_capacity = mtu - FRAGMENT_HEADER_SIZE - channel.len() - 1;
    let rest_capacity = mtu - FRAGMENT_HEADER_SIZE;
    let remaining_after_first = payload.len().saturating_sub(first_capacity);
    let count = 1 + remaining_after_first.div_ceil(rest_capacity);
    if count > u16::MAX as usize {
        return Err(CodecError::MessageTooLarge {
            len: payload.len(),
            max: first_capacity + rest_capacity * (u16::MAX as usize - 1),
        });
    }

    let mut packets = Vec::with_capacity(count);
    let mut offset = 0usize;
    for fragment_no in 0..count {
        let capacity = if fragment_no == 0 {
            first_capacity
        } else {
            rest_capacity
        };
        let end = (offset + capacity).min(payload.len());
        let data = &payload[offset..end];

        let mut buf = BytesMut::with_capacity(mtu);
        buf.put_u32(FRAGMENT_MAGIC);
        buf.put_u32(seqno);
        buf.put_u32(payload.len() as u32);
        buf.put_u32(offset as u32);
        buf.put_u16(fragment_no as u16);
        buf.put_u16(count as u16);
        if fragment_no == 0 {
            buf.put_slice(channel.as_bytes());
            buf.put_u8(0);
        }
        buf.put_slice(data);
        packets.push(buf.freeze());

        offset = end;
    }

    Ok(packets)
}

/// Decode a short packet into a frame stamped with the current time
///
/// Fragment packets are rejected; feed them through
/// [`decode_packet`] and a [`Reassembler`](super::Reassembler).
pub fn decode(data: &[u8]) -> Result<Frame, CodecError> {
    match decode_packet(data)? {
        Packet::Short {
            channel, payload, ..
        } => Ok(Frame::from_owned(channel, payload, now_micros())),
        Packet::Fragment(_) => Err(CodecError::MalformedFrame(
            "fragment packet outside reassembly",
        )),
    }
}

/// Decode any packet kind
pub fn decode_packet(data: &[u8]) -> Result<Packet, CodecError> {
    let mut buf = data;
    if buf.remaining() < SHORT_HEADER_SIZE {
        return Err(CodecError::MalformedFrame("packet shorter than header"));
    }

    let magic = buf.get_u32();
    let seqno = buf.get_u32();

    match magic {
        SHORT_MAGIC => {
            let channel = read_channel(&mut buf)?;
            Ok(Packet::Short {
                seqno,
                channel,
                payload: Bytes::copy_from_slice(buf),
            })
        }
        FRAGMENT_MAGIC => {
            if buf.remaining() < FRAGMENT_HEADER_SIZE - SHORT_HEADER_SIZE {
                return Err(CodecError::MalformedFrame("fragment header truncated"));
            }
            let msg_size = buf.get_u32();
            let offset = buf.get_u32();
            let fragment_no = buf.get_u16();
            let fragments_in_msg = buf.get_u16();

            if fragments_in_msg == 0 || fragment_no >= fragments_in_msg {
                return Err(CodecError::MalformedFrame("fragment index out of range"));
            }
            if msg_size as usize > MAX_MESSAGE_SIZE {
                return Err(CodecError::MalformedFrame("fragmented message too large"));
            }

            let channel = if fragment_no == 0 {
                Some(read_channel(&mut buf)?)
            } else {
                None
            };

            let end = offset as u64 + buf.remaining() as u64;
            if end > msg_size as u64 {
                return Err(CodecError::MalformedFrame("fragment exceeds message size"));
            }

            Ok(Packet::Fragment(Fragment {
                seqno,
                msg_size,
                offset,
                fragment_no,
                fragments_in_msg,
                channel,
                data: Bytes::copy_from_slice(buf),
            }))
        }
        _ => Err(CodecError::MalformedFrame("bad magic")),
    }
}

fn check_message_size(len: usize) -> Result<(), CodecError> {
    if len > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Read a NUL-terminated channel name, consuming the terminator
fn read_channel(buf: &mut &[u8]) -> Result<String, CodecError> {
    let window = &buf[..buf.len().min(MAX_CHANNEL_LEN + 1)];
    let nul = window
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::MalformedFrame("unterminated channel name"))?;
    if nul == 0 {
        return Err(CodecError::MalformedFrame("empty channel name"));
    }

    let channel = std::str::from_utf8(&buf[..nul])
        .map_err(|_| CodecError::MalformedFrame("channel name is not UTF-8"))?
        .to_owned();
    buf.advance(nul + 1);
    Ok(channel)
}
