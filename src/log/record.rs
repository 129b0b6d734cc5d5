//! On-disk record format
//!
//! Every event is stored as one self-delimiting record, big-endian:
//!
//! ```text
//! +-----------+-------------+-------------+----------------+---------+
//! | magic (4) | eventnum(8) | timestamp(8)| channellen (4) | channel |
//! +-----------+-------------+-------------+----------------+---------+
//! | datalen(4)| data        | crc32 (4)   |
//! +-----------+-------------+-------------+
//! ```
//!
//! The CRC covers everything from `eventnum` through `data`. The magic
//! marker lets readers find the next record after corrupt bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::event::LogEvent;
use crate::codec::{self, MAX_CHANNEL_LEN, MAX_MESSAGE_SIZE};
use crate::error::CodecError;

/// Record start marker
pub const RECORD_MAGIC: u32 = 0xEDA1_DA01;

/// `RECORD_MAGIC` as it appears in the file
pub const MAGIC_BYTES: [u8; 4] = RECORD_MAGIC.to_be_bytes();

/// Bytes from the magic through `channellen`
pub const PREFIX_LEN: usize = 4 + 8 + 8 + 4;

/// Fixed bytes in every record
pub const RECORD_OVERHEAD: usize = PREFIX_LEN + 4 + 4;

/// Smallest possible record (one-byte channel, no data)
pub const MIN_RECORD_LEN: usize = RECORD_OVERHEAD + 1;

/// Largest record the decoder accepts
pub const MAX_RECORD_LEN: usize = RECORD_OVERHEAD + MAX_CHANNEL_LEN + MAX_MESSAGE_SIZE;

/// Total size of a record with the given channel and data lengths
pub fn encoded_len(channel_len: usize, data_len: usize) -> usize {
    RECORD_OVERHEAD + channel_len + data_len
}

/// Encode an event as a record numbered `eventnum`
pub fn encode(eventnum: i64, event: &LogEvent) -> Result<Bytes, CodecError> {
    codec::validate_channel(&event.channel)?;
    let data = event.data();
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            len: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(encoded_len(event.channel.len(), data.len()));
    buf.put_u32(RECORD_MAGIC);
    buf.put_i64(eventnum);
    buf.put_i64(event.timestamp);
    buf.put_i32(event.channel.len() as i32);
    buf.put_slice(event.channel.as_bytes());
    buf.put_i32(data.len() as i32);
    buf.put_slice(data);

    let crc = crc32fast::hash(&buf[4..]);
    buf.put_u32(crc);
    Ok(buf.freeze())
}

/// Validate a record prefix and return the channel length it declares
pub fn channel_len(prefix: &[u8]) -> Result<usize, CodecError> {
    let mut buf = prefix;
    if buf.remaining() < PREFIX_LEN {
        return Err(CodecError::MalformedFrame("record prefix truncated"));
    }
    if buf.get_u32() != RECORD_MAGIC {
        return Err(CodecError::MalformedFrame("bad record magic"));
    }
    buf.advance(16);
    checked_len(buf.get_i32(), 1, MAX_CHANNEL_LEN, "channel length out of range")
}

/// Validate a `datalen` field
pub fn data_len(raw: i32) -> Result<usize, CodecError> {
    checked_len(raw, 0, MAX_MESSAGE_SIZE, "data length out of range")
}

fn checked_len(
    raw: i32,
    min: usize,
    max: usize,
    reason: &'static str,
) -> Result<usize, CodecError> {
    usize::try_from(raw)
        .ok()
        .filter(|len| (min..=max).contains(len))
        .ok_or(CodecError::MalformedFrame(reason))
}

/// Decode one complete record from the start of `record`
///
/// Returns the event and the number of bytes the record occupies.
pub fn decode(record: &[u8]) -> Result<(LogEvent, usize), CodecError> {
    let channel_len = channel_len(record)?;
    let mut buf = &record[4..];
    let eventnum = buf.get_i64();
    let timestamp = buf.get_i64();
    buf.advance(4);

    if buf.remaining() < channel_len + 4 {
        return Err(CodecError::MalformedFrame("record channel truncated"));
    }
    let channel = std::str::from_utf8(&buf[..channel_len])
        .map_err(|_| CodecError::MalformedFrame("channel is not UTF-8"))?
        .to_string();
    buf.advance(channel_len);

    let data_len = data_len(buf.get_i32())?;
    if buf.remaining() < data_len + 4 {
        return Err(CodecError::MalformedFrame("record data truncated"));
    }
    let data = Bytes::copy_from_slice(&buf[..data_len]);
    buf.advance(data_len);

    let total = encoded_len(channel_len, data_len);
    let expected = buf.get_u32();
    if crc32fast::hash(&record[4..total - 4]) != expected {
        return Err(CodecError::MalformedFrame("record checksum mismatch"));
    }

    Ok((LogEvent::from_parts(eventnum, timestamp, channel, data), total))
}
