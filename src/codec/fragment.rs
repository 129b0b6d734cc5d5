//! Fragment reassembly
//!
//! Fragments of one message share a sequence number. The reassembler keeps a
//! bounded number of partial messages and a bounded number of buffered
//! bytes; when either limit is exceeded, the oldest partial message is
//! discarded. Memory is only taken for fragment data that actually arrived.

use std::collections::{BTreeMap, HashMap, VecDeque};

use bytes::{Bytes, BytesMut};

use super::packet::{Fragment, MAX_MESSAGE_SIZE};
use crate::error::CodecError;
use crate::frame::Frame;

/// Default number of concurrently tracked partial messages
pub const DEFAULT_MAX_PARTIALS: usize = 16;

/// Default bound on fragment bytes buffered across all partial messages
pub const DEFAULT_MAX_PARTIAL_BYTES: usize = MAX_MESSAGE_SIZE;

#[derive(Debug)]
struct Partial {
    channel: Option<String>,
    msg_size: u32,
    fragments_in_msg: u16,
    received: Vec<bool>,
    fragments_seen: u16,
    /// Fragment data keyed by message offset
    pieces: BTreeMap<u32, Bytes>,
    held: usize,
}

impl Partial {
    fn new(fragment: &Fragment) -> Self {
        Self {
            channel: None,
            msg_size: fragment.msg_size,
            fragments_in_msg: fragment.fragments_in_msg,
            received: vec![false; fragment.fragments_in_msg as usize],
            fragments_seen: 0,
            pieces: BTreeMap::new(),
            held: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.fragments_seen == self.fragments_in_msg
    }

    /// Join the pieces, which must tile the message exactly
    fn assemble(self) -> Result<(String, Bytes), CodecError> {
        let mut buf = BytesMut::with_capacity(self.msg_size as usize);
        for (offset, data) in &self.pieces {
            if *offset as usize != buf.len() {
                return Err(CodecError::MalformedFrame("fragments do not cover message"));
            }
            buf.extend_from_slice(data);
        }
        if buf.len() != self.msg_size as usize {
            return Err(CodecError::MalformedFrame("fragments do not cover message"));
        }
        let channel = self
            .channel
            .ok_or(CodecError::MalformedFrame("fragmented message without channel"))?;
        Ok((channel, buf.freeze()))
    }
}

/// Rebuilds fragmented messages into frames
#[derive(Debug)]
pub struct Reassembler {
    partials: HashMap<u32, Partial>,
    order: VecDeque<u32>,
    max_partials: usize,
    max_bytes: usize,
    held: usize,
    evicted: u64,
}

impl Reassembler {
    /// Create a reassembler with the default limits
    pub fn new() -> Self {
        Self::with_max_partials(DEFAULT_MAX_PARTIALS)
    }

    /// Create a reassembler tracking at most `max_partials` messages
    pub fn with_max_partials(max_partials: usize) -> Self {
        Self::with_limits(max_partials, DEFAULT_MAX_PARTIAL_BYTES)
    }

    /// Create a reassembler with explicit message and byte limits
    pub fn with_limits(max_partials: usize, max_bytes: usize) -> Self {
        Self {
            partials: HashMap::new(),
            order: VecDeque::new(),
            max_partials: max_partials.max(1),
            max_bytes,
            held: 0,
            evicted: 0,
        }
    }

    /// Number of messages currently being reassembled
    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    /// Fragment bytes buffered across all partial messages
    pub fn held_bytes(&self) -> usize {
        self.held
    }

    /// Number of partial messages discarded to make room
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Add a fragment
    ///
    /// Returns the completed frame once every fragment of its message has
    /// arrived. A fragment that contradicts earlier fragments of the same
    /// message discards that message and is reported as malformed.
    pub fn push(
        &mut self,
        fragment: Fragment,
        receive_time: i64,
    ) -> Result<Option<Frame>, CodecError> {
        let seqno = fragment.seqno;

        if let Some(existing) = self.partials.get(&seqno) {
            if existing.msg_size != fragment.msg_size
                || existing.fragments_in_msg != fragment.fragments_in_msg
            {
                self.discard(seqno);
                return Err(CodecError::MalformedFrame("inconsistent fragment header"));
            }
        } else {
            self.make_room();
            self.partials.insert(seqno, Partial::new(&fragment));
            self.order.push_back(seqno);
        }

        let Some(partial) = self.partials.get_mut(&seqno) else {
            return Ok(None);
        };

        let index = fragment.fragment_no as usize;
        if partial.received.get(index).copied().unwrap_or(true) {
            // Duplicate delivery
            return Ok(None);
        }

        let end = fragment.offset as u64 + fragment.data.len() as u64;
        if end > partial.msg_size as u64 {
            self.discard(seqno);
            return Err(CodecError::MalformedFrame("fragment exceeds message size"));
        }
        if partial.pieces.contains_key(&fragment.offset) {
            self.discard(seqno);
            return Err(CodecError::MalformedFrame("overlapping fragments"));
        }

        let len = fragment.data.len();
        partial.pieces.insert(fragment.offset, fragment.data);
        partial.held += len;
        partial.received[index] = true;
        partial.fragments_seen += 1;
        if let Some(channel) = fragment.channel {
            partial.channel = Some(channel);
        }
        let complete = partial.is_complete();
        self.held += len;

        if !complete {
            self.enforce_byte_limit(seqno);
            return Ok(None);
        }

        let Some(partial) = self.discard(seqno) else {
            return Ok(None);
        };
        let (channel, payload) = partial.assemble()?;
        Ok(Some(Frame::from_owned(channel, payload, receive_time)))
    }

    fn make_room(&mut self) {
        while self.partials.len() >= self.max_partials {
            if !self.evict_oldest(None) {
                break;
            }
        }
    }

    /// Evict other partial messages until the buffered bytes fit
    fn enforce_byte_limit(&mut self, keep: u32) {
        while self.held > self.max_bytes {
            if !self.evict_oldest(Some(keep)) {
                break;
            }
        }
    }

    fn evict_oldest(&mut self, keep: Option<u32>) -> bool {
        let Some(pos) = self.order.iter().position(|&s| Some(s) != keep) else {
            return false;
        };
        let Some(oldest) = self.order.remove(pos) else {
            return false;
        };
        if let Some(partial) = self.partials.remove(&oldest) {
            self.held -= partial.held;
            self.evicted += 1;
            tracing::debug!(
                seqno = oldest,
                bytes = partial.held,
                "Evicted incomplete fragmented message"
            );
        }
        true
    }

    fn discard(&mut self, seqno: u32) -> Option<Partial> {
        self.order.retain(|&s| s != seqno);
        let partial = self.partials.remove(&seqno)?;
        self.held -= partial.held;
        Some(partial)
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
