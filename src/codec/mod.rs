//! Frame codec
//!
//! Turns `(channel, payload)` pairs into transport packets and back. The
//! functions here are pure; the only stateful piece is the [`Reassembler`]
//! which a datagram transport keeps per link.
//!
//! ```text
//!  publish("POSE", bytes)
//!         │
//!         ▼
//!  encode_packets(seqno, mtu) ──► [LC02 packet]            (fits MTU)
//!                             └─► [LC03][LC03][LC03] ...   (fragmented)
//!                                        │
//!                                        ▼
//!                 decode_packet() ──► Reassembler::push() ──► Frame
//! ```

pub mod fragment;
pub mod packet;

pub use fragment::Reassembler;
pub use packet::{
    decode, decode_packet, encode, encode_packets, encode_short, validate_channel, Fragment,
    Packet, DEFAULT_MTU, MAX_CHANNEL_LEN, MAX_MESSAGE_SIZE, MIN_MTU,
};
