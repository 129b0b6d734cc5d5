//! Event log
//!
//! A durable, append-only sequence of [`LogEvent`]s.
//!
//! ```text
//!  Bus ──► LogRecorder ──► LogFile (w/a) ──► record::encode ──► disk
//!
//!  disk ──► LogFile (r) ──► read_next / read_prev / seek ──► LogPlayer ──► Bus
//!                 │
//!                 └── SparseIndex (built on first seek)
//! ```
//!
//! Event numbers start at 0 and increase by one per write with no gaps;
//! append mode continues after the last valid record already in the file.

pub mod event;
pub mod file;
pub mod index;
pub mod player;
pub mod record;
pub mod recorder;

pub use event::LogEvent;
pub use file::{LogConfig, LogFile, LogMode, DEFAULT_INDEX_STRIDE};
pub use index::{IndexEntry, SparseIndex};
pub use player::LogPlayer;
pub use record::RECORD_MAGIC;
pub use recorder::LogRecorder;
