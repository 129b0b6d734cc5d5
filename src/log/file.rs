//! Log file access
//!
//! A [`LogFile`] is opened either for reading or for writing, never both.
//! Readers keep a byte cursor that moves forward with `read_next_event`,
//! backward with `read_prev_event`, and jumps with `read_event_at_offset`
//! and `seek_to_timestamp`. Corrupt or torn records are skipped by scanning
//! for the next record marker.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::event::LogEvent;
use super::index::SparseIndex;
use super::record::{self, MAGIC_BYTES, MAX_RECORD_LEN, MIN_RECORD_LEN, PREFIX_LEN};
use crate::error::LogError;

/// Bytes read per step while scanning for a record marker
const SCAN_CHUNK: u64 = 64 * 1024;

/// Default number of records between sparse index entries
pub const DEFAULT_INDEX_STRIDE: usize = 64;

/// How a log file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Read existing events
    Read,
    /// Create or truncate, then write from event 0
    Write,
    /// Create if needed, then write after the last valid event
    Append,
}

impl LogMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogMode::Read => "r",
            LogMode::Write => "w",
            LogMode::Append => "a",
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, LogMode::Read)
    }
}

impl FromStr for LogMode {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" | "read" => Ok(LogMode::Read),
            "w" | "write" => Ok(LogMode::Write),
            "a" | "append" => Ok(LogMode::Append),
            other => Err(LogError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log file options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Records between entries of the timestamp index
    pub index_stride: usize,

    /// Whether `flush()` and `close()` also sync data to disk
    pub sync_on_flush: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            index_stride: DEFAULT_INDEX_STRIDE,
            sync_on_flush: false,
        }
    }
}

impl LogConfig {
    pub fn index_stride(mut self, stride: usize) -> Self {
        self.index_stride = stride.max(1);
        self
    }

    pub fn sync_on_flush(mut self, sync: bool) -> Self {
        self.sync_on_flush = sync;
        self
    }
}

/// A record found in the file: start offset, event, encoded length
type Located = (u64, LogEvent, u64);

#[derive(Debug)]
struct Reader {
    file: BufReader<File>,
    /// Position of the underlying file after the last read
    pos: u64,
    len: u64,
    cursor: u64,
    index: Option<SparseIndex>,
}

impl Reader {
    fn new(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: BufReader::new(file),
            pos: 0,
            len,
            cursor: 0,
            index: None,
        })
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if self.pos != offset {
            self.file.seek(SeekFrom::Start(offset))?;
            self.pos = offset;
        }
        match self.file.read_exact(buf) {
            Ok(()) => {
                self.pos += buf.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.pos = u64::MAX;
                Err(e)
            }
        }
    }

    /// Pick up bytes appended since the file was opened
    fn refresh_len(&mut self) -> io::Result<()> {
        self.len = self.file.get_ref().metadata()?.len();
        Ok(())
    }

    /// Decode the record starting exactly at `offset`, if it is valid
    fn record_at(&mut self, offset: u64) -> io::Result<Option<(LogEvent, u64)>> {
        let len = self.len;
        let fits = |n: usize| offset.checked_add(n as u64).is_some_and(|end| end <= len);

        if !fits(PREFIX_LEN) {
            return Ok(None);
        }
        let mut buf = vec![0u8; PREFIX_LEN];
        self.read_exact_at(offset, &mut buf)?;
        let Ok(channel_len) = record::channel_len(&buf) else {
            return Ok(None);
        };

        let head = PREFIX_LEN + channel_len + 4;
        if !fits(head) {
            return Ok(None);
        }
        buf.resize(head, 0);
        self.read_exact_at(offset + PREFIX_LEN as u64, &mut buf[PREFIX_LEN..])?;

        let mut raw = [0u8; 4];
        raw.copy_from_slice(&buf[head - 4..]);
        let Ok(data_len) = record::data_len(i32::from_be_bytes(raw)) else {
            return Ok(None);
        };

        let total = record::encoded_len(channel_len, data_len);
        if !fits(total) {
            return Ok(None);
        }
        buf.resize(total, 0);
        self.read_exact_at(offset + head as u64, &mut buf[head..])?;

        Ok(record::decode(&buf)
            .ok()
            .map(|(event, used)| (event, used as u64)))
    }

    /// First valid record starting at or after `from`
    fn scan_forward(&mut self, from: u64) -> io::Result<Option<Located>> {
        let mut pos = from;
        while pos + MIN_RECORD_LEN as u64 <= self.len {
            let chunk = SCAN_CHUNK.min(self.len - pos);
            let mut buf = vec![0u8; chunk as usize];
            self.read_exact_at(pos, &mut buf)?;

            for (i, window) in buf.windows(4).enumerate() {
                if window == &MAGIC_BYTES[..] {
                    let offset = pos + i as u64;
                    if let Some((event, len)) = self.record_at(offset)? {
                        return Ok(Some((offset, event, len)));
                    }
                }
            }
            // Overlap so a marker split across chunks is still seen
            pos += chunk.saturating_sub(3).max(1);
        }
        Ok(None)
    }

    /// Valid record ending exactly at `before`
    ///
    /// A marker inside some record's payload can decode as a record of its
    /// own, so the record whose end lines up with `before` wins. Without one
    /// (corrupt or torn bytes just before `before`) the nearest valid record
    /// ending earlier is returned instead.
    fn scan_backward(&mut self, before: u64) -> io::Result<Option<Located>> {
        if before < MIN_RECORD_LEN as u64 {
            return Ok(None);
        }
        // No record ending at `before` can start below this
        let floor = before.saturating_sub(MAX_RECORD_LEN as u64);
        let mut nearest: Option<Located> = None;

        // Candidate starts are below `hi`
        let mut hi = before - MIN_RECORD_LEN as u64 + 1;
        while hi > 0 && !(nearest.is_some() && hi <= floor) {
            let lo = hi.saturating_sub(SCAN_CHUNK);
            let read_end = (hi + 3).min(self.len);
            let mut buf = vec![0u8; (read_end - lo) as usize];
            self.read_exact_at(lo, &mut buf)?;

            for i in (0..(hi - lo) as usize).rev() {
                if buf.get(i..i + 4) != Some(&MAGIC_BYTES[..]) {
                    continue;
                }
                let offset = lo + i as u64;
                let Some((event, len)) = self.record_at(offset)? else {
                    continue;
                };
                let end = offset + len;
                if end == before {
                    return Ok(Some((offset, event, len)));
                }
                if end < before && nearest.is_none() {
                    nearest = Some((offset, event, len));
                }
            }
            hi = lo;
        }
        Ok(nearest)
    }

    /// Next valid record at or after `from`, skipping corrupt bytes
    fn next_from(&mut self, from: u64) -> io::Result<Option<Located>> {
        if let Some((event, len)) = self.record_at(from)? {
            return Ok(Some((from, event, len)));
        }
        let found = self.scan_forward(from + 1)?;
        match &found {
            Some((offset, _, _)) => {
                tracing::warn!(offset = from, skipped = offset - from, "Skipped corrupt log bytes");
            }
            None if from < self.len => {
                tracing::debug!(
                    offset = from,
                    trailing = self.len - from,
                    "No complete record at log tail"
                );
            }
            None => {}
        }
        Ok(found)
    }

    fn read_next(&mut self) -> Result<LogEvent, LogError> {
        if self.cursor + MIN_RECORD_LEN as u64 > self.len {
            self.refresh_len()?;
        }
        match self.next_from(self.cursor)? {
            Some((offset, event, len)) => {
                self.cursor = offset + len;
                Ok(event)
            }
            None => Err(LogError::EndOfLog),
        }
    }

    fn read_prev(&mut self) -> Result<LogEvent, LogError> {
        match self.scan_backward(self.cursor)? {
            Some((offset, event, _)) => {
                self.cursor = offset;
                Ok(event)
            }
            None => Err(LogError::StartOfLog),
        }
    }

    fn read_at(&mut self, offset: u64) -> Result<LogEvent, LogError> {
        if offset >= self.len {
            self.refresh_len()?;
        }
        match self.record_at(offset)? {
            Some((event, len)) => {
                self.cursor = offset + len;
                Ok(event)
            }
            None => Err(LogError::InvalidOffset(offset)),
        }
    }

    fn build_index(&mut self, stride: usize) -> io::Result<SparseIndex> {
        let mut index = SparseIndex::new(stride);
        let mut pos = 0;
        while let Some((offset, event, len)) = self.next_from(pos)? {
            index.observe(offset, event.timestamp);
            pos = offset + len;
        }
        tracing::debug!(
            records = index.records(),
            entries = index.entries().len(),
            monotonic = index.is_monotonic(),
            "Log index built"
        );
        Ok(index)
    }

    fn seek_to_timestamp(&mut self, timestamp: i64, stride: usize) -> Result<(), LogError> {
        self.refresh_len()?;
        let index = match self.index.take() {
            Some(index) => index,
            None => self.build_index(stride)?,
        };
        let start = index.scan_start(timestamp);
        self.index = Some(index);

        let Some(mut pos) = start else {
            self.cursor = self.len;
            return Ok(());
        };
        while let Some((offset, event, len)) = self.next_from(pos)? {
            if event.timestamp >= timestamp {
                self.cursor = offset;
                return Ok(());
            }
            pos = offset + len;
        }
        self.cursor = self.len;
        Ok(())
    }
}

#[derive(Debug)]
struct Writer {
    file: BufWriter<File>,
    offset: u64,
    next_eventnum: i64,
}

impl Writer {
    fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            file: BufWriter::new(file),
            offset: 0,
            next_eventnum: 0,
        })
    }

    fn append(path: &Path) -> io::Result<Self> {
        let next_eventnum = match File::open(path) {
            Ok(file) => {
                let mut reader = Reader::new(file)?;
                let end = reader.len;
                match reader.scan_backward(end)? {
                    Some((_, last, _)) => last.eventnum + 1,
                    None => 0,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();
        Ok(Self {
            file: BufWriter::new(file),
            offset,
            next_eventnum,
        })
    }

    fn write(&mut self, event: &LogEvent) -> Result<i64, LogError> {
        let eventnum = self.next_eventnum;
        let bytes = record::encode(eventnum, event)?;
        self.file.write_all(&bytes)?;
        self.offset += bytes.len() as u64;
        self.next_eventnum += 1;
        tracing::trace!(eventnum, channel = %event.channel, bytes = bytes.len(), "Event written");
        Ok(eventnum)
    }

    fn flush(&mut self, sync: bool) -> io::Result<()> {
        self.file.flush()?;
        if sync {
            self.file.get_ref().sync_data()?;
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Access {
    Reader(Reader),
    Writer(Writer),
}

/// An event log on disk
///
/// Not meant to be shared between threads; every operation takes
/// `&mut self`. Wrap it in a mutex to hand it to a callback.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    mode: LogMode,
    config: LogConfig,
    access: Option<Access>,
    good: bool,
}

impl LogFile {
    /// Open a log with default options
    pub fn open(path: impl AsRef<Path>, mode: LogMode) -> Result<Self, LogError> {
        Self::open_with_config(path, mode, LogConfig::default())
    }

    /// Open a log
    pub fn open_with_config(
        path: impl AsRef<Path>,
        mode: LogMode,
        config: LogConfig,
    ) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let access = match mode {
            LogMode::Read => Access::Reader(Reader::new(File::open(&path)?)?),
            LogMode::Write => Access::Writer(Writer::create(&path)?),
            LogMode::Append => Access::Writer(Writer::append(&path)?),
        };
        if let Access::Writer(writer) = &access {
            tracing::debug!(
                path = %path.display(),
                mode = %mode,
                next_eventnum = writer.next_eventnum,
                "Log opened for writing"
            );
        } else {
            tracing::debug!(path = %path.display(), "Log opened for reading");
        }

        Ok(Self {
            path,
            mode,
            config,
            access: Some(access),
            good: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LogMode {
        self.mode
    }

    /// Open and no I/O error seen so far
    pub fn good(&self) -> bool {
        self.good && self.access.is_some()
    }

    fn reader(&mut self) -> Result<&mut Reader, LogError> {
        match self.access.as_mut() {
            Some(Access::Reader(reader)) => Ok(reader),
            Some(Access::Writer(_)) => Err(LogError::LogFileNotReadable),
            None => Err(LogError::LogFileClosed),
        }
    }

    fn writer(&mut self) -> Result<&mut Writer, LogError> {
        match self.access.as_mut() {
            Some(Access::Writer(writer)) => Ok(writer),
            Some(Access::Reader(_)) => Err(LogError::LogFileNotWritable),
            None => Err(LogError::LogFileClosed),
        }
    }

    fn track<T>(&mut self, result: Result<T, LogError>) -> Result<T, LogError> {
        if let Err(LogError::Io(e)) = &result {
            tracing::warn!(path = %self.path.display(), error = %e, "Log I/O error");
            self.good = false;
        }
        result
    }

    /// Append an event; returns the event number it was assigned
    pub fn write_event(&mut self, event: &LogEvent) -> Result<i64, LogError> {
        let result = self.writer()?.write(event);
        self.track(result)
    }

    /// Read the event at the cursor and move past it
    pub fn read_next_event(&mut self) -> Result<LogEvent, LogError> {
        let result = self.reader()?.read_next();
        self.track(result)
    }

    /// Read the event before the cursor and move the cursor to its start
    pub fn read_prev_event(&mut self) -> Result<LogEvent, LogError> {
        let result = self.reader()?.read_prev();
        self.track(result)
    }

    /// Read the event starting exactly at `offset`
    pub fn read_event_at_offset(&mut self, offset: u64) -> Result<LogEvent, LogError> {
        let result = self.reader()?.read_at(offset);
        self.track(result)
    }

    /// Move the cursor to the first event with `timestamp >= ts`
    ///
    /// With no such event the cursor ends at the end of the log.
    pub fn seek_to_timestamp(&mut self, ts: i64) -> Result<(), LogError> {
        let stride = self.config.index_stride;
        let result = self.reader()?.seek_to_timestamp(ts, stride);
        self.track(result)
    }

    /// Current byte position: the read cursor, or bytes written so far
    pub fn tell(&self) -> Result<u64, LogError> {
        match &self.access {
            Some(Access::Reader(reader)) => Ok(reader.cursor),
            Some(Access::Writer(writer)) => Ok(writer.offset),
            None => Err(LogError::LogFileClosed),
        }
    }

    /// Push buffered events to the file
    pub fn flush(&mut self) -> Result<(), LogError> {
        let sync = self.config.sync_on_flush;
        let result = match self.access.as_mut() {
            Some(Access::Writer(writer)) => writer.flush(sync).map_err(LogError::from),
            Some(Access::Reader(_)) => Ok(()),
            None => Err(LogError::LogFileClosed),
        };
        self.track(result)
    }

    /// Flush and release the file; later calls fail with `LogFileClosed`
    pub fn close(&mut self) -> Result<(), LogError> {
        let access = self.access.take().ok_or(LogError::LogFileClosed)?;
        if let Access::Writer(mut writer) = access {
            let result = writer.flush(self.config.sync_on_flush).map_err(LogError::from);
            self.track(result)?;
        }
        tracing::debug!(path = %self.path.display(), "Log closed");
        Ok(())
    }
}
