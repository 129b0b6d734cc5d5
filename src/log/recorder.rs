//! Recording bus traffic into a log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::LogEvent;
use super::file::LogFile;
use crate::bus::Bus;
use crate::error::{BusError, LogError, Result};
use crate::frame::Frame;
use crate::registry::SubscriptionId;

#[derive(Debug, Default)]
struct RecorderStats {
    recorded: AtomicU64,
    failed: AtomicU64,
}

/// Writes every frame matching a pattern into a log file
///
/// Events carry the frame's receive time as their timestamp.
#[derive(Debug)]
pub struct LogRecorder {
    id: SubscriptionId,
    log: Arc<Mutex<Option<LogFile>>>,
    stats: Arc<RecorderStats>,
}

impl LogRecorder {
    /// Subscribe `bus` to `pattern` and record matches into `log`
    pub fn start(bus: &Bus, pattern: &str, log: LogFile) -> Result<Self> {
        if !log.mode().is_writable() {
            return Err(LogError::LogFileNotWritable.into());
        }

        let log = Arc::new(Mutex::new(Some(log)));
        let stats = Arc::new(RecorderStats::default());

        let sink = Arc::clone(&log);
        let counters = Arc::clone(&stats);
        let id = bus.subscribe(pattern, move |frame: &Frame| {
            let mut guard = sink.lock();
            let Some(log) = guard.as_mut() else {
                return;
            };
            match log.write_event(&LogEvent::from_frame(frame)) {
                Ok(_) => {
                    counters.recorded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        channel = %frame.channel(),
                        error = %e,
                        "Failed to record event"
                    );
                }
            }
        })?;

        tracing::info!(pattern = %pattern, subscription = %id, "Recording started");
        Ok(Self { id, log, stats })
    }

    /// Events written so far
    pub fn recorded(&self) -> u64 {
        self.stats.recorded.load(Ordering::Relaxed)
    }

    /// Frames that could not be written
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Flush events written so far
    pub fn flush(&self) -> Result<()> {
        match self.log.lock().as_mut() {
            Some(log) => Ok(log.flush()?),
            None => Err(LogError::LogFileClosed.into()),
        }
    }

    /// Unsubscribe and hand back the log, flushed
    pub fn stop(self, bus: &Bus) -> Result<LogFile> {
        bus.unsubscribe(self.id)?;
        let mut log = self
            .log
            .lock()
            .take()
            .ok_or(BusError::Log(LogError::LogFileClosed))?;
        log.flush()?;
        tracing::info!(recorded = self.recorded(), "Recording stopped");
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::log::LogMode;
    use crate::transport::InprocTransport;

    #[test]
    fn test_records_matching_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.log");
        let bus = Bus::with_transport(Box::new(InprocTransport::new()), BusConfig::default());

        let log = LogFile::open(&path, LogMode::Write).unwrap();
        let recorder = LogRecorder::start(&bus, "POSE.*", log).unwrap();

        bus.publish("POSE_A", b"1").unwrap();
        bus.publish("IMU", b"2").unwrap();
        bus.publish("POSE_B", b"3").unwrap();
        bus.handle().unwrap();
        assert_eq!(recorder.recorded(), 2);

        let mut log = recorder.stop(&bus).unwrap();
        log.close().unwrap();

        let mut log = LogFile::open(&path, LogMode::Read).unwrap();
        let first = log.read_next_event().unwrap();
        assert_eq!(first.channel, "POSE_A");
        assert_eq!(&first.data()[..], b"1");
        let second = log.read_next_event().unwrap();
        assert_eq!(second.channel, "POSE_B");
        assert_eq!(second.eventnum, 1);
        assert!(matches!(log.read_next_event(), Err(LogError::EndOfLog)));
    }

    #[test]
    fn test_rejects_read_only_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.log");
        LogFile::open(&path, LogMode::Write).unwrap().close().unwrap();

        let bus = Bus::with_transport(Box::new(InprocTransport::new()), BusConfig::default());
        let log = LogFile::open(&path, LogMode::Read).unwrap();
        assert!(matches!(
            LogRecorder::start(&bus, "A", log),
            Err(BusError::Log(LogError::LogFileNotWritable))
        ));
    }
}
