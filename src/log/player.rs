//! Replaying a log onto a bus

use std::thread;
use std::time::{Duration, Instant};

use super::file::LogFile;
use crate::bus::Bus;
use crate::error::{LogError, Result};
use crate::registry::Pattern;

/// Republishes the events of a log
///
/// By default events are published back to back. With [`LogPlayer::speed`]
/// the gaps between event timestamps are reproduced, scaled by the factor.
#[derive(Debug)]
pub struct LogPlayer {
    log: LogFile,
    speed: Option<f64>,
    filter: Option<Pattern>,
}

impl LogPlayer {
    pub fn new(log: LogFile) -> Self {
        Self {
            log,
            speed: None,
            filter: None,
        }
    }

    /// Pace playback by timestamp deltas; 2.0 plays twice as fast
    pub fn speed(mut self, factor: f64) -> Self {
        self.speed = (factor.is_finite() && factor > 0.0).then_some(factor);
        self
    }

    /// Only republish channels matching `pattern`
    pub fn filter(mut self, pattern: Pattern) -> Self {
        self.filter = Some(pattern);
        self
    }

    /// Start playback at the first event with `timestamp >= ts`
    pub fn seek_to_timestamp(&mut self, ts: i64) -> Result<()> {
        Ok(self.log.seek_to_timestamp(ts)?)
    }

    /// Publish every remaining event; returns how many were published
    pub fn play(&mut self, bus: &Bus) -> Result<u64> {
        let started = Instant::now();
        let mut first_timestamp = None;
        let mut published = 0;

        loop {
            let event = match self.log.read_next_event() {
                Ok(event) => event,
                Err(LogError::EndOfLog) => break,
                Err(e) => return Err(e.into()),
            };
            if let Some(filter) = &self.filter {
                if !filter.matches(&event.channel) {
                    continue;
                }
            }

            if let Some(speed) = self.speed {
                let base = *first_timestamp.get_or_insert(event.timestamp);
                let offset_us = event.timestamp.saturating_sub(base).max(0) as f64 / speed;
                let due = started.checked_add(Duration::from_micros(offset_us as u64));
                let now = Instant::now();
                if let Some(due) = due.filter(|due| *due > now) {
                    thread::sleep(due - now);
                }
            }

            bus.publish(&event.channel, event.data())?;
            published += 1;
        }

        tracing::info!(published, path = %self.log.path().display(), "Log playback finished");
        Ok(published)
    }

    /// Give back the underlying log
    pub fn into_inner(self) -> LogFile {
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::log::{LogEvent, LogMode};
    use crate::transport::InprocTransport;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn sample_log(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("play.log");
        let mut log = LogFile::open(&path, LogMode::Write).unwrap();
        for (ts, channel) in [(0, "A"), (1_000, "B"), (2_000, "A"), (3_000, "C")] {
            log.write_event(&LogEvent::new(ts, channel, channel.as_bytes()))
                .unwrap();
        }
        log.close().unwrap();
        path
    }

    fn bus_with_collector() -> (Bus, Arc<Mutex<Vec<String>>>) {
        let bus = Bus::with_transport(Box::new(InprocTransport::new()), BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe(".*", move |frame| s.lock().push(frame.channel().to_string()))
            .unwrap();
        (bus, seen)
    }

    #[test]
    fn test_play_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_log(&dir);
        let (bus, seen) = bus_with_collector();

        let mut player = LogPlayer::new(LogFile::open(&path, LogMode::Read).unwrap());
        assert_eq!(player.play(&bus).unwrap(), 4);
        bus.handle().unwrap();

        assert_eq!(*seen.lock(), vec!["A", "B", "A", "C"]);
    }

    #[test]
    fn test_filter_and_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_log(&dir);
        let (bus, seen) = bus_with_collector();

        let mut player = LogPlayer::new(LogFile::open(&path, LogMode::Read).unwrap())
            .filter(Pattern::exact("A").unwrap());
        player.seek_to_timestamp(500).unwrap();
        assert_eq!(player.play(&bus).unwrap(), 1);
        bus.handle().unwrap();

        assert_eq!(*seen.lock(), vec!["A"]);
    }

    #[test]
    fn test_paced_playback_takes_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_log(&dir);
        let (bus, _seen) = bus_with_collector();

        let mut player = LogPlayer::new(LogFile::open(&path, LogMode::Read).unwrap()).speed(1.0);
        let started = Instant::now();
        player.play(&bus).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(3));
    }

    #[test]
    fn test_paced_playback_extreme_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extreme.log");
        let mut log = LogFile::open(&path, LogMode::Write).unwrap();
        log.write_event(&LogEvent::new(i64::MAX, "HI", b"")).unwrap();
        log.write_event(&LogEvent::new(i64::MIN, "LO", b"")).unwrap();
        log.close().unwrap();

        let (bus, seen) = bus_with_collector();
        let mut player = LogPlayer::new(LogFile::open(&path, LogMode::Read).unwrap()).speed(1.0);
        assert_eq!(player.play(&bus).unwrap(), 2);
        bus.handle().unwrap();
        assert_eq!(*seen.lock(), vec!["HI", "LO"]);
    }
}
