//! Record bus traffic to an event log, then replay it
//!
//! Run with: cargo run --example log_replay -- [LOG_PATH]
//!
//! This example demonstrates:
//! - `LogRecorder` capturing every frame matching a pattern
//! - Reading a log forwards, backwards and by timestamp
//! - `LogPlayer` republishing the log at recorded pace
//!
//! # Flow
//!
//! ```text
//!   publish ──► Bus ──► LogRecorder ──► demo.log
//!                                          │
//!   Bus ◄── LogPlayer (speed 4x) ◄─────────┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use zcm_rs::{Bus, LogError, LogFile, LogMode, LogPlayer, LogRecorder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("zcm_demo.log"));

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("zcm_rs=info".parse()?)
                .add_directive("log_replay=info".parse()?),
        )
        .init();

    // Record
    let bus = Bus::open("inproc")?;
    let recorder = LogRecorder::start(&bus, ".*", LogFile::open(&path, LogMode::Write)?)?;
    bus.start()?;
    for i in 0..20u32 {
        let channel = if i % 2 == 0 { "ODOM" } else { "LIDAR" };
        bus.publish(channel, &i.to_be_bytes())?;
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));
    bus.stop()?;
    let mut log = recorder.stop(&bus)?;
    log.close()?;
    println!("Recorded events to {}", path.display());

    // Inspect
    let mut log = LogFile::open(&path, LogMode::Read)?;
    let first = log.read_next_event()?;
    println!("first: #{} {} @ {}", first.eventnum, first.channel, first.timestamp);

    let mut last = first.clone();
    loop {
        match log.read_next_event() {
            Ok(event) => last = event,
            Err(LogError::EndOfLog) => break,
            Err(e) => return Err(e.into()),
        }
    }
    println!("last:  #{} {} @ {}", last.eventnum, last.channel, last.timestamp);

    let prev = log.read_prev_event()?;
    println!("prev from end: #{}", prev.eventnum);

    let middle = first.timestamp + (last.timestamp - first.timestamp) / 2;
    log.seek_to_timestamp(middle)?;
    let found = log.read_next_event()?;
    println!("seek {} -> #{} @ {}", middle, found.eventnum, found.timestamp);
    log.close()?;

    // Replay
    let replay_bus = Bus::open("inproc")?;
    let replayed = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&replayed);
    replay_bus.subscribe("ODOM|LIDAR", move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })?;
    replay_bus.start()?;

    let mut player = LogPlayer::new(LogFile::open(&path, LogMode::Read)?).speed(4.0);
    let published = player.play(&replay_bus)?;
    thread::sleep(Duration::from_millis(50));
    replay_bus.stop()?;

    println!(
        "Replayed {} events, {} delivered",
        published,
        replayed.load(Ordering::Relaxed)
    );
    Ok(())
}
