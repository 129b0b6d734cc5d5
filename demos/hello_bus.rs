//! Two buses talking over a shared in-process hub
//!
//! Run with: cargo run --example hello_bus [HUB_NAME]
//!
//! This example demonstrates:
//! - Exact and regex subscriptions on the same bus
//! - An owned dispatch thread (`start()` / `stop()`)
//! - Consuming frames from async code with `subscribe_stream`
//! - Writing a topology snapshot

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use zcm_rs::{Bus, BusConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let hub = std::env::args().nth(1).unwrap_or_else(|| "hello".to_string());

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("zcm_rs=debug".parse()?)
                .add_directive("hello_bus=info".parse()?),
        )
        .init();

    let url = format!("inproc://{}", hub);
    let publisher = Bus::open(&url)?;
    let subscriber = Bus::with_config(
        BusConfig::with_url(&url)
            .queue_size(64)
            .thread_name("hello-dispatch"),
    );
    if let Some(err) = subscriber.construction_error() {
        return Err(err.clone().into());
    }

    let poses = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&poses);
    subscriber.subscribe("POSE", move |frame| {
        counter.fetch_add(1, Ordering::Relaxed);
        println!("[exact] {} ({} bytes)", frame.channel(), frame.len());
    })?;
    subscriber.subscribe("SENSOR_.*", |frame| {
        println!("[regex] {} = {:?}", frame.channel(), frame.payload());
    })?;
    let (_stream_id, mut stream) = subscriber.subscribe_stream(".*", 32)?;

    subscriber.start()?;

    for i in 0..5u8 {
        publisher.publish("POSE", &[i; 3])?;
        publisher.publish("SENSOR_IMU", &[i])?;
        publisher.publish("SENSOR_GPS", &[i, i])?;
    }

    let mut streamed = 0;
    while streamed < 15 {
        match tokio::time::timeout(Duration::from_secs(1), stream.recv()).await {
            Ok(Some(frame)) => {
                streamed += 1;
                tracing::debug!(channel = %frame.channel(), "Streamed frame");
            }
            _ => break,
        }
    }

    subscriber.stop()?;

    let stats = subscriber.stats()?;
    println!();
    println!("POSE callbacks:  {}", poses.load(Ordering::Relaxed));
    println!("Streamed frames: {}", streamed);
    println!(
        "Stats: received={} dispatched={} dropped={}",
        stats.frames_received, stats.frames_dispatched, stats.frames_dropped
    );

    let path = std::env::temp_dir().join("hello_bus_topology.json");
    subscriber.write_topology(&path)?;
    println!("Topology written to {}", path.display());

    Ok(())
}
