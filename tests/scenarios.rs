//! End-to-end bus and log scenarios

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use zcm_rs::codec::DEFAULT_MTU;
use zcm_rs::transport::{MemoryLink, PacketTransport};
use zcm_rs::{
    Bus, BusConfig, BusError, DispatchError, EngineState, Frame, LogError, LogEvent, LogFile,
    LogMode, LogPlayer, LogRecorder, RecvError, Transport, TransportError,
};

fn hub_bus(hub: &str, queue_size: usize) -> Bus {
    let bus = Bus::with_config(
        BusConfig::with_url(format!("inproc://{}", hub))
            .queue_size(queue_size)
            .receive_timeout(Duration::from_millis(10)),
    );
    assert!(bus.good());
    bus
}

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn exact_and_regex_subscriptions_across_buses() {
    let publisher = hub_bus("scenario-a", 64);
    let subscriber = hub_bus("scenario-a", 64);

    let calls = Arc::new(Mutex::new(Vec::new()));
    let c = Arc::clone(&calls);
    subscriber
        .subscribe("A", move |f: &Frame| c.lock().push(("S1", f.channel().to_string())))
        .unwrap();
    let c = Arc::clone(&calls);
    subscriber
        .subscribe("A.*", move |f: &Frame| c.lock().push(("S2", f.channel().to_string())))
        .unwrap();

    subscriber.start().unwrap();
    publisher.publish("A", b"1").unwrap();
    publisher.publish("AB", b"2").unwrap();
    publisher.publish("B", b"3").unwrap();

    wait_for("three deliveries", || calls.lock().len() == 3);
    wait_for("all frames dispatched", || {
        subscriber.stats().unwrap().frames_dispatched == 3
    });
    subscriber.stop().unwrap();

    let calls = calls.lock();
    assert_eq!(
        *calls,
        vec![
            ("S1", "A".to_string()),
            ("S2", "A".to_string()),
            ("S2", "AB".to_string()),
        ]
    );
}

#[test]
fn paused_bus_keeps_newest_frames() {
    let publisher = hub_bus("scenario-overflow", 64);
    let subscriber = hub_bus("scenario-overflow", 8);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    subscriber
        .subscribe("N", move |f: &Frame| s.lock().push(f.payload()[0]))
        .unwrap();

    subscriber.pause().unwrap();
    subscriber.start().unwrap();
    for n in 0..50u8 {
        publisher.publish("N", &[n]).unwrap();
    }

    wait_for("all frames ingested", || {
        let stats = subscriber.stats().unwrap();
        stats.frames_received == 50 && stats.frames_dropped == 42
    });
    assert!(seen.lock().is_empty());

    subscriber.resume().unwrap();
    wait_for("queued frames delivered", || seen.lock().len() == 8);
    subscriber.stop().unwrap();

    assert_eq!(*seen.lock(), (42..50).collect::<Vec<u8>>());
}

#[test]
fn unsubscribe_waits_for_running_callback() {
    let bus = Arc::new(hub_bus("scenario-unsub", 16));
    let entered = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let (e, f) = (Arc::clone(&entered), Arc::clone(&finished));
    let id = bus
        .subscribe("SLOW", move |_| {
            e.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            f.store(true, Ordering::SeqCst);
        })
        .unwrap();

    bus.start().unwrap();
    bus.publish("SLOW", b"").unwrap();
    wait_for("callback entered", || entered.load(Ordering::SeqCst));

    bus.unsubscribe(id).unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert!(matches!(
        bus.unsubscribe(id),
        Err(BusError::Registry(zcm_rs::RegistryError::UnknownSubscription(_)))
    ));
    bus.stop().unwrap();
}

#[test]
fn panicking_callback_does_not_stop_dispatch() {
    let bus = hub_bus("scenario-panic", 16);
    let reports = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&reports);
    bus.set_error_sink(Arc::new(move |e: &DispatchError| r.lock().push(e.to_string())))
        .unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    bus.subscribe("P", |f: &Frame| {
        if f.payload()[0] % 2 == 0 {
            panic!("even payload");
        }
    })
    .unwrap();
    let d = Arc::clone(&delivered);
    bus.subscribe("P", move |_| {
        d.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    bus.start().unwrap();
    for n in 0..6u8 {
        bus.publish("P", &[n]).unwrap();
    }
    wait_for("later subscriber saw every frame", || {
        delivered.load(Ordering::SeqCst) == 6
    });
    bus.stop().unwrap();

    assert_eq!(bus.stats().unwrap().callback_panics, 3);
    let reports = reports.lock();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.contains("even payload")));
}

#[test]
fn handle_is_abortable_by_stop() {
    let bus = Arc::new(hub_bus("scenario-handle-stop", 16));
    let handler = {
        let bus = Arc::clone(&bus);
        thread::spawn(move || bus.handle())
    };

    // Keep stopping until the handler has claimed the loop and noticed
    while !handler.is_finished() {
        thread::sleep(Duration::from_millis(20));
        bus.stop().unwrap();
    }
    assert_eq!(handler.join().unwrap().unwrap(), 0);
    assert_eq!(bus.state(), EngineState::Ready);
}

#[test]
fn fragmented_messages_over_packet_transport() {
    let (a, b) = MemoryLink::pair(512);
    let config = BusConfig::default().receive_timeout(Duration::from_millis(10));
    let sender = Bus::with_transport(Box::new(PacketTransport::new(a)), config.clone());
    let receiver = Bus::with_transport(Box::new(PacketTransport::new(b)), config);

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let received = Arc::new(Mutex::new(None));
    let r = Arc::clone(&received);
    receiver
        .subscribe("BLOB", move |f: &Frame| *r.lock() = Some(f.payload().to_vec()))
        .unwrap();

    sender.publish("BLOB", &payload).unwrap();
    assert_eq!(receiver.handle_timeout(Duration::from_secs(2)).unwrap(), 1);
    assert_eq!(received.lock().as_deref(), Some(&payload[..]));
}

fn sink_reports(bus: &Bus) -> Arc<Mutex<Vec<DispatchError>>> {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&reports);
    bus.set_error_sink(Arc::new(move |e: &DispatchError| r.lock().push(e.clone())))
        .unwrap();
    reports
}

#[test]
fn malformed_packet_reported_and_dispatch_continues() {
    let (a, b) = MemoryLink::pair(DEFAULT_MTU);
    b.inject(b"\x00\x01garbage");

    let config = BusConfig::default().receive_timeout(Duration::from_millis(10));
    let sender = Bus::with_transport(Box::new(PacketTransport::new(a)), config.clone());
    let receiver = Bus::with_transport(Box::new(PacketTransport::new(b)), config);
    let reports = sink_reports(&receiver);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let d = Arc::clone(&delivered);
    receiver
        .subscribe("GOOD", move |f: &Frame| d.lock().push(f.payload().to_vec()))
        .unwrap();

    sender.publish("GOOD", b"ok").unwrap();
    assert_eq!(receiver.handle_timeout(Duration::from_secs(2)).unwrap(), 1);

    assert_eq!(*delivered.lock(), vec![b"ok".to_vec()]);
    let stats = receiver.stats().unwrap();
    assert_eq!(stats.malformed_frames, 1);
    assert_eq!(stats.frames_dispatched, 1);
    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0], DispatchError::MalformedFrame(_)));
}

/// Transport that replays a fixed sequence of receive results
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Frame, RecvError>>>,
}

impl Transport for ScriptedTransport {
    fn send(&self, _channel: &str, _payload: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    fn recv(&self, _timeout: Duration) -> Result<Frame, RecvError> {
        self.script.lock().pop_front().unwrap_or(Err(RecvError::Timeout))
    }

    fn close(&self) {}
}

#[test]
fn transport_failure_reported_and_dispatch_continues() {
    let transport = ScriptedTransport {
        script: Mutex::new(VecDeque::from(vec![
            Err(RecvError::Transport(TransportError::Other("link reset".into()))),
            Ok(Frame::new("GOOD", b"after")),
        ])),
    };
    let config = BusConfig::default().receive_timeout(Duration::from_millis(10));
    let bus = Bus::with_transport(Box::new(transport), config);
    let reports = sink_reports(&bus);

    let delivered = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&delivered);
    bus.subscribe("GOOD", move |_| {
        d.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert_eq!(bus.handle_timeout(Duration::from_secs(2)).unwrap(), 1);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    assert_eq!(bus.stats().unwrap().transport_errors, 1);
    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert!(matches!(&reports[0], DispatchError::Transport(msg) if msg.contains("link reset")));
}

#[test]
fn record_then_replay_between_buses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.log");

    let live = hub_bus("scenario-record", 64);
    let recorder =
        LogRecorder::start(&live, "CAM_.*", LogFile::open(&path, LogMode::Write).unwrap())
            .unwrap();
    for n in 0..10u8 {
        live.publish(if n % 2 == 0 { "CAM_L" } else { "CAM_R" }, &[n]).unwrap();
        live.publish("IGNORED", &[n]).unwrap();
    }
    while live.handle_nonblock().unwrap() > 0 {}
    assert_eq!(recorder.recorded(), 10);
    recorder.stop(&live).unwrap().close().unwrap();

    let mut log = LogFile::open(&path, LogMode::Read).unwrap();
    let mut nums = Vec::new();
    loop {
        match log.read_next_event() {
            Ok(event) => nums.push(event.eventnum),
            Err(LogError::EndOfLog) => break,
            Err(e) => panic!("{}", e),
        }
    }
    assert_eq!(nums, (0..10).collect::<Vec<i64>>());

    let replay = hub_bus("scenario-replay", 64);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    replay
        .subscribe("CAM_.*", move |f: &Frame| s.lock().push(f.payload()[0]))
        .unwrap();

    let mut player = LogPlayer::new(LogFile::open(&path, LogMode::Read).unwrap());
    assert_eq!(player.play(&replay).unwrap(), 10);
    while replay.handle_nonblock().unwrap() > 0 {}
    assert_eq!(*seen.lock(), (0..10).collect::<Vec<u8>>());
}

#[test]
fn seek_lands_on_first_event_at_or_after_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seek.log");

    let mut log = LogFile::open(&path, LogMode::Write).unwrap();
    for ts in [10, 20, 30] {
        log.write_event(&LogEvent::new(ts, "T", b"")).unwrap();
    }
    log.close().unwrap();

    let mut log = LogFile::open(&path, LogMode::Read).unwrap();
    log.seek_to_timestamp(15).unwrap();
    let event = log.read_next_event().unwrap();
    assert_eq!(event.timestamp, 20);
    assert_eq!(event.eventnum, 1);
}

#[test]
fn stream_subscription_from_async_code() {
    let bus = hub_bus("scenario-stream", 16);
    let (_id, mut rx) = bus.subscribe_stream("TICK", 8).unwrap();

    for n in 0..3u8 {
        bus.publish("TICK", &[n]).unwrap();
    }
    bus.handle().unwrap();

    let payloads = tokio_test::block_on(async {
        let mut payloads = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            payloads.push(frame.payload()[0]);
        }
        payloads
    });
    assert_eq!(payloads, vec![0, 1, 2]);
}

#[test]
fn topology_snapshot_lists_subscriptions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("topology.json");

    let bus = hub_bus("scenario-topology", 16);
    bus.subscribe("POSE", |_| {}).unwrap();
    bus.subscribe("IMU_.*", |_| {}).unwrap();
    bus.publish("POSE", b"12").unwrap();
    bus.handle().unwrap();
    bus.write_topology(&path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["transport"], "inproc://scenario-topology");
    assert_eq!(json["channels"]["POSE"]["received"], 1);
    assert_eq!(json["subscriptions"][1]["pattern"], "IMU_.*");
    assert_eq!(json["subscriptions"][1]["is_regex"], true);
}
