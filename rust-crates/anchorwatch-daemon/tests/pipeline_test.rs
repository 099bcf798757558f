use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anchorwatch_acquisition::{
    Acquisition, AcquisitionError, AcquisitionSettings, Anchor, AnchorDescriptor, MockChannel,
};
use anchorwatch_broadcaster::{BroadcastHub, BroadcastSettings};
use anchorwatch_daemon::{
    AnchorOpener, CycleError, CycleOutcome, Pipeline, PipelineSettings, Supervisor,
};
use anchorwatch_fusion::{
    classify, speed_along_baseline, Baseline, BaselinePair, FusionError, PositionTag, RiskLevel,
};
use approx::assert_relative_eq;
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

const LEFT: &str = "CCF95781E4A1";
const RIGHT: &str = "CCF95781E4B2";

/// Angle `value` as reported by an anchor (the azimuth field is negated on parse)
fn frame(id: &str, value: i32) -> Vec<u8> {
    format!(
        "+UUDF:{id},-51,{azimuth},0,37,\"{id}\",\"\",123456,1\r\n",
        id = id,
        azimuth = -value
    )
    .into_bytes()
}

fn anchors(max_errors: u32) -> (Acquisition, Vec<MockChannel>) {
    let mut anchors = Vec::new();
    let mut channels = Vec::new();

    for (i, (id, pos)) in [(LEFT, "left"), (RIGHT, "right")].iter().enumerate() {
        let channel = MockChannel::new();
        let descriptor = AnchorDescriptor {
            id: id.to_string(),
            serial_port: format!("/dev/ttyMOCK{}", i),
            theta: if i == 0 { 90.0 } else { -90.0 },
            pos: PositionTag::Label(pos.to_string()),
        };
        anchors.push(Anchor::new(descriptor, Box::new(channel.clone())));
        channels.push(channel);
    }

    let settings = AcquisitionSettings {
        max_consecutive_read_errors: max_errors,
        ..AcquisitionSettings::default()
    };
    (Acquisition::new(anchors, settings).unwrap(), channels)
}

fn baseline() -> Baseline {
    Baseline::new(BaselinePair::new(0, 1).unwrap(), 0.5).unwrap()
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
}

/// One second per call, starting at `epoch()`
fn ticking_clock() -> Box<dyn FnMut() -> DateTime<Utc> + Send> {
    let mut ticks = 0;
    Box::new(move || {
        let now = epoch() + chrono::Duration::seconds(ticks);
        ticks += 1;
        now
    })
}

async fn started_hub() -> Arc<BroadcastHub> {
    let hub = Arc::new(BroadcastHub::new("127.0.0.1:0", BroadcastSettings::default()).unwrap());
    hub.start().await.unwrap();
    hub
}

async fn wait_for_clients(hub: &BroadcastHub, count: usize) {
    for _ in 0..100 {
        if hub.client_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("hub never reached {} clients", count);
}

fn emit(channels: &[MockChannel], left: i32, right: i32) {
    channels[0].inject(&frame(LEFT, left));
    channels[1].inject(&frame(RIGHT, right));
}

#[tokio::test]
async fn test_three_cycles_reach_a_client() {
    let hub = started_hub().await;
    let addr = hub.local_addr().await.unwrap();

    let client = TcpStream::connect(addr).await.unwrap();
    let mut lines = BufReader::new(client).lines();
    wait_for_clients(&hub, 1).await;

    let (acquisition, channels) = anchors(50);
    let mut pipeline = Pipeline::new(acquisition, baseline(), Arc::clone(&hub), Duration::ZERO, 1)
        .with_clock(ticking_clock());

    let readings = [(50, 10), (50, 12), (60, 30)];
    for (left, right) in readings {
        emit(&channels, left, right);
        match pipeline.run_cycle().await.unwrap() {
            CycleOutcome::Published { report, .. } => assert_eq!(report.delivered, 1),
            other => panic!("expected a publish, got {:?}", other),
        }
    }
    assert_eq!(pipeline.published(), 3);

    let mut messages = Vec::new();
    for _ in 0..readings.len() {
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        messages.push(serde_json::from_str::<serde_json::Value>(&line).unwrap());
    }

    let mut previous_timestamp = f64::MIN;
    for (i, message) in messages.iter().enumerate() {
        let entries = message.as_array().unwrap();
        assert_eq!(entries.len(), 2);

        let (left, right) = readings[i];
        assert_eq!(entries[0]["val"], left);
        assert_eq!(entries[1]["val"], right);
        assert_eq!(entries[0]["pos"], "left");
        assert_eq!(entries[1]["theta"], -90.0);

        // Speed, risk and timestamp are shared by every entry of a message
        assert_eq!(entries[0]["speed_along_line"], entries[1]["speed_along_line"]);
        assert_eq!(entries[0]["risk_level"], entries[1]["risk_level"]);
        assert_eq!(entries[0]["timestamp"], entries[1]["timestamp"]);

        let timestamp = entries[0]["timestamp"].as_f64().unwrap();
        assert!(timestamp >= previous_timestamp);
        previous_timestamp = timestamp;

        let expected_speed = if i == 0 {
            0.0
        } else {
            speed_along_baseline(0.5, readings[i - 1], readings[i], 1.0)
        };
        let speed = entries[0]["speed_along_line"].as_f64().unwrap();
        assert_relative_eq!(speed, expected_speed, epsilon = 1e-12);

        let expected_risk = classify(expected_speed, left, right).unwrap();
        assert_eq!(entries[0]["risk_level"], expected_risk.as_u8());
    }

    assert_eq!(messages[0][0]["risk_level"], RiskLevel::Low.as_u8());
    assert_relative_eq!(messages[0][0]["timestamp"].as_f64().unwrap(), 1_700_000_000.0);

    hub.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_unchanged_cycle_publishes_nothing() {
    let hub = started_hub().await;
    let (acquisition, channels) = anchors(50);
    let mut pipeline = Pipeline::new(acquisition, baseline(), Arc::clone(&hub), Duration::ZERO, 1)
        .with_clock(ticking_clock());

    assert_eq!(pipeline.run_cycle().await.unwrap(), CycleOutcome::Unchanged);

    channels[0].inject(&frame(LEFT, 50));
    match pipeline.run_cycle().await.unwrap() {
        CycleOutcome::Incomplete { awaiting } => assert_eq!(awaiting, vec![RIGHT.to_string()]),
        other => panic!("expected incomplete, got {:?}", other),
    }

    assert_eq!(pipeline.published(), 0);
    assert!(pipeline.motion().state().previous().is_none());

    hub.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_unclassified_position_is_recoverable() {
    let hub = started_hub().await;
    let (acquisition, channels) = anchors(50);
    let mut pipeline = Pipeline::new(acquisition, baseline(), Arc::clone(&hub), Duration::ZERO, 1)
        .with_clock(ticking_clock());

    // θ₀ = 45 sits on a tier boundary
    emit(&channels, 45, 10);
    let err = pipeline.run_cycle().await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Fusion(FusionError::UnclassifiedPosition { angle0: 45, angle1: 10 })
    ));
    assert!(err.is_recoverable());
    assert_eq!(pipeline.published(), 0);

    // The next valid cycle goes through
    emit(&channels, 50, 10);
    assert!(matches!(
        pipeline.run_cycle().await.unwrap(),
        CycleOutcome::Published { .. }
    ));

    hub.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_extreme_angles_keep_the_loop_alive() {
    let hub = started_hub().await;
    let (acquisition, channels) = anchors(50);
    let mut pipeline = Pipeline::new(acquisition, baseline(), Arc::clone(&hub), Duration::ZERO, 1)
        .with_clock(ticking_clock());

    emit(&channels, i32::MAX, 10);
    match pipeline.run_cycle().await.unwrap() {
        CycleOutcome::Published { sample, .. } => {
            assert_eq!(sample.entries()[0].reading.val, i32::MAX);
            assert_eq!(sample.entries()[0].risk_level, RiskLevel::Medium);
        }
        other => panic!("expected a publish, got {:?}", other),
    }

    emit(&channels, -i32::MAX, 10);
    match pipeline.run_cycle().await.unwrap() {
        CycleOutcome::Published { sample, .. } => {
            let speed = sample.entries()[0].speed_along_line;
            assert!(speed.is_finite() && speed >= 1.0);
            assert_eq!(sample.entries()[0].risk_level, RiskLevel::High);
        }
        other => panic!("expected a publish, got {:?}", other),
    }

    hub.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_run_skips_transient_faults_until_shutdown() {
    let hub = started_hub().await;
    let (acquisition, channels) = anchors(5);
    let mut pipeline = Pipeline::new(
        acquisition,
        baseline(),
        Arc::clone(&hub),
        Duration::from_millis(5),
        1,
    );

    channels[0].fail_next_read(std::io::ErrorKind::TimedOut);
    emit(&channels, 50, 10);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let result = pipeline.run(shutdown_rx).await;
        (pipeline, result)
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send_replace(true);

    let (pipeline, result) = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    result.unwrap();
    assert!(channels[0].read_count() >= 1);
    assert!(pipeline.published() <= 1);

    pipeline.close(Duration::from_secs(1)).await;
    assert!(channels.iter().all(|c| c.is_closed()));

    hub.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_run_returns_unrecoverable_fault() {
    let hub = started_hub().await;
    let (acquisition, channels) = anchors(0);
    let mut pipeline = Pipeline::new(
        acquisition,
        baseline(),
        Arc::clone(&hub),
        Duration::from_millis(5),
        1,
    );

    channels[1].fail_next_read(std::io::ErrorKind::BrokenPipe);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let err = tokio::time::timeout(Duration::from_secs(2), pipeline.run(shutdown_rx))
        .await
        .unwrap()
        .unwrap_err();
    assert!(!err.is_recoverable());
    assert!(matches!(err, CycleError::Acquisition(_)));

    hub.stop(Duration::from_secs(1)).await.unwrap();
}

fn fast_restarts(max_restarts: u32) -> PipelineSettings {
    PipelineSettings {
        idle_interval_ms: 5,
        max_restarts,
        restart_delay_ms: 10,
        ..PipelineSettings::default()
    }
}

#[tokio::test]
async fn test_supervisor_gives_up_after_max_restarts() {
    let hub = Arc::new(BroadcastHub::new("127.0.0.1:0", BroadcastSettings::default()).unwrap());
    let opened = Arc::new(AtomicUsize::new(0));

    let opener: AnchorOpener = {
        let opened = Arc::clone(&opened);
        Arc::new(move || {
            opened.fetch_add(1, Ordering::SeqCst);
            let (acquisition, channels) = anchors(0);
            channels[0].fail_next_read(std::io::ErrorKind::BrokenPipe);
            Ok::<_, AcquisitionError>(acquisition)
        })
    };

    let mut supervisor = Supervisor::new(
        opener,
        baseline(),
        hub,
        fast_restarts(2),
        Duration::from_millis(100),
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = tokio::time::timeout(Duration::from_secs(5), supervisor.run(shutdown_rx))
        .await
        .unwrap();

    assert!(result.is_err());
    assert_eq!(opened.load(Ordering::SeqCst), 3);
    assert_eq!(supervisor.restarts(), 2);
}

#[tokio::test]
async fn test_supervisor_first_open_failure_is_fatal() {
    let hub = Arc::new(BroadcastHub::new("127.0.0.1:0", BroadcastSettings::default()).unwrap());
    let opener: AnchorOpener =
        Arc::new(|| Acquisition::new(Vec::new(), AcquisitionSettings::default()));

    let mut supervisor = Supervisor::new(
        opener,
        baseline(),
        hub,
        fast_restarts(3),
        Duration::from_millis(100),
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    assert!(supervisor.run(shutdown_rx).await.is_err());
    assert_eq!(supervisor.restarts(), 0);
}

#[tokio::test]
async fn test_supervisor_stops_on_shutdown() {
    let hub = Arc::new(BroadcastHub::new("127.0.0.1:0", BroadcastSettings::default()).unwrap());
    let opened = Arc::new(AtomicUsize::new(0));

    let opener: AnchorOpener = {
        let opened = Arc::clone(&opened);
        Arc::new(move || {
            opened.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AcquisitionError>(anchors(50).0)
        })
    };

    let mut supervisor = Supervisor::new(
        opener,
        baseline(),
        hub,
        fast_restarts(3),
        Duration::from_millis(100),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let result = supervisor.run(shutdown_rx).await;
        (supervisor, result)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send_replace(true);

    let (supervisor, result) = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    result.unwrap();
    assert_eq!(supervisor.restarts(), 0);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}
