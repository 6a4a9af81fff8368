//! Integration tests for the detection coordinator against a fake transport

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_test::assert_ok;

use foretrack_core::{Device, ProcessEntry, ReasonNotSupported, SupportType};
use foretrack_detect::{
    ForegroundProcessDetection, LoggingMetricsSink, MetricsSink, SelectionRegistry, TransportFault,
};
use foretrack_transport::test_utils::{test_device, FakeTransport};
use foretrack_transport::{TransportCommand, TransportEvent};

/// Forwards fault reports into a channel the test can await.
struct ChannelSink(mpsc::UnboundedSender<(TransportFault, String)>);

impl MetricsSink for ChannelSink {
    fn report_transport_fault(&self, fault: TransportFault, device_id: &str) {
        let _ = self.0.send((fault, device_id.to_string()));
    }
}

fn detection_on(fake: &FakeTransport, selection: &SelectionRegistry) -> ForegroundProcessDetection {
    ForegroundProcessDetection::new(
        fake.handle(),
        selection.clone(),
        Arc::new(LoggingMetricsSink),
        |_| {},
        1000,
    )
}

fn running_process(device_id: &str, pid: i32) -> ProcessEntry {
    ProcessEntry {
        device_id: device_id.to_string(),
        pid,
        name: format!("proc-{}", pid),
        is_running: true,
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn selected_id(detection: &ForegroundProcessDetection) -> Option<String> {
    detection
        .selected_device()
        .await
        .expect("selected_device query failed")
        .map(|device| device.id)
}

#[tokio::test]
async fn test_supported_device_is_probed_and_auto_selected() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let detection = detection_on(&fake, &selection);

    fake.connect_device(1, &test_device("d1"), 10);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );

    fake.send_handshake_result(1, SupportType::Supported, None, 20);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(1, "d1", 1000)
    );

    assert_eq!(selected_id(&detection).await.as_deref(), Some("d1"));
    assert_eq!(selection.interest_count("d1"), 1);
}

#[tokio::test]
async fn test_switching_devices_stops_before_starting() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let detection = detection_on(&fake, &selection);

    fake.connect_device(1, &test_device("d1"), 10);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );
    fake.connect_device(2, &test_device("d2"), 11);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(2, "d2")
    );

    // d1 answers first and gets auto-selected; d2's answer changes nothing.
    fake.send_handshake_result(1, SupportType::Supported, None, 20);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(1, "d1", 1000)
    );
    fake.send_handshake_result(2, SupportType::Supported, None, 21);

    assert_ok!(detection.start_polling(test_device("d2")).await);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::stop_tracking(1, "d1")
    );
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(2, "d2", 1000)
    );

    assert_eq!(selected_id(&detection).await.as_deref(), Some("d2"));
    assert_eq!(selection.interest_count("d1"), 0);
    assert_eq!(selection.interest_count("d2"), 1);
}

#[tokio::test]
async fn test_not_supported_device_is_never_started_or_stopped() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let detection = detection_on(&fake, &selection);

    fake.connect_device(1, &test_device("d3"), 10);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d3")
    );
    fake.send_handshake_result(
        1,
        SupportType::NotSupported,
        Some(ReasonNotSupported::DumpsysNotFound),
        20,
    );

    assert_ok!(detection.start_polling(test_device("d3")).await);
    assert_eq!(selected_id(&detection).await.as_deref(), Some("d3"));
    assert_ok!(detection.stop_polling().await);
    assert_ok!(detection.select_process(running_process("d3", 7)).await);

    // Another device's probe is the next command on the wire: nothing was
    // started or stopped for d3.
    fake.connect_device(2, &test_device("d9"), 30);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(2, "d9")
    );
    assert_eq!(selected_id(&detection).await, None);
    assert!(fake.try_recv_command().is_none());
}

#[tokio::test]
async fn test_stop_is_suppressed_until_the_other_instance_lets_go() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let a = detection_on(&fake, &selection);
    let b = detection_on(&fake, &selection);

    fake.connect_device(1, &test_device("d1"), 10);
    // Both instances probe independently.
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );

    fake.send_handshake_result(1, SupportType::Supported, None, 20);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(1, "d1", 1000)
    );
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(1, "d1", 1000)
    );
    assert_eq!(selection.interest_count("d1"), 2);

    // Suppressed: b still holds d1, and a keeps its state for a later stop.
    assert_ok!(a.stop_polling().await);
    assert_eq!(selected_id(&a).await.as_deref(), Some("d1"));
    assert!(fake.try_recv_command().is_none());

    b.dispose().await;
    wait_for(|| selection.interest_count("d1") == 1, "instance release").await;
    // b's own release was suppressed by a's interest.
    assert!(fake.try_recv_command().is_none());

    // Now unchallenged: the stop goes out exactly once.
    assert_ok!(a.stop_polling().await);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::stop_tracking(1, "d1")
    );
    assert_eq!(selection.interest_count("d1"), 0);
    assert_eq!(selected_id(&a).await, None);
}

#[tokio::test]
async fn test_process_selection_retries_only_unknown_devices() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let detection = detection_on(&fake, &selection);

    fake.connect_device(1, &test_device("d4"), 10);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d4")
    );
    fake.send_handshake_result(1, SupportType::Unknown, None, 20);

    // A second device's probe proves the UNKNOWN answer is in.
    fake.connect_device(2, &test_device("d5"), 30);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(2, "d5")
    );

    assert_ok!(detection.select_process(running_process("d4", 7)).await);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d4")
    );

    // A dead process never triggers a probe.
    let mut dead = running_process("d4", 8);
    dead.is_running = false;
    assert_ok!(detection.select_process(dead).await);

    fake.send_handshake_result(1, SupportType::Supported, None, 40);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(1, "d4", 1000)
    );

    // Terminal now: further selections stay quiet.
    assert_ok!(detection.select_process(running_process("d4", 9)).await);
    assert_eq!(selected_id(&detection).await.as_deref(), Some("d4"));
    assert!(fake.try_recv_command().is_none());
}

#[tokio::test]
async fn test_foreground_processes_reach_listeners_in_order() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let detection = detection_on(&fake, &selection);

    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    for tag in ["first", "second"] {
        let tx = seen_tx.clone();
        assert_ok!(
            detection
                .add_foreground_process_listener(move |device: &Device, process| {
                    let _ = tx.send((tag, device.id.clone(), process.pid));
                })
                .await
        );
    }

    fake.connect_device(1, &test_device("d1"), 10);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );
    fake.send_handshake_result(1, SupportType::Supported, None, 20);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(1, "d1", 1000)
    );

    fake.send_foreground_process(1, 100, "com.app.one", 30);
    fake.send_foreground_process(1, 101, "com.app.two", 40);

    assert_eq!(recv(&mut seen).await, ("first", "d1".to_string(), 100));
    assert_eq!(recv(&mut seen).await, ("second", "d1".to_string(), 100));
    assert_eq!(recv(&mut seen).await, ("first", "d1".to_string(), 101));
    assert_eq!(recv(&mut seen).await, ("second", "d1".to_string(), 101));
}

#[tokio::test]
async fn test_disconnect_fires_callback_once_and_sends_no_stop() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let (disc_tx, mut disconnects) = mpsc::unbounded_channel();
    let detection = ForegroundProcessDetection::new(
        fake.handle(),
        selection.clone(),
        Arc::new(LoggingMetricsSink),
        move |device: Device| {
            let _ = disc_tx.send(device);
        },
        1000,
    );

    fake.connect_device(1, &test_device("d1"), 10);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );
    fake.send_handshake_result(1, SupportType::Supported, None, 20);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(1, "d1", 1000)
    );

    fake.disconnect_device(1, 25);
    assert_eq!(recv(&mut disconnects).await.id, "d1");
    assert_eq!(selected_id(&detection).await, None);
    assert_eq!(selection.interest_count("d1"), 0);

    // The next command on the wire is the new device's probe: no
    // stopTracking was emitted for the dead stream.
    fake.connect_device(2, &test_device("d2"), 30);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(2, "d2")
    );
    fake.send_handshake_result(2, SupportType::Supported, None, 40);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(2, "d2", 1000)
    );

    assert!(disconnects.try_recv().is_err());
}

#[tokio::test]
async fn test_timestamp_regression_on_reconnect_is_reported_once() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let (fault_tx, mut faults) = mpsc::unbounded_channel();
    let detection = ForegroundProcessDetection::new(
        fake.handle(),
        selection.clone(),
        Arc::new(ChannelSink(fault_tx)),
        |_| {},
        1000,
    );

    fake.connect_device(1, &test_device("d1"), 2);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );
    // Equal timestamp on the disconnect: not a regression.
    fake.disconnect_device(1, 2);
    // Reconnect with an earlier timestamp on the same stream.
    fake.connect_device(1, &test_device("d1"), 1);

    let (fault, device_id) = recv(&mut faults).await;
    assert_eq!(fault, TransportFault::OldTimestampBiggerThanNew);
    assert_eq!(device_id, "d1");

    // The reconnected device is probed again, and later events with higher
    // timestamps pass without further reports.
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );
    fake.send_handshake_result(1, SupportType::Supported, None, 5);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(1, "d1", 1000)
    );
    assert!(faults.try_recv().is_err());
    drop(detection);
}

#[tokio::test]
async fn test_unrecognized_events_do_not_disturb_the_worker() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let _detection = detection_on(&fake, &selection);

    fake.send_event(TransportEvent::Unknown {
        event: "batteryLevel".to_string(),
        payload: serde_json::json!({ "percent": 80 }),
    });

    fake.connect_device(1, &test_device("d1"), 10);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );
}

#[tokio::test]
async fn test_dispose_stops_tracking_and_closes_the_handle() {
    let mut fake = FakeTransport::new();
    let selection = SelectionRegistry::new();
    let detection = detection_on(&fake, &selection);

    fake.connect_device(1, &test_device("d1"), 10);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::capability_handshake(1, "d1")
    );
    fake.send_handshake_result(1, SupportType::Supported, None, 20);
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::start_tracking(1, "d1", 1000)
    );

    detection.dispose().await;
    assert_eq!(
        fake.recv_command().await,
        TransportCommand::stop_tracking(1, "d1")
    );
    wait_for(|| selection.interest_count("d1") == 0, "interest release").await;

    // Operations on a disposed handle fail once the worker is gone.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        if detection.stop_polling().await.is_err() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "handle never reported the worker as gone"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
