//! Device monitors driven end to end against the simulated reader.

use std::sync::Arc;
use std::time::Duration;

use tagwatch_core::reader::simulated::{Scenario, ScenarioCycle, SimulatedDriver};
use tagwatch_core::types::{FelicaTarget, TypeATarget};
use tagwatch_core::{
    start_all, ChannelSink, Config, DeviceMonitor, EventSink, MonitorHandle, MonitorState,
    PollingConfig, ProtocolFamily, ReaderConfig, ReaderEvent, ReaderStatus, TagEvent, TagIdentity,
    TagwatchError, TargetInfo,
};
use tokio::sync::mpsc::UnboundedReceiver;

const TIMEOUT: Duration = Duration::from_secs(5);

fn fast_polling() -> PollingConfig {
    PollingConfig {
        interval_ms: 2,
        window_ms: 20,
        open_backoff_secs: 0,
        reopen_delay_secs: 0,
        ..PollingConfig::default()
    }
}

fn type_a(uid: &str) -> TargetInfo {
    TargetInfo::TypeA(TypeATarget {
        atqa: vec![0x00, 0x44],
        sak: 0x08,
        uid: TagIdentity::from_hex(uid).unwrap().as_bytes().to_vec(),
        ats: Vec::new(),
    })
}

fn felica(id: &str) -> TargetInfo {
    TargetInfo::Felica(FelicaTarget {
        id: TagIdentity::from_hex(id).unwrap().as_bytes().to_vec(),
        ..FelicaTarget::default()
    })
}

fn id(hex: &str) -> TagIdentity {
    TagIdentity::from_hex(hex).unwrap()
}

fn start(
    scenario: Scenario,
) -> (
    MonitorHandle,
    SimulatedDriver,
    UnboundedReceiver<ReaderEvent>,
) {
    let driver = SimulatedDriver::new(scenario);
    let (sink, rx) = ChannelSink::new();
    let monitor = DeviceMonitor::new(
        ReaderConfig::new("Reader 1", "sim:test"),
        fast_polling(),
        Box::new(driver.clone()),
        Arc::new(sink),
    )
    .unwrap();
    (monitor.start(), driver, rx)
}

async fn next_event(rx: &mut UnboundedReceiver<ReaderEvent>) -> ReaderEvent {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn wait_for(handle: &MonitorHandle, what: impl Fn(&ReaderStatus) -> bool) -> ReaderStatus {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let status = handle.status();
        if what(&status) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for status, last seen: {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn shutdown(handle: MonitorHandle) {
    handle.stop();
    tokio::time::timeout(TIMEOUT, handle.join())
        .await
        .expect("monitor did not stop in time")
        .expect("monitor panicked");
}

fn assert_arrived(event: &ReaderEvent, uid: &str) {
    match &event.event {
        TagEvent::Arrived { identity, .. } => assert_eq!(identity, &id(uid)),
        TagEvent::Departed { identity } => panic!("expected arrival of {uid}, got departure of {identity}"),
    }
}

fn assert_departed(event: &ReaderEvent, uid: &str) {
    match &event.event {
        TagEvent::Departed { identity } => assert_eq!(identity, &id(uid)),
        TagEvent::Arrived { identity, .. } => panic!("expected departure of {uid}, got arrival of {identity}"),
    }
}

#[tokio::test]
async fn test_tag_arrives_then_departs() {
    let (handle, _driver, mut rx) = start(Scenario::from_cycles(vec![
        ScenarioCycle::with_tags(vec![type_a("04A1B2C3")]),
        ScenarioCycle::with_tags(vec![type_a("04A1B2C3")]),
        ScenarioCycle::default(),
    ]));

    let arrived = next_event(&mut rx).await;
    assert_arrived(&arrived, "04A1B2C3");
    assert_eq!(arrived.reader, "Reader 1");
    match &arrived.event {
        TagEvent::Arrived { target, .. } => assert_eq!(target.family(), ProtocolFamily::TypeA),
        TagEvent::Departed { .. } => unreachable!(),
    }

    let departed = next_event(&mut rx).await;
    assert_departed(&departed, "04A1B2C3");
    assert_eq!(departed.session, arrived.session);

    let status = wait_for(&handle, |s| s.cycles >= 5).await;
    assert!(status.present.is_empty());
    assert_eq!(status.sessions, 1);
    assert!(rx.try_recv().is_err());

    shutdown(handle).await;
}

#[tokio::test]
async fn test_departures_are_emitted_before_arrivals() {
    let (handle, _driver, mut rx) = start(Scenario::from_cycles(vec![
        ScenarioCycle::with_tags(vec![type_a("04A1"), type_a("07BB")]),
        ScenarioCycle::with_tags(vec![type_a("07BB"), type_a("09CC")]),
    ]));

    assert_arrived(&next_event(&mut rx).await, "04A1");
    assert_arrived(&next_event(&mut rx).await, "07BB");
    assert_departed(&next_event(&mut rx).await, "04A1");
    assert_arrived(&next_event(&mut rx).await, "09CC");

    let status = wait_for(&handle, |s| s.cycles >= 4).await;
    let present: Vec<_> = status.present.iter().map(|t| t.identity.clone()).collect();
    assert_eq!(present, vec![id("07BB"), id("09CC")]);
    assert!(rx.try_recv().is_err());

    shutdown(handle).await;
}

#[tokio::test]
async fn test_tags_under_different_families_form_one_snapshot() {
    let (handle, _driver, mut rx) = start(Scenario::from_cycles(vec![ScenarioCycle::with_tags(
        vec![type_a("04A1"), felica("0102030405060708")],
    )]));

    assert_arrived(&next_event(&mut rx).await, "04A1");
    assert_arrived(&next_event(&mut rx).await, "0102030405060708");

    // FeliCa answers at both 212 and 424 kbps; it must not flap.
    wait_for(&handle, |s| s.cycles >= 5).await;
    assert!(rx.try_recv().is_err());

    shutdown(handle).await;
}

#[tokio::test]
async fn test_device_loss_starts_a_fresh_session_without_departures() {
    let (handle, driver, mut rx) = start(Scenario::from_cycles(vec![
        ScenarioCycle::with_tags(vec![type_a("04A1")]),
        ScenarioCycle::device_lost(),
        ScenarioCycle::with_tags(vec![type_a("04A1")]),
    ]));

    let first = next_event(&mut rx).await;
    assert_arrived(&first, "04A1");

    let second = next_event(&mut rx).await;
    assert_arrived(&second, "04A1");
    assert_ne!(first.session, second.session);

    let status = wait_for(&handle, |s| s.sessions == 2 && s.cycles >= 3).await;
    assert_eq!(status.device_errors, 1);
    assert_eq!(status.state, MonitorState::Polling);
    assert_eq!(status.session, Some(second.session));
    assert_eq!(driver.stats().opens(), 2);
    assert_eq!(driver.stats().closes(), 1);
    assert!(rx.try_recv().is_err());

    shutdown(handle).await;
}

#[tokio::test]
async fn test_open_and_init_failures_are_retried() {
    let mut scenario = Scenario::from_cycles(vec![ScenarioCycle::with_tags(vec![type_a("04A1")])]);
    scenario.open_failures = 2;
    scenario.init_failures = 1;
    let (handle, driver, mut rx) = start(scenario);

    assert_arrived(&next_event(&mut rx).await, "04A1");

    let status = handle.status();
    assert_eq!(status.open_failures, 2);
    assert_eq!(status.init_failures, 1);
    assert_eq!(status.sessions, 1);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("initiator")));

    // Two successful opens: the first failed to initialize and was closed.
    assert_eq!(driver.stats().opens(), 2);
    assert_eq!(driver.stats().closes(), 1);

    shutdown(handle).await;
}

#[tokio::test]
async fn test_transport_error_keeps_tracked_tags() {
    let (handle, _driver, mut rx) = start(Scenario::from_cycles(vec![
        ScenarioCycle::with_tags(vec![type_a("04A1")]),
        ScenarioCycle::default().failing(ProtocolFamily::TypeA),
        ScenarioCycle::with_tags(vec![type_a("04A1")]),
    ]));

    assert_arrived(&next_event(&mut rx).await, "04A1");

    let status = wait_for(&handle, |s| s.cycles >= 5).await;
    assert_eq!(status.transport_errors, 1);
    assert_eq!(status.present.len(), 1);
    assert!(
        rx.try_recv().is_err(),
        "a transport error must not depart or re-arrive the tag"
    );

    shutdown(handle).await;
}

#[tokio::test]
async fn test_transport_error_on_other_family_still_departs() {
    let (handle, _driver, mut rx) = start(Scenario::from_cycles(vec![
        ScenarioCycle::with_tags(vec![type_a("04A1")]),
        ScenarioCycle::default().failing(ProtocolFamily::Felica),
    ]));

    assert_arrived(&next_event(&mut rx).await, "04A1");
    assert_departed(&next_event(&mut rx).await, "04A1");

    let status = wait_for(&handle, |s| s.cycles >= 3).await;
    assert!(status.transport_errors >= 2, "both FeliCa rates fail each sweep");

    shutdown(handle).await;
}

#[tokio::test]
async fn test_malformed_targets_are_counted_not_tracked() {
    let nameless = TargetInfo::TypeA(TypeATarget::default());
    let (handle, _driver, mut rx) = start(Scenario::from_cycles(vec![ScenarioCycle::with_tags(
        vec![nameless, type_a("04A1")],
    )]));

    assert_arrived(&next_event(&mut rx).await, "04A1");

    let status = wait_for(&handle, |s| s.cycles >= 3).await;
    assert!(status.malformed_targets >= 3);
    assert_eq!(status.present.len(), 1);
    assert!(rx.try_recv().is_err());

    shutdown(handle).await;
}

#[tokio::test]
async fn test_stop_closes_the_device() {
    let mut scenario = Scenario::from_cycles(vec![
        ScenarioCycle::with_tags(vec![type_a("04A1")]),
        ScenarioCycle::default(),
    ]);
    scenario.repeat = true;
    let (handle, driver, _rx) = start(scenario);

    wait_for(&handle, |s| s.cycles >= 3).await;
    let status = handle.status_handle();
    shutdown(handle).await;

    let status = status.snapshot();
    assert_eq!(status.state, MonitorState::Stopped);
    assert!(status.present.is_empty());
    assert_eq!(status.session, None);
    assert_eq!(driver.stats().opens(), driver.stats().closes());
}

#[tokio::test]
async fn test_stop_interrupts_open_backoff() {
    let mut scenario = Scenario::default();
    scenario.open_failures = u32::MAX;

    let driver = SimulatedDriver::new(scenario);
    let (sink, _rx) = ChannelSink::new();
    let polling = PollingConfig {
        open_backoff_secs: 60,
        ..fast_polling()
    };
    let handle = DeviceMonitor::new(
        ReaderConfig::new("Reader 1", "sim:test"),
        polling,
        Box::new(driver),
        Arc::new(sink),
    )
    .unwrap()
    .start();

    wait_for(&handle, |s| s.open_failures == 1).await;
    shutdown(handle).await;
}

#[tokio::test]
async fn test_monitors_are_independent() {
    let (sink, mut rx) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    let mut broken = Scenario::default();
    broken.open_failures = u32::MAX;
    let broken = DeviceMonitor::new(
        ReaderConfig::new("Broken", "sim:broken"),
        fast_polling(),
        Box::new(SimulatedDriver::new(broken)),
        Arc::clone(&sink),
    )
    .unwrap()
    .start();

    let working = DeviceMonitor::new(
        ReaderConfig::new("Working", "sim:working"),
        fast_polling(),
        Box::new(SimulatedDriver::new(Scenario::from_cycles(vec![
            ScenarioCycle::with_tags(vec![type_a("04A1")]),
        ]))),
        Arc::clone(&sink),
    )
    .unwrap()
    .start();

    let event = next_event(&mut rx).await;
    assert_eq!(event.reader, "Working");
    assert_arrived(&event, "04A1");

    wait_for(&broken, |s| s.open_failures >= 3).await;
    assert_eq!(broken.status().sessions, 0);

    shutdown(broken).await;
    shutdown(working).await;
}

#[tokio::test]
async fn test_start_all_loads_scenario_files() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = dir.path().join("door.toml");
    std::fs::write(
        &scenario,
        r#"
        device_name = "Door Reader"

        [[cycle]]
        tags = [{ family = "type_a", atqa = "0044", sak = 8, uid = "04A1B2C3" }]
        "#,
    )
    .unwrap();

    let mut config = Config::default();
    config.polling = fast_polling();
    config.readers = vec![ReaderConfig::new(
        "Door",
        format!("sim:{}", scenario.display()),
    )];

    let (sink, mut rx) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let handles = start_all(&config, &sink).unwrap();
    assert_eq!(handles.len(), 1);

    let event = next_event(&mut rx).await;
    assert_eq!(event.reader, "Door");
    assert_arrived(&event, "04A1B2C3");

    let status = wait_for(&handles[0], |s| s.device_name.is_some()).await;
    assert_eq!(status.device_name.as_deref(), Some("Door Reader"));

    for handle in handles {
        shutdown(handle).await;
    }
}

#[tokio::test]
async fn test_start_all_rejects_unknown_driver_before_starting_anything() {
    let mut config = Config::default();
    config.readers = vec![ReaderConfig::new("Reader 1", "pn71xx:/dev/pn5xx_i2c0")];

    let (sink, _rx) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let err = start_all(&config, &sink).unwrap_err();
    assert!(matches!(err, TagwatchError::UnsupportedDriver(_)));
}

#[tokio::test]
async fn test_start_all_rejects_missing_scenario() {
    let mut config = Config::default();
    config.readers = vec![ReaderConfig::new("Reader 1", "sim:/nonexistent/tagwatch.toml")];

    let (sink, _rx) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let err = start_all(&config, &sink).unwrap_err();
    assert!(matches!(err, TagwatchError::InvalidScenario(_)));
}
