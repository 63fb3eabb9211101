//! Contract Test: Shutdown Determinism
//!
//! Constraints verified:
//! - The runner terminates on cancellation, from Idle or mid-cycle
//! - In-flight provider calls are drained, not abandoned
//! - No new cycle starts after cancellation
//! - Persistence is flushed exactly once before `Stopped`
//!
//! If this test fails, someone has added:
//! - Tasks that ignore cancellation
//! - A shutdown path that drops in-flight updates
//! - Cycles started after cancellation

mod common;

use common::*;
use std::time::Duration;
use updater_core::{IpVersion, RecordConfig, RunnerEvent, RunnerState, Status};

fn www() -> RecordConfig {
    RecordConfig::new("example.com", "www", "mock").with_ip_version(IpVersion::V4)
}

#[tokio::test]
async fn cancellation_stops_idle_runner() {
    let provider = MockProvider::new("mock");
    let setup = Setup::new(vec![www()]).provider_for_all(&provider);
    let persistence = setup.persistence.clone();
    let mut harness = setup.start().await;
    let mut state = harness.state.clone();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let result = harness.shutdown().await;

    assert!(result.is_ok(), "runner shuts down cleanly: {:?}", result);
    assert_eq!(*state.borrow_and_update(), RunnerState::Stopped);
    assert_eq!(persistence.flush_count(), 1, "flushed exactly once");
}

#[tokio::test]
async fn cancellation_mid_cycle_drains_in_flight_update() {
    let provider = MockProvider::new("mock").with_delay(Duration::from_millis(300));
    let setup = Setup::new(vec![www()]).provider_for_all(&provider);
    setup.resolver.answer(IpVersion::V4, ip("1.2.3.4"));
    let persistence = setup.persistence.clone();
    let mut harness = setup.start().await;
    let store = harness.store.clone();
    let trigger = harness.trigger.clone();
    let mut state = harness.state.clone();

    assert!(trigger.force());
    wait_until(|| provider.call_count() == 1).await;

    harness.cancel();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| matches!(s, RunnerState::Draining | RunnerState::Stopped)),
    )
    .await
    .expect("runner starts draining")
    .expect("state channel open");

    // A force during drain must not start another cycle
    trigger.force();

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == RunnerState::Stopped),
    )
    .await
    .expect("runner stops")
    .expect("state channel open");

    assert_eq!(harness.cycles_started(), 1, "no cycle after cancellation");
    harness.join().await.unwrap();

    assert_eq!(provider.completed_count(), 1, "in-flight call finished");
    let record = store.get(&www().id()).await.unwrap();
    assert_eq!(record.status, Status::UpToDate, "drained result was applied");
    assert_eq!(record.history.len(), 1);
    assert_eq!(persistence.inner.events(&www().id()).await.len(), 1);
    assert_eq!(persistence.flush_count(), 1);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn runner_emits_lifecycle_events() {
    let provider = MockProvider::new("mock");
    let setup = Setup::new(vec![www()]).provider_for_all(&provider);
    setup.resolver.answer(IpVersion::V4, ip("1.2.3.4"));
    let mut harness = setup.start().await;

    harness.force_cycle().await;
    harness.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = harness.events_so_far().to_vec();
    assert_eq!(events.first(), Some(&RunnerEvent::Started { records_count: 1 }));
    assert_eq!(events.get(1), Some(&RunnerEvent::CycleStarted { forced: true }));
    assert!(matches!(events.get(2), Some(RunnerEvent::CycleCompleted(_))));
    assert_eq!(events.last(), Some(&RunnerEvent::Stopped));

    harness.join().await.unwrap();
}

#[tokio::test]
async fn dropped_cancellation_sender_stops_runner() {
    use std::sync::Arc;
    use updater_core::{MemoryPersistence, RecordStore, Runner, RunnerConfig};

    let provider = MockProvider::new("mock");
    let store = Arc::new(
        RecordStore::load(&[www()], Arc::new(MemoryPersistence::new()))
            .await
            .unwrap(),
    );
    let mut providers = std::collections::HashMap::new();
    providers.insert(
        www().id(),
        Arc::new(provider) as Arc<dyn updater_core::DnsProvider>,
    );

    let (runner, _events) = Runner::new(
        store,
        Arc::new(ScriptedResolver::new()),
        providers,
        Arc::new(RecordingNotifier::default()),
        Duration::from_secs(3600),
        RunnerConfig::default(),
    )
    .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    drop(shutdown_tx);

    let result = tokio::time::timeout(Duration::from_secs(5), runner.run(shutdown_rx)).await;
    assert!(result.is_ok(), "runner returns when its cancellation source is gone");
    assert_eq!(runner.state(), RunnerState::Stopped);
}

#[tokio::test]
async fn runner_without_provider_for_a_record_is_rejected() {
    use std::sync::Arc;
    use updater_core::{Error, MemoryPersistence, RecordStore, Runner, RunnerConfig};

    let store = Arc::new(
        RecordStore::load(&[www()], Arc::new(MemoryPersistence::new()))
            .await
            .unwrap(),
    );

    let result = Runner::new(
        store,
        Arc::new(ScriptedResolver::new()),
        std::collections::HashMap::new(),
        Arc::new(RecordingNotifier::default()),
        Duration::from_secs(3600),
        RunnerConfig::default(),
    );

    assert!(matches!(result, Err(Error::Config(_))));
}
