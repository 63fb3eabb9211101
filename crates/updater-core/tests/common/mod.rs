//! Test doubles and common utilities for runner contract tests
//!
//! The doubles record every call behind shared counters so a test can keep
//! a clone while the runner owns another.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use updater_core::{
    CycleSummary, DnsProvider, Error, Event, ForceTrigger, IpResolver, IpVersion,
    MemoryPersistence, Notifier, Priority, RecordConfig, RecordId, RecordStore, Result, Runner,
    RunnerConfig, RunnerEvent, RunnerState, UpdateResult, traits::Persistence,
};

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Resolver answering from a per-family script; unscripted families fail
#[derive(Clone, Default)]
pub struct ScriptedResolver {
    answers: Arc<Mutex<HashMap<IpVersion, IpAddr>>>,
    calls: Arc<Mutex<Vec<IpVersion>>>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `version` lookups with `ip`
    pub fn answer(&self, version: IpVersion, ip: IpAddr) -> &Self {
        self.answers.lock().unwrap().insert(version, ip);
        self
    }

    /// Fail `version` lookups
    pub fn fail(&self, version: IpVersion) -> &Self {
        self.answers.lock().unwrap().remove(&version);
        self
    }

    pub fn calls(&self) -> Vec<IpVersion> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IpResolver for ScriptedResolver {
    async fn resolve(&self, version: IpVersion) -> Result<IpAddr> {
        self.calls.lock().unwrap().push(version);
        self.answers
            .lock()
            .unwrap()
            .get(&version)
            .copied()
            .ok_or_else(|| Error::ip_resolution(format!("no scripted {} answer", version)))
    }
}

/// How a [`MockProvider`] answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    FailTransient,
    FailPermanent,
}

/// Provider stub tracking calls and concurrency
#[derive(Clone)]
pub struct MockProvider {
    name: &'static str,
    behaviour: Arc<Mutex<Behaviour>>,
    calls: Arc<Mutex<Vec<(RecordId, IpAddr)>>>,
    completed: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
}

impl MockProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            behaviour: Arc::new(Mutex::new(Behaviour::Succeed)),
            calls: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            gate: None,
        }
    }

    /// A provider whose every call fails transiently
    pub fn failing(name: &'static str) -> Self {
        let provider = Self::new(name);
        provider.set_behaviour(Behaviour::FailTransient);
        provider
    }

    /// Sleep `delay` inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block every call until the returned semaphore gets permits
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(RecordId, IpAddr)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsProvider for MockProvider {
    async fn update_record(&self, record: &RecordId, ip: IpAddr) -> Result<UpdateResult> {
        self.calls.lock().unwrap().push((record.clone(), ip));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            Behaviour::Succeed => Ok(UpdateResult::Updated { previous_ip: None }),
            Behaviour::FailTransient => Err(Error::http("502 Bad Gateway")),
            Behaviour::FailPermanent => Err(Error::auth("invalid token")),
        }
    }

    fn provider_name(&self) -> &'static str {
        self.name
    }
}

/// Memory persistence counting flushes
#[derive(Clone, Default)]
pub struct CountingPersistence {
    pub inner: MemoryPersistence,
    flushes: Arc<AtomicUsize>,
}

impl CountingPersistence {
    pub fn with_history(history: impl IntoIterator<Item = (RecordId, Vec<Event>)>) -> Self {
        Self {
            inner: MemoryPersistence::with_history(history),
            flushes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persistence for CountingPersistence {
    async fn load_events(&self, record: &RecordId) -> Result<Vec<Event>> {
        self.inner.load_events(record).await
    }

    async fn append_event(&self, record: &RecordId, event: &Event) -> Result<()> {
        self.inner.append_event(record, event).await
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

/// Notifier keeping every message
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(Priority, String)>>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(Priority, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, priority: Priority, message: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((priority, message.to_string()));
        Ok(())
    }
}

/// Everything needed to start a runner
pub struct Setup {
    pub records: Vec<RecordConfig>,
    pub persistence: CountingPersistence,
    pub resolver: ScriptedResolver,
    pub providers: HashMap<RecordId, Arc<dyn DnsProvider>>,
    pub notifier: RecordingNotifier,
    pub period: Duration,
    pub config: RunnerConfig,
}

impl Setup {
    /// Records without history; the period is long enough that only forced
    /// cycles run during a test
    pub fn new(records: Vec<RecordConfig>) -> Self {
        Self {
            records,
            persistence: CountingPersistence::default(),
            resolver: ScriptedResolver::new(),
            providers: HashMap::new(),
            notifier: RecordingNotifier::default(),
            period: Duration::from_secs(3600),
            config: RunnerConfig {
                event_channel_capacity: 100,
                ..RunnerConfig::default()
            },
        }
    }

    /// Use `provider` for the record `id`
    pub fn provider(mut self, id: RecordId, provider: &MockProvider) -> Self {
        self.providers.insert(id, Arc::new(provider.clone()));
        self
    }

    /// Use `provider` for every record without one
    pub fn provider_for_all(mut self, provider: &MockProvider) -> Self {
        for record in &self.records {
            self.providers
                .entry(record.id())
                .or_insert_with(|| Arc::new(provider.clone()));
        }
        self
    }

    pub async fn start(self) -> Harness {
        let store = Arc::new(
            RecordStore::load(&self.records, Arc::new(self.persistence.clone()))
                .await
                .expect("store loads"),
        );

        let (runner, events) = Runner::new(
            store.clone(),
            Arc::new(self.resolver.clone()),
            self.providers,
            Arc::new(self.notifier.clone()),
            self.period,
            self.config,
        )
        .expect("runner construction succeeds");

        let trigger = runner.trigger();
        let state = runner.subscribe_state();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        Harness {
            store,
            trigger,
            state,
            events,
            seen: Vec::new(),
            shutdown_tx,
            handle,
        }
    }
}

/// A running runner plus handles to observe and stop it
pub struct Harness {
    pub store: Arc<RecordStore>,
    pub trigger: ForceTrigger,
    pub state: watch::Receiver<RunnerState>,
    events: mpsc::Receiver<RunnerEvent>,
    seen: Vec<RunnerEvent>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
}

impl Harness {
    /// Wait for the next completed cycle
    pub async fn next_cycle(&mut self) -> CycleSummary {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.expect("runner event channel open");
                self.seen.push(event.clone());
                if let RunnerEvent::CycleCompleted(summary) = event {
                    return summary;
                }
            }
        })
        .await
        .expect("cycle completes within 5 seconds")
    }

    /// Force a cycle and wait for it to complete
    pub async fn force_cycle(&mut self) -> CycleSummary {
        assert!(self.trigger.force(), "no forced cycle should be pending");
        self.next_cycle().await
    }

    /// Every event received so far, draining what is buffered
    pub fn events_so_far(&mut self) -> &[RunnerEvent] {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }

    pub fn cycles_started(&mut self) -> usize {
        self.events_so_far()
            .iter()
            .filter(|event| matches!(event, RunnerEvent::CycleStarted { .. }))
            .count()
    }

    /// Request cancellation without waiting
    pub fn cancel(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Request cancellation and wait for the runner to return
    pub async fn shutdown(self) -> Result<()> {
        self.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("runner stops within 5 seconds")
            .expect("runner task does not panic")
    }

    /// Wait for the runner task to return after a cancel
    pub async fn join(self) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("runner stops within 5 seconds")
            .expect("runner task does not panic")
    }
}

/// Poll `condition` every 10ms for up to 5 seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition met within 5 seconds");
}

/// Assert that status, current IP and timestamps agree with the history
pub fn assert_coherent(record: &updater_core::Record) {
    use updater_core::Status;

    match record.last_event() {
        None => assert_eq!(record.status, Status::Unset),
        Some(last) => assert_eq!(record.status, last.status, "{}", record.id),
    }

    let last_success = record
        .history
        .iter()
        .rev()
        .find(|event| event.status == Status::UpToDate);
    assert_eq!(record.current_ip, last_success.and_then(|event| event.ip));
    assert_eq!(record.last_update, last_success.map(|event| event.time));

    assert!(
        record.history.windows(2).all(|w| w[0].time < w[1].time),
        "history timestamps strictly increase for {}",
        record.id
    );
}
