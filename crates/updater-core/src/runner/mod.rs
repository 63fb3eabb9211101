//! Update cycle scheduler
//!
//! The [`Runner`] drives the whole update loop:
//! - waits for the periodic timer, a forced-update signal or cancellation
//! - runs one cycle per wake-up: resolve the public IP once per address
//!   family, pick the records that need an update, dispatch them in parallel
//! - aggregates the outcomes into one log line and at most one notification
//!
//! ## Lifecycle
//!
//! ```text
//!          timer | force                  all updates joined
//!   Idle ─────────────────▶ Running ─────────────────────────▶ Idle
//!    │                         │
//!    │ cancel                  │ cancel
//!    ▼                         ▼
//!  Stopped ◀─── flush ──── Draining (in-flight updates finish)
//! ```
//!
//! Cycles never overlap. Forced-update signals arriving while a cycle runs
//! are coalesced into a single follow-up cycle.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{IpVersion, RunnerConfig, validate_period};
use crate::error::{Error, Result};
use crate::record::{Event, Record, RecordId, Status};
use crate::store::RecordStore;
use crate::traits::{DnsProvider, IpResolver, Notifier, Priority};

/// Bound on delivering one cycle notification
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Waiting for the timer, a forced update or cancellation
    Idle,
    /// A cycle is in progress
    Running,
    /// Cancellation arrived mid-cycle; in-flight updates are finishing
    Draining,
    /// Terminal
    Stopped,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Idle => f.write_str("idle"),
            RunnerState::Running => f.write_str("running"),
            RunnerState::Draining => f.write_str("draining"),
            RunnerState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Aggregated outcome of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Whether the cycle was requested through the force trigger
    pub forced: bool,
    /// Records the provider confirmed at the resolved IP
    pub updated: usize,
    /// Records already up to date, not dispatched
    pub unchanged: usize,
    /// Records left untouched (resolution failure or cancellation)
    pub skipped: usize,
    /// Records whose provider call failed
    pub failed: usize,
    /// `"<fqdn>: <diagnostic>"` for each failed record
    pub failures: Vec<String>,
}

/// Events emitted by the runner for monitoring and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    /// Runner started
    Started {
        /// Number of managed records
        records_count: usize,
    },
    /// A cycle began
    CycleStarted {
        /// Whether the cycle was forced
        forced: bool,
    },
    /// A cycle finished
    CycleCompleted(CycleSummary),
    /// Runner reached `Stopped`
    Stopped,
}

/// Send-only handle requesting an out-of-schedule cycle
///
/// Backed by a single-slot channel: a request made while another is
/// already pending is dropped, so bursts collapse into one cycle.
#[derive(Debug, Clone)]
pub struct ForceTrigger {
    tx: mpsc::Sender<()>,
}

impl ForceTrigger {
    /// Request a forced cycle without blocking
    ///
    /// Returns `false` when the request was coalesced into a pending one.
    pub fn force(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Forced update already pending, request coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("Forced update requested after the runner was dropped");
                false
            }
        }
    }
}

/// What happened to one dispatched record
enum Outcome {
    Updated,
    Failed(String),
    Skipped,
}

/// Update cycle scheduler
///
/// ## Usage
///
/// ```rust,ignore
/// let (runner, mut events) = Runner::new(store, resolver, providers, notifier, period, config)?;
/// let trigger = runner.trigger();
/// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
///
/// let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });
/// trigger.force();
/// // ...
/// shutdown_tx.send(true)?;
/// handle.await??;
/// ```
pub struct Runner {
    store: Arc<RecordStore>,
    resolver: Arc<dyn IpResolver>,
    providers: HashMap<RecordId, Arc<dyn DnsProvider>>,
    notifier: Arc<dyn Notifier>,
    period: Duration,
    config: RunnerConfig,

    /// Kept so the force channel never closes while the runner exists
    force_tx: mpsc::Sender<()>,
    /// Locked for the duration of `run`
    force_rx: Mutex<mpsc::Receiver<()>>,

    state_tx: watch::Sender<RunnerState>,
    event_tx: mpsc::Sender<RunnerEvent>,
}

impl Runner {
    /// Create a runner over an already loaded store
    ///
    /// Every record in the store needs a provider in `providers`.
    ///
    /// # Returns
    ///
    /// A tuple of (runner, event_receiver) where event_receiver yields runner events
    pub fn new(
        store: Arc<RecordStore>,
        resolver: Arc<dyn IpResolver>,
        providers: HashMap<RecordId, Arc<dyn DnsProvider>>,
        notifier: Arc<dyn Notifier>,
        period: Duration,
        config: RunnerConfig,
    ) -> Result<(Self, mpsc::Receiver<RunnerEvent>)> {
        config.validate()?;
        validate_period(period)?;

        if let Some(missing) = store.ids().find(|id| !providers.contains_key(*id)) {
            return Err(Error::config(format!("No provider for record {}", missing)));
        }

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let (force_tx, force_rx) = mpsc::channel(1);
        let (state_tx, _) = watch::channel(RunnerState::Idle);

        let runner = Self {
            store,
            resolver,
            providers,
            notifier,
            period,
            config,
            force_tx,
            force_rx: Mutex::new(force_rx),
            state_tx,
            event_tx,
        };

        Ok((runner, event_rx))
    }

    /// Handle for requesting forced cycles
    pub fn trigger(&self) -> ForceTrigger {
        ForceTrigger {
            tx: self.force_tx.clone(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunnerState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle state changes
    ///
    /// Owners wait for [`RunnerState::Stopped`] to know the runner drained
    /// and the store was flushed.
    pub fn subscribe_state(&self) -> watch::Receiver<RunnerState> {
        self.state_tx.subscribe()
    }

    /// The store this runner updates
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Run until `shutdown` becomes `true` (or its sender is dropped)
    ///
    /// On cancellation no new cycle starts, a running cycle drains, the store
    /// is flushed and the state becomes [`RunnerState::Stopped`]. A flush
    /// failure is returned after the runner stopped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut force_rx = self
            .force_rx
            .try_lock()
            .map_err(|_| Error::Other("Runner is already running".to_string()))?;

        if self.state() == RunnerState::Stopped {
            return Err(Error::Other("Runner already stopped".to_string()));
        }

        info!(
            "Runner started: {} records, period {:?}",
            self.store.len(),
            self.period
        );
        self.emit_event(RunnerEvent::Started {
            records_count: self.store.len(),
        });

        let first_tick = Instant::now()
            .checked_add(self.period)
            .ok_or_else(|| Error::config(format!("Update period {:?} is out of range", self.period)))?;
        let mut ticker = tokio::time::interval_at(first_tick, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if cancellation_requested(&shutdown) {
                break;
            }

            let forced = tokio::select! {
                biased;

                _ = shutdown.wait_for(|stop| *stop) => break,
                Some(()) = force_rx.recv() => true,
                _ = ticker.tick() => false,
            };

            let summary = self.run_cycle(forced, &mut shutdown).await;
            self.emit_event(RunnerEvent::CycleCompleted(summary));

            if !cancellation_requested(&shutdown) {
                self.set_state(RunnerState::Idle);
            }
        }

        info!("Cancellation requested, stopping runner");
        let flushed = self.store.flush().await;
        if let Err(e) = &flushed {
            error!("Failed to flush persistence: {}", e);
        }

        self.set_state(RunnerState::Stopped);
        self.emit_event(RunnerEvent::Stopped);
        info!("Runner stopped");

        flushed
    }

    /// Run one cycle and return its aggregated outcome
    async fn run_cycle(&self, forced: bool, shutdown: &mut watch::Receiver<bool>) -> CycleSummary {
        self.set_state(RunnerState::Running);
        self.emit_event(RunnerEvent::CycleStarted { forced });
        debug!("Cycle started (forced: {})", forced);

        let mut summary = CycleSummary {
            forced,
            ..CycleSummary::default()
        };

        let records = self.store.all().await;
        let resolved = self.resolve_families(&records).await;

        let mut dispatch = Vec::new();
        for record in records {
            let Some(ip) = resolved.get(&record.ip_version).copied().flatten() else {
                debug!("Skipping {}: no {} address this cycle", record.id, record.ip_version);
                summary.skipped += 1;
                continue;
            };

            if !needs_update(&record, ip, forced, self.config.refresh_on_force) {
                debug!("{} already up to date at {}", record.id, ip);
                summary.unchanged += 1;
                continue;
            }

            match self.providers.get(&record.id) {
                Some(provider) => dispatch.push((record.id, ip, provider.clone())),
                None => {
                    error!("No provider for record {}, skipping", record.id);
                    summary.skipped += 1;
                }
            }
        }

        if cancellation_requested(shutdown) {
            summary.skipped += dispatch.len();
            dispatch.clear();
        }

        let dispatched: Vec<RecordId> = dispatch.iter().map(|(id, _, _)| id.clone()).collect();
        let semaphore = self
            .config
            .max_concurrent_updates
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let mut tasks = JoinSet::new();
        for (id, ip, provider) in dispatch {
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let shutdown = shutdown.clone();
            let timeout = self.config.provider_timeout;

            tasks.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return (id, Outcome::Skipped),
                    },
                    None => None,
                };

                // Not started yet, so not in flight
                if cancellation_requested(&shutdown) {
                    return (id, Outcome::Skipped);
                }

                let outcome = update_record(&store, provider.as_ref(), &id, ip, timeout).await;
                (id, outcome)
            });
        }

        let mut draining = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((id, outcome))) => match outcome {
                        Outcome::Updated => summary.updated += 1,
                        Outcome::Skipped => summary.skipped += 1,
                        Outcome::Failed(message) => {
                            summary.failed += 1;
                            summary.failures.push(format!("{}: {}", id, message));
                        }
                    },
                    Some(Err(e)) => {
                        error!("Update task failed: {}", e);
                        summary.failed += 1;
                        summary.failures.push(format!("update task failed: {}", e));
                    }
                },
                _ = shutdown.wait_for(|stop| *stop), if !draining => {
                    draining = true;
                    self.set_state(RunnerState::Draining);
                    info!("Cancellation requested, draining {} in-flight updates", tasks.len());
                }
            }
        }

        // A task that died between begin_update and apply_result leaves its
        // record marked Updating
        for id in &dispatched {
            if let Err(e) = self.store.cancel_update(id).await {
                error!("Failed to reset status of {}: {}", id, e);
            }
        }

        info!(
            "Cycle finished: {} updated, {} unchanged, {} skipped, {} failed",
            summary.updated, summary.unchanged, summary.skipped, summary.failed
        );

        if summary.failed > 0 {
            self.notify_failures(&summary);
        }

        summary
    }

    /// Resolve the public IP once for each family the records need
    async fn resolve_families(&self, records: &[Record]) -> HashMap<IpVersion, Option<IpAddr>> {
        let mut resolved = HashMap::new();

        for record in records {
            let version = record.ip_version;
            if resolved.contains_key(&version) {
                continue;
            }

            let ip = match self.resolver.resolve(version).await {
                Ok(ip) if version.accepts(&ip) => {
                    debug!("Resolved {} address: {}", version, ip);
                    Some(ip)
                }
                Ok(ip) => {
                    warn!("Resolver returned {} for an {} lookup, ignoring", ip, version);
                    None
                }
                Err(e) => {
                    warn!("Failed to resolve public {} address: {}", version, e);
                    None
                }
            };
            resolved.insert(version, ip);
        }

        resolved
    }

    /// Send one aggregated failure notification without waiting for it
    fn notify_failures(&self, summary: &CycleSummary) {
        let message = format!(
            "{} record(s) failed to update: {}",
            summary.failed,
            summary.failures.join("; ")
        );
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            match tokio::time::timeout(NOTIFY_TIMEOUT, notifier.notify(Priority::Error, &message))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to send notification: {}", e),
                Err(_) => warn!("Notification timed out after {:?}", NOTIFY_TIMEOUT),
            }
        });
    }

    fn set_state(&self, state: RunnerState) {
        self.state_tx.send_replace(state);
    }

    fn emit_event(&self, event: RunnerEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Whether a record qualifies for an update this cycle
///
/// Unset and failed records always do; up-to-date records only when the
/// resolved IP changed, or on a forced cycle with refresh enabled.
pub fn needs_update(record: &Record, resolved: IpAddr, forced: bool, refresh_on_force: bool) -> bool {
    if forced && refresh_on_force {
        return true;
    }

    match record.status {
        Status::Unset | Status::Fail => true,
        Status::UpToDate | Status::Updating => record.current_ip != Some(resolved),
    }
}

/// Perform one provider call and record its outcome in the store
async fn update_record(
    store: &RecordStore,
    provider: &dyn DnsProvider,
    id: &RecordId,
    ip: IpAddr,
    timeout: Duration,
) -> Outcome {
    if let Err(e) = store.begin_update(id).await {
        error!("Cannot start update of {}: {}", id, e);
        return Outcome::Skipped;
    }

    let result = tokio::time::timeout(timeout, provider.update_record(id, ip))
        .await
        .unwrap_or_else(|_| {
            Err(Error::timeout(format!(
                "{} did not answer within {:?}",
                provider.provider_name(),
                timeout
            )))
        });

    let (event, outcome) = match result {
        Ok(result) => {
            info!("{} -> {} via {}: {}", id, ip, provider.provider_name(), result.message());
            (Event::up_to_date(ip, result.message()), Outcome::Updated)
        }
        Err(e) => {
            let message = format!("{} failure: {}", e.failure_kind(), e);
            error!("Failed to update {} via {}: {}", id, provider.provider_name(), message);
            (Event::failed(message.clone()), Outcome::Failed(message))
        }
    };

    if let Err(e) = store.apply_result(id, event).await {
        error!("{}", e);
    }

    outcome
}

fn cancellation_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
