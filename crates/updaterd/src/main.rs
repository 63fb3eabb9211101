// # updaterd - DDNS Updater Daemon
//
// The daemon is a thin integration layer over `updater-core`:
// 1. Reading configuration from environment variables and `config.json`
// 2. Initializing the runtime and logging
// 3. Registering providers and building the IP resolver
// 4. Running the update `Runner` next to the status, health and backup tasks
// 5. Draining everything on SIGINT/SIGTERM
//
// No update logic lives here. See `config.rs` for the environment variables.
//
// ## Example
//
// ```bash
// export UPDATER_DATA_DIR=/var/lib/ddns-updater
// export UPDATER_PERIOD=5m
// cat /var/lib/ddns-updater/config.json
// {"settings": [{"provider": "cloudflare", "domain": "example.com", "host": "@",
//                "zone_identifier": "...", "token": "...", "ip_version": "ipv4"}]}
//
// updaterd
// ```
//
// ## Exit codes
//
// - 0: clean shutdown, including a drained shutdown on SIGINT/SIGTERM
// - 1: configuration or startup error
// - 2: runtime error

mod backup;
mod config;
mod connectivity;
mod health;
mod notify;
mod server;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use updater_core::{
    JsonPersistence, LogNotifier, Notifier, Priority, ProviderRegistry, RecordStore, Runner,
    RunnerEvent,
};
use updater_ip::PublicIpResolver;

use crate::config::DaemonConfig;
use crate::notify::GotifyNotifier;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Extra time granted to the runner beyond one provider timeout when draining
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bound on delivering a lifecycle notification
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum UpdaterExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<UpdaterExitCode> for ExitCode {
    fn from(code: UpdaterExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match DaemonConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return UpdaterExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(config.log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return UpdaterExitCode::ConfigError.into();
    }

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return UpdaterExitCode::RuntimeError.into();
        }
    };

    // Client mode for container health checks
    if std::env::args().nth(1).as_deref() == Some("healthcheck") {
        return match rt.block_on(health::query(config.health_address)) {
            Ok(()) => UpdaterExitCode::CleanShutdown.into(),
            Err(e) => {
                eprintln!("{:#}", e);
                UpdaterExitCode::ConfigError.into()
            }
        };
    }

    info!("Starting updaterd v{}", env!("CARGO_PKG_VERSION"));

    rt.block_on(run_daemon(config)).into()
}

/// Run the daemon until an OS signal or a runtime failure
async fn run_daemon(config: DaemonConfig) -> UpdaterExitCode {
    let notifier: Arc<dyn Notifier> = match &config.gotify {
        Some(gotify) => match GotifyNotifier::new(gotify) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                error!("Failed to set up notifications: {}", e);
                return UpdaterExitCode::ConfigError;
            }
        },
        None => Arc::new(LogNotifier),
    };

    let daemon = match start(&config, notifier.clone()).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            send_notification(notifier.as_ref(), Priority::Error, &format!("{:#}", e)).await;
            return UpdaterExitCode::ConfigError;
        }
    };

    match daemon.run_until_signal(notifier.as_ref()).await {
        Ok(()) => {
            info!("Shutdown complete");
            UpdaterExitCode::CleanShutdown
        }
        Err(e) => {
            error!("Daemon error: {:#}", e);
            UpdaterExitCode::RuntimeError
        }
    }
}

/// Tasks of a started daemon
struct Daemon {
    shutdown_tx: watch::Sender<bool>,
    runner: JoinHandle<updater_core::Result<()>>,
    servers: Vec<JoinHandle<std::io::Result<()>>>,
    backup: JoinHandle<()>,
    drain_timeout: Duration,
}

/// Wire every component and spawn the long-running tasks
async fn start(config: &DaemonConfig, notifier: Arc<dyn Notifier>) -> Result<Daemon> {
    let records = config::load_records(&config.config_path())?;
    let updater_config = config.updater_config(records)?;
    match updater_config.records.len() {
        1 => info!("Found single setting to update record"),
        n => info!("Found {} settings to update records", n),
    }

    for problem in connectivity::check(connectivity::CHECK_HOST, connectivity::CHECK_TIMEOUT).await {
        warn!("{}", problem);
    }

    let registry = ProviderRegistry::new();

    #[cfg(feature = "cloudflare")]
    {
        debug!("Registering Cloudflare provider");
        updater_provider_cloudflare::register(&registry);
    }

    #[cfg(feature = "duckdns")]
    {
        debug!("Registering DuckDNS provider");
        updater_provider_duckdns::register(&registry);
    }

    info!("Available providers: {}", registry.list_providers().join(", "));
    let providers = registry.create_providers(&updater_config.records)?;

    let persistence = JsonPersistence::open(config.updates_path())
        .await
        .with_context(|| format!("Failed to open {}", config.updates_path().display()))?;
    let store = Arc::new(RecordStore::load(&updater_config.records, Arc::new(persistence)).await?);

    let resolver = Arc::new(PublicIpResolver::new(updater_config.ip.clone())?);

    let (runner, events) = Runner::new(
        store.clone(),
        resolver,
        providers,
        notifier.clone(),
        updater_config.period,
        updater_config.runner.clone(),
    )?;
    let trigger = runner.trigger();

    // Bind before spawning anything so address errors are startup errors
    let api_listener = tokio::net::TcpListener::bind(config.listening_address)
        .await
        .with_context(|| format!("Failed to listen on {}", config.listening_address))?;
    let health_listener = tokio::net::TcpListener::bind(config.health_address)
        .await
        .with_context(|| format!("Failed to listen on {}", config.health_address))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(log_runner_events(events));
    let runner_rx = shutdown_rx.clone();
    let runner = tokio::spawn(async move { runner.run(runner_rx).await });

    // First cycle right away rather than one period from now
    trigger.force();

    info!(
        "Status API listening on {} under {}",
        config.listening_address, config.root_url
    );
    let api = server::router(
        server::ApiState {
            store: store.clone(),
            trigger,
        },
        &config.root_url,
    );
    info!("Health check listening on {}", config.health_address);
    let health = health::router(health::HealthState::new(
        store.clone(),
        config.period,
        config.health_fail_cycles,
    ));
    let servers = vec![
        tokio::spawn(server::serve(api_listener, api, shutdown_rx.clone())),
        tokio::spawn(server::serve(health_listener, health, shutdown_rx.clone())),
    ];

    let backup = tokio::spawn(backup::run_backup_loop(
        config.backup_period,
        vec![config.updates_path(), config.config_path()],
        config.backup_directory.clone(),
        shutdown_rx,
    ));

    send_notification(
        notifier.as_ref(),
        Priority::Info,
        &format!("Launched with {} records to watch", store.len()),
    )
    .await;

    Ok(Daemon {
        shutdown_tx,
        runner,
        servers,
        backup,
        drain_timeout: updater_config.runner.provider_timeout + SHUTDOWN_GRACE,
    })
}

impl Daemon {
    /// Wait for SIGINT/SIGTERM, then drain
    ///
    /// A runner that stops on its own is a runtime failure.
    async fn run_until_signal(mut self, notifier: &dyn Notifier) -> Result<()> {
        tokio::select! {
            signal = wait_for_shutdown() => {
                let signal = signal?;
                let message = format!("Stopping program: caught OS signal {}", signal);
                warn!("{}", message);
                send_notification(notifier, Priority::Warning, &message).await;
            }
            result = &mut self.runner => {
                let _ = self.shutdown_tx.send(true);
                return match result {
                    Ok(Ok(())) => Err(anyhow::anyhow!("Runner stopped unexpectedly")),
                    Ok(Err(e)) => Err(e).context("Runner failed"),
                    Err(e) => Err(e).context("Runner task panicked"),
                };
            }
        }

        self.shutdown_tx.send_replace(true);

        info!("Draining in-flight updates");
        let drained = tokio::time::timeout(self.drain_timeout, &mut self.runner)
            .await
            .with_context(|| format!("Runner did not drain within {:?}", self.drain_timeout))?;
        drained
            .context("Runner task panicked")?
            .context("Final flush failed")?;

        for server in self.servers {
            match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("HTTP server error during shutdown: {}", e),
                Ok(Err(e)) => warn!("HTTP server task failed: {}", e),
                Err(_) => warn!("HTTP server did not stop within {:?}", SHUTDOWN_GRACE),
            }
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, self.backup).await.is_err() {
            warn!("Backup task did not stop within {:?}", SHUTDOWN_GRACE);
        }

        Ok(())
    }
}

async fn log_runner_events(mut events: mpsc::Receiver<RunnerEvent>) {
    while let Some(event) = events.recv().await {
        debug!("Runner event: {:?}", event);
    }
}

/// Deliver a lifecycle notification, logging failures
async fn send_notification(notifier: &dyn Notifier, priority: Priority, message: &str) {
    match tokio::time::timeout(NOTIFY_TIMEOUT, notifier.notify(priority, message)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to send notification: {}", e),
        Err(_) => warn!("Notification timed out after {:?}", NOTIFY_TIMEOUT),
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    // Set up signal handlers for SIGTERM and SIGINT
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
