//! Daemon configuration
//!
//! Settings come from `UPDATER_*` environment variables; record definitions
//! come from `<data dir>/config.json`. Parsing goes through a lookup function
//! so tests never touch the process environment.
//!
//! | Variable                          | Default                | Meaning                                   |
//! |-----------------------------------|------------------------|-------------------------------------------|
//! | `UPDATER_PERIOD`                  | `10m`                  | Time between periodic cycles              |
//! | `UPDATER_DATA_DIR`                | `./data`               | Holds `config.json` and `updates.json`    |
//! | `UPDATER_IP_METHOD`               | built-in endpoints     | Lookup for records accepting either family|
//! | `UPDATER_IPV4_METHOD`             | built-in endpoints     | Lookup for IPv4 records                   |
//! | `UPDATER_IPV6_METHOD`             | built-in endpoints     | Lookup for IPv6 records                   |
//! | `UPDATER_LISTENING_ADDRESS`       | `0.0.0.0:8000`         | Status API listener                       |
//! | `UPDATER_ROOT_URL`                | `/`                    | Path prefix of the status API             |
//! | `UPDATER_HEALTH_ADDRESS`          | `127.0.0.1:9999`       | Health listener                           |
//! | `UPDATER_HEALTH_FAIL_CYCLES`      | `2`                    | Failing periods tolerated before unhealthy|
//! | `UPDATER_BACKUP_PERIOD`           | `0` (disabled)         | Time between backups                      |
//! | `UPDATER_BACKUP_DIRECTORY`        | data dir               | Where backups are written                 |
//! | `UPDATER_MAX_CONCURRENT_UPDATES`  | unbounded              | Provider calls in flight per cycle        |
//! | `UPDATER_HTTP_TIMEOUT`            | `20s`                  | Bound on one provider update              |
//! | `UPDATER_REFRESH_ON_FORCE`        | `false`                | Forced cycles update every record         |
//! | `UPDATER_GOTIFY_URL`              | unset                  | Gotify server for notifications           |
//! | `UPDATER_GOTIFY_TOKEN`            | unset                  | Gotify application token                  |
//! | `UPDATER_LOG_LEVEL`               | `info`                 | trace, debug, info, warn or error         |
//!
//! IP methods are `opendns`, `default`, or a comma-separated list of HTTP(S)
//! endpoints answering with the address as plain text.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use updater_core::config::validate_period;
use updater_core::{IpLookupConfig, IpMethod, IpVersion, RecordConfig, RunnerConfig, UpdaterConfig};

/// Name of the record definitions file inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Name of the update history file inside the data directory
pub const UPDATES_FILE: &str = "updates.json";

const DEFAULT_PERIOD: Duration = Duration::from_secs(600);
const DEFAULT_LISTENING_ADDRESS: &str = "0.0.0.0:8000";
const DEFAULT_HEALTH_ADDRESS: &str = "127.0.0.1:9999";
const DEFAULT_HEALTH_FAIL_CYCLES: u32 = 2;

/// Gotify notification target
#[derive(Clone)]
pub struct GotifyConfig {
    /// Server base URL
    pub url: String,
    /// Application token
    /// ⚠️ NEVER log this value
    pub token: String,
}

impl std::fmt::Debug for GotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GotifyConfig")
            .field("url", &self.url)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// Everything the daemon reads from its environment
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub period: Duration,
    pub data_dir: PathBuf,
    pub ip: IpLookupConfig,
    pub runner: RunnerConfig,
    pub listening_address: SocketAddr,
    /// Path prefix of the status API, `/` or `/prefix` without trailing slash
    pub root_url: String,
    pub health_address: SocketAddr,
    pub health_fail_cycles: u32,
    pub backup_period: Duration,
    pub backup_directory: PathBuf,
    pub gotify: Option<GotifyConfig>,
    pub log_level: Level,
}

impl DaemonConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`
    ///
    /// Unset and empty variables both take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let period = match var("UPDATER_PERIOD") {
            Some(value) => parse_duration(&value).context("UPDATER_PERIOD")?,
            None => DEFAULT_PERIOD,
        };
        validate_period(period).context("UPDATER_PERIOD")?;

        let data_dir = PathBuf::from(var("UPDATER_DATA_DIR").unwrap_or_else(|| "./data".to_string()));

        let mut ip = IpLookupConfig::default();
        if let Some(value) = var("UPDATER_IP_METHOD") {
            ip.any = parse_ip_method(&value, IpVersion::Both).context("UPDATER_IP_METHOD")?;
        }
        if let Some(value) = var("UPDATER_IPV4_METHOD") {
            ip.ipv4 = parse_ip_method(&value, IpVersion::V4).context("UPDATER_IPV4_METHOD")?;
        }
        if let Some(value) = var("UPDATER_IPV6_METHOD") {
            ip.ipv6 = parse_ip_method(&value, IpVersion::V6).context("UPDATER_IPV6_METHOD")?;
        }

        let mut runner = RunnerConfig::default();
        if let Some(value) = var("UPDATER_MAX_CONCURRENT_UPDATES") {
            let ceiling: usize = value
                .parse()
                .with_context(|| format!("UPDATER_MAX_CONCURRENT_UPDATES: invalid number {:?}", value))?;
            if ceiling == 0 {
                bail!("UPDATER_MAX_CONCURRENT_UPDATES must be at least 1");
            }
            runner.max_concurrent_updates = Some(ceiling);
        }
        if let Some(value) = var("UPDATER_HTTP_TIMEOUT") {
            runner.provider_timeout = parse_duration(&value).context("UPDATER_HTTP_TIMEOUT")?;
        }
        if let Some(value) = var("UPDATER_REFRESH_ON_FORCE") {
            runner.refresh_on_force = parse_bool(&value).context("UPDATER_REFRESH_ON_FORCE")?;
        }

        let listening_address = parse_address(
            &var("UPDATER_LISTENING_ADDRESS").unwrap_or_else(|| DEFAULT_LISTENING_ADDRESS.to_string()),
        )
        .context("UPDATER_LISTENING_ADDRESS")?;
        let root_url = parse_root_url(&var("UPDATER_ROOT_URL").unwrap_or_else(|| "/".to_string()))
            .context("UPDATER_ROOT_URL")?;
        let health_address = parse_address(
            &var("UPDATER_HEALTH_ADDRESS").unwrap_or_else(|| DEFAULT_HEALTH_ADDRESS.to_string()),
        )
        .context("UPDATER_HEALTH_ADDRESS")?;

        let health_fail_cycles = match var("UPDATER_HEALTH_FAIL_CYCLES") {
            Some(value) => value
                .parse()
                .with_context(|| format!("UPDATER_HEALTH_FAIL_CYCLES: invalid number {:?}", value))?,
            None => DEFAULT_HEALTH_FAIL_CYCLES,
        };
        if health_fail_cycles == 0 {
            bail!("UPDATER_HEALTH_FAIL_CYCLES must be at least 1");
        }

        let backup_period = match var("UPDATER_BACKUP_PERIOD") {
            Some(value) => parse_duration(&value).context("UPDATER_BACKUP_PERIOD")?,
            None => Duration::ZERO,
        };
        let backup_directory = var("UPDATER_BACKUP_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.clone());

        let gotify = match (var("UPDATER_GOTIFY_URL"), var("UPDATER_GOTIFY_TOKEN")) {
            (None, _) => None,
            (Some(_), None) => bail!("UPDATER_GOTIFY_TOKEN is required when UPDATER_GOTIFY_URL is set"),
            (Some(url), Some(token)) => {
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    bail!("UPDATER_GOTIFY_URL must use HTTP or HTTPS scheme. Got: {}", url);
                }
                Some(GotifyConfig { url, token })
            }
        };

        let log_level = parse_log_level(&var("UPDATER_LOG_LEVEL").unwrap_or_else(|| "info".to_string()))?;

        Ok(Self {
            period,
            data_dir,
            ip,
            runner,
            listening_address,
            root_url,
            health_address,
            health_fail_cycles,
            backup_period,
            backup_directory,
            gotify,
            log_level,
        })
    }

    /// Path of the record definitions file
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    /// Path of the update history file
    pub fn updates_path(&self) -> PathBuf {
        self.data_dir.join(UPDATES_FILE)
    }

    /// Assemble and validate the core configuration
    pub fn updater_config(&self, records: Vec<RecordConfig>) -> Result<UpdaterConfig> {
        let config = UpdaterConfig {
            period: self.period,
            ip: self.ip.clone(),
            records,
            runner: self.runner.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse a duration such as `90s`, `5m`, `1h30m` or `250ms`
///
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.is_empty() {
        bail!("empty duration");
    }
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            bail!("invalid duration {:?}", value);
        }
        let amount: u64 = rest[..digits]
            .parse()
            .with_context(|| format!("invalid duration {:?}", value))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Some(Duration::from_millis(amount)),
            "s" => Some(Duration::from_secs(amount)),
            "m" => amount.checked_mul(60).map(Duration::from_secs),
            "h" => amount.checked_mul(3600).map(Duration::from_secs),
            unit => bail!("invalid duration {:?}: unknown unit {:?}", value, unit),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .with_context(|| format!("duration {:?} is out of range", value))?;
        rest = &rest[unit_len..];
    }

    Ok(total)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("invalid boolean {:?}", value),
    }
}

/// Accepts `host:port` or a bare port (listening on all interfaces)
fn parse_address(value: &str) -> Result<SocketAddr> {
    if let Ok(port) = value.trim_start_matches(':').parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    value
        .parse()
        .with_context(|| format!("invalid listening address {:?}", value))
}

/// Normalise a path prefix: `/ddns/` becomes `/ddns`, empty becomes `/`
fn parse_root_url(value: &str) -> Result<String> {
    if !value.starts_with('/') {
        bail!("root URL {:?} must start with /", value);
    }
    let trimmed = value.trim_end_matches('/');
    Ok(if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() })
}

fn parse_ip_method(value: &str, version: IpVersion) -> Result<IpMethod> {
    match value.to_lowercase().as_str() {
        "opendns" => return Ok(IpMethod::OpenDns),
        "default" | "http" => return Ok(IpMethod::default_for(version)),
        _ => {}
    }

    let urls: Vec<String> = value
        .split(',')
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect();

    for url in &urls {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            bail!(
                "unknown IP method {:?}: expected opendns, default or HTTP(S) URLs",
                url
            );
        }
    }

    Ok(IpMethod::Http { urls })
}

fn parse_log_level(value: &str) -> Result<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => bail!(
            "UPDATER_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            value
        ),
    }
}

#[derive(Deserialize)]
struct RecordsFile {
    settings: Vec<Map<String, Value>>,
}

/// Read record definitions from `config.json`
pub fn load_records(path: &Path) -> Result<Vec<RecordConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read record definitions from {}", path.display()))?;
    parse_records(&content).with_context(|| format!("Invalid record definitions in {}", path.display()))
}

/// Parse a `{"settings": [...]}` document
///
/// `host` may hold several comma-separated hosts sharing the same settings.
/// Every field other than `provider`, `domain`, `host` and `ip_version` is
/// handed to the provider as its opaque settings.
pub fn parse_records(content: &str) -> Result<Vec<RecordConfig>> {
    let file: RecordsFile = serde_json::from_str(content)?;

    let mut records = Vec::new();
    for (i, entry) in file.settings.into_iter().enumerate() {
        let parsed = parse_entry(entry).with_context(|| format!("settings[{}]", i))?;
        records.extend(parsed);
    }
    Ok(records)
}

fn parse_entry(mut entry: Map<String, Value>) -> Result<Vec<RecordConfig>> {
    let provider = take_string(&mut entry, "provider")?.to_lowercase();
    let domain = take_string(&mut entry, "domain")?;
    let hosts = take_string(&mut entry, "host")?;

    let ip_version = match entry.remove("ip_version") {
        None => IpVersion::Both,
        Some(Value::String(version)) => version.parse()?,
        Some(other) => bail!("ip_version must be a string, got {}", other),
    };

    let settings = Value::Object(entry);
    Ok(hosts
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(|host| {
            RecordConfig::new(domain.clone(), host, provider.clone())
                .with_ip_version(ip_version)
                .with_settings(settings.clone())
        })
        .collect())
}

fn take_string(entry: &mut Map<String, Value>, key: &str) -> Result<String> {
    match entry.remove(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(Value::String(_)) | None => bail!("missing {}", key),
        Some(other) => bail!("{} must be a string, got {}", key, other),
    }
}
