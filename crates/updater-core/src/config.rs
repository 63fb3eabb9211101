//! Configuration types for the DDNS updater
//!
//! This module defines the resolved configuration consumed by the core.
//! Parsing flags, environment variables or files into these structures is
//! the embedding application's job; the core only validates them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::record::RecordId;

/// Longest accepted update period and provider timeout
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Main updater configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Interval between periodic update cycles
    pub period: Duration,

    /// Public IP lookup methods
    #[serde(default)]
    pub ip: IpLookupConfig,

    /// DNS records to manage
    pub records: Vec<RecordConfig>,

    /// Runner settings
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl UpdaterConfig {
    /// Create a configuration with default lookup and runner settings
    pub fn new(period: Duration, records: Vec<RecordConfig>) -> Self {
        Self {
            period,
            ip: IpLookupConfig::default(),
            records,
            runner: RunnerConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.records.is_empty() {
            return Err(crate::Error::config("No records configured"));
        }

        validate_period(self.period)?;

        let mut seen = HashSet::new();
        for record in &self.records {
            record.validate()?;
            if !seen.insert(record.id()) {
                return Err(crate::Error::config(format!(
                    "Duplicate record: domain {} host {}",
                    record.domain, record.host
                )));
            }
        }

        self.ip.validate()?;
        self.runner.validate()?;

        Ok(())
    }
}

/// Check an update period is non-zero and at most [`MAX_PERIOD`]
pub fn validate_period(period: Duration) -> Result<(), crate::Error> {
    if period.is_zero() {
        return Err(crate::Error::config("Update period must be > 0"));
    }
    if period > MAX_PERIOD {
        return Err(crate::Error::config(format!(
            "Update period {:?} exceeds the maximum of {:?}",
            period, MAX_PERIOD
        )));
    }
    Ok(())
}

/// IP version a record needs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    /// IPv4 only (A record)
    #[serde(rename = "ipv4")]
    V4,
    /// IPv6 only (AAAA record)
    #[serde(rename = "ipv6")]
    V6,
    /// Whichever family the dual-stack lookup returns
    #[serde(rename = "ipv4 or ipv6")]
    #[default]
    Both,
}

impl IpVersion {
    /// Whether `ip` is acceptable for this version
    pub fn accepts(&self, ip: &std::net::IpAddr) -> bool {
        match self {
            IpVersion::V4 => ip.is_ipv4(),
            IpVersion::V6 => ip.is_ipv6(),
            IpVersion::Both => true,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => f.write_str("ipv4"),
            IpVersion::V6 => f.write_str("ipv6"),
            IpVersion::Both => f.write_str("ipv4 or ipv6"),
        }
    }
}

impl FromStr for IpVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ipv4" => Ok(IpVersion::V4),
            "ipv6" => Ok(IpVersion::V6),
            "" | "ipv4 or ipv6" | "both" => Ok(IpVersion::Both),
            other => Err(crate::Error::config(format!(
                "Invalid IP version '{}': expected ipv4, ipv6 or 'ipv4 or ipv6'",
                other
            ))),
        }
    }
}

/// How the public IP is looked up for one family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpMethod {
    /// Plain-text "what is my IP" endpoints, tried in order
    Http {
        /// Endpoint URLs in preference order
        urls: Vec<String>,
    },

    /// DNS self-lookup of `myip.opendns.com` against the OpenDNS resolvers
    OpenDns,
}

impl IpMethod {
    /// Default HTTP endpoints for a family
    pub fn default_for(version: IpVersion) -> Self {
        let urls: &[&str] = match version {
            IpVersion::V4 => &[
                "https://api.ipify.org",
                "https://ipv4.icanhazip.com",
                "https://ipv4.ident.me",
            ],
            IpVersion::V6 => &[
                "https://api6.ipify.org",
                "https://ipv6.icanhazip.com",
                "https://ipv6.ident.me",
            ],
            IpVersion::Both => &[
                "https://api64.ipify.org",
                "https://icanhazip.com",
                "https://ident.me",
            ],
        };

        IpMethod::Http {
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn validate(&self, version: IpVersion) -> Result<(), crate::Error> {
        if let IpMethod::Http { urls } = self {
            if urls.is_empty() {
                return Err(crate::Error::config(format!(
                    "No HTTP endpoints configured for {} lookups",
                    version
                )));
            }
            for url in urls {
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "IP lookup URL must use HTTP or HTTPS scheme. Got: {}",
                        url
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Lookup method per address family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpLookupConfig {
    /// Method for IPv4-only records
    pub ipv4: IpMethod,
    /// Method for IPv6-only records
    pub ipv6: IpMethod,
    /// Method for records accepting either family
    pub any: IpMethod,
    /// Bound on each single lookup attempt
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout: Duration,
}

impl IpLookupConfig {
    /// Method configured for a family
    pub fn method(&self, version: IpVersion) -> &IpMethod {
        match version {
            IpVersion::V4 => &self.ipv4,
            IpVersion::V6 => &self.ipv6,
            IpVersion::Both => &self.any,
        }
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.attempt_timeout.is_zero() {
            return Err(crate::Error::config("IP lookup timeout must be > 0"));
        }
        self.ipv4.validate(IpVersion::V4)?;
        self.ipv6.validate(IpVersion::V6)?;
        self.any.validate(IpVersion::Both)
    }
}

impl Default for IpLookupConfig {
    fn default() -> Self {
        Self {
            ipv4: IpMethod::default_for(IpVersion::V4),
            ipv6: IpMethod::default_for(IpVersion::V6),
            any: IpMethod::default_for(IpVersion::Both),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(5)
}

/// DNS record configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Registered domain (e.g. "example.com")
    pub domain: String,

    /// Host label ("@" for the apex)
    pub host: String,

    /// Provider identifier, resolved through the provider registry
    pub provider: String,

    /// Address family the record needs
    #[serde(default)]
    pub ip_version: IpVersion,

    /// Provider-specific settings (credentials included), opaque to the core
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl RecordConfig {
    /// Create a new record configuration
    pub fn new(
        domain: impl Into<String>,
        host: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            host: host.into(),
            provider: provider.into(),
            ip_version: IpVersion::Both,
            settings: serde_json::Value::Null,
        }
    }

    /// Set the IP version
    pub fn with_ip_version(mut self, ip_version: IpVersion) -> Self {
        self.ip_version = ip_version;
        self
    }

    /// Set the provider settings
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// Identity of the record
    pub fn id(&self) -> RecordId {
        RecordId::new(self.domain.clone(), self.host.clone())
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.domain.trim().is_empty() {
            return Err(crate::Error::config("Record domain cannot be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "Record host cannot be empty for domain {} (use @ for the apex)",
                self.domain
            )));
        }
        if self.provider.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "Record {} has no provider",
                self.id()
            )));
        }
        Ok(())
    }
}

// Settings carry credentials
impl fmt::Debug for RecordConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordConfig")
            .field("domain", &self.domain)
            .field("host", &self.host)
            .field("provider", &self.provider)
            .field("ip_version", &self.ip_version)
            .field("settings", &"<REDACTED>")
            .finish()
    }
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Ceiling on concurrent provider calls within a cycle (None = unbounded)
    #[serde(default)]
    pub max_concurrent_updates: Option<usize>,

    /// Bound on a single provider update call, enforced by the runner
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout: Duration,

    /// Whether forced cycles update every record regardless of IP changes
    #[serde(default)]
    pub refresh_on_force: bool,

    /// Capacity of the runner event channel
    ///
    /// When full, events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl RunnerConfig {
    /// Validate the runner settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_concurrent_updates == Some(0) {
            return Err(crate::Error::config("Concurrent update ceiling must be > 0"));
        }
        if self.provider_timeout.is_zero() {
            return Err(crate::Error::config("Provider timeout must be > 0"));
        }
        if self.provider_timeout > MAX_PERIOD {
            return Err(crate::Error::config(format!(
                "Provider timeout {:?} exceeds the maximum of {:?}",
                self.provider_timeout, MAX_PERIOD
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_updates: None,
            provider_timeout: default_provider_timeout(),
            refresh_on_force: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_event_channel_capacity() -> usize {
    1000
}
