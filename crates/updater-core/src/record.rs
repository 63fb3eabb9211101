//! Managed DNS records and their event history
//!
//! A [`Record`] is one `(domain, host)` entry kept pointed at the public IP.
//! Its state (`status`, `current_ip`, `last_update`) is always derived from
//! the [`Event`]s appended to its history: loading a record replays the
//! persisted history, and [`Record::apply`] is the single state transition
//! used by the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::config::{IpVersion, RecordConfig};

/// Identity of a managed record
///
/// `host` is the label under `domain`; `@` designates the zone apex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    /// Registered domain (e.g. "example.com")
    pub domain: String,
    /// Host label (e.g. "www", or "@" for the apex)
    pub host: String,
}

impl RecordId {
    /// Create a record identity
    pub fn new(domain: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            host: host.into(),
        }
    }

    /// Fully qualified name of the record
    pub fn fqdn(&self) -> String {
        match self.host.as_str() {
            "" | "@" => self.domain.clone(),
            host => format!("{}.{}", host, self.domain),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqdn())
    }
}

/// Update status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Never updated
    Unset,
    /// The provider holds the current IP
    UpToDate,
    /// An update call is in flight
    Updating,
    /// The last update attempt failed
    Fail,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Unset => "unset",
            Status::UpToDate => "up to date",
            Status::Updating => "updating",
            Status::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// One immutable historical outcome of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// When the outcome was recorded
    pub time: DateTime<Utc>,
    /// IP applied at the provider, absent on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    /// Resulting status
    pub status: Status,
    /// Diagnostic message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Event {
    /// A successful update to `ip`
    pub fn up_to_date(ip: IpAddr, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            ip: Some(ip),
            status: Status::UpToDate,
            message: Some(message.into()),
        }
    }

    /// A failed update attempt
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            ip: None,
            status: Status::Fail,
            message: Some(message.into()),
        }
    }

    /// Override the timestamp
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}

/// Read-only snapshot of one managed record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Identity
    pub id: RecordId,
    /// Provider identifier this record is updated through
    pub provider: String,
    /// Address family the record needs
    pub ip_version: IpVersion,
    /// Current status
    pub status: Status,
    /// Last IP successfully applied
    pub current_ip: Option<IpAddr>,
    /// Time of the last successful update
    pub last_update: Option<DateTime<Utc>>,
    /// Append-only event history, oldest first
    pub history: Vec<Event>,
}

impl Record {
    /// Build a record from its configuration and reloaded history
    pub fn new(config: &RecordConfig, history: Vec<Event>) -> Self {
        let mut record = Self {
            id: config.id(),
            provider: config.provider.clone(),
            ip_version: config.ip_version,
            status: Status::Unset,
            current_ip: None,
            last_update: None,
            history: Vec::with_capacity(history.len()),
        };

        for event in history {
            record.apply(event);
        }

        record
    }

    /// Apply an event: update state from it and append it to the history
    ///
    /// Timestamps are kept strictly increasing; an event not later than the
    /// previous one is moved one microsecond after it.
    pub(crate) fn apply(&mut self, mut event: Event) -> &Event {
        if let Some(last) = self.history.last()
            && event.time <= last.time
        {
            event.time = last.time + chrono::Duration::microseconds(1);
        }

        self.status = event.status;
        if event.status == Status::UpToDate {
            self.current_ip = event.ip;
            self.last_update = Some(event.time);
        }

        self.history.push(event);
        // just pushed
        &self.history[self.history.len() - 1]
    }

    /// Most recent event, if any
    pub fn last_event(&self) -> Option<&Event> {
        self.history.last()
    }

    /// Start of the trailing run of Fail events, if the record is failing
    ///
    /// Read from the history alone, so a retry in flight (`Updating`) still
    /// reports the run.
    pub fn failing_since(&self) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .rev()
            .take_while(|event| event.status == Status::Fail)
            .last()
            .map(|event| event.time)
    }
}
