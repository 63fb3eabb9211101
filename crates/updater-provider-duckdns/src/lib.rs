// # DuckDNS Provider
//
// DuckDNS exposes a single update endpoint:
//
// ```http
// GET /update?domains=<subdomain>&token=<token>&ip=<ipv4>
// GET /update?domains=<subdomain>&token=<token>&ipv6=<ipv6>
// ```
//
// The body is `OK` when the update was accepted and `KO` otherwise. DuckDNS
// does not say whether the address actually changed, so every accepted call
// is reported as an update.
//
// Records must live under `duckdns.org`; the host is the DuckDNS subdomain.

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use updater_core::config::RecordConfig;
use updater_core::{DnsProvider, DnsProviderFactory, Error, ProviderRegistry, RecordId, Result, UpdateResult};

/// DuckDNS API base URL
const DUCKDNS_API_BASE: &str = "https://www.duckdns.org";

/// Domain every DuckDNS record belongs to
const DUCKDNS_DOMAIN: &str = "duckdns.org";

/// Default HTTP timeout for API requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifier this provider is registered under
pub const PROVIDER_NAME: &str = "duckdns";

#[derive(Deserialize)]
struct DuckDnsSettings {
    token: String,
}

/// DuckDNS provider
///
/// The token is never logged; `Debug` redacts it.
pub struct DuckDnsProvider {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for DuckDnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDnsProvider")
            .field("token", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl DuckDnsProvider {
    /// Create a provider against the public DuckDNS API
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(token, DUCKDNS_API_BASE)
    }

    /// Create a provider talking to a different API base URL
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::config("DuckDNS token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            token,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl DnsProvider for DuckDnsProvider {
    async fn update_record(&self, record: &RecordId, ip: IpAddr) -> Result<UpdateResult> {
        let ip_param = match ip {
            IpAddr::V4(_) => "ip",
            IpAddr::V6(_) => "ipv6",
        };
        let ip_text = ip.to_string();

        tracing::info!("Updating DuckDNS record: {} -> {}", record, ip);

        let response = self
            .client
            .get(format!("{}/update", self.base_url))
            .query(&[
                ("domains", record.host.as_str()),
                ("token", self.token.as_str()),
                (ip_param, ip_text.as_str()),
            ])
            .send()
            .await
            // reqwest errors carry the URL, and the URL carries the token
            .map_err(|e| Error::http(format!("DuckDNS request failed: {}", e.without_url())))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::rate_limited(format!("DuckDNS rate limit exceeded. Status: {}", status)));
        }
        if status.is_server_error() {
            return Err(Error::http(format!("DuckDNS server error: {}", status)));
        }
        if !status.is_success() {
            return Err(Error::provider(PROVIDER_NAME, format!("Unexpected status: {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read response: {}", e.without_url())))?;

        match body.lines().next().map(str::trim) {
            Some("OK") => Ok(UpdateResult::Updated { previous_ip: None }),
            Some("KO") => Err(Error::auth(format!(
                "DuckDNS rejected the update for {} (bad token or subdomain)",
                record
            ))),
            _ => Err(Error::provider(
                PROVIDER_NAME,
                format!("Unexpected response body: {:?}", body.trim()),
            )),
        }
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

/// Factory for creating DuckDNS providers
pub struct DuckDnsFactory;

impl DnsProviderFactory for DuckDnsFactory {
    fn create(&self, config: &RecordConfig) -> Result<Box<dyn DnsProvider>> {
        if !config.domain.eq_ignore_ascii_case(DUCKDNS_DOMAIN) {
            return Err(Error::config(format!(
                "DuckDNS records must use domain {}, got {}",
                DUCKDNS_DOMAIN, config.domain
            )));
        }
        if config.host == "@" || config.host.contains('.') {
            return Err(Error::config(format!(
                "DuckDNS host must be a single subdomain label, got {:?}",
                config.host
            )));
        }

        let settings: DuckDnsSettings = serde_json::from_value(config.settings.clone())
            .map_err(|e| Error::config(format!("Invalid DuckDNS settings for {}: {}", config.id(), e)))?;

        Ok(Box::new(DuckDnsProvider::new(settings.token)?))
    }
}

/// Register the DuckDNS provider with a registry
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider(PROVIDER_NAME, Box::new(DuckDnsFactory));
}
