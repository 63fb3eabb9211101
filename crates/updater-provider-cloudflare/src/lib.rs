// # Cloudflare DNS Provider
//
// This crate provides the Cloudflare DNS provider for the DDNS updater.
//
// ## Behaviour
//
// - ✅ One update attempt per call (lookup, then create or update)
// - ✅ Creates the record when the zone does not have it yet
// - ✅ Idempotency checking (no PUT if the content already matches)
// - ✅ Both A and AAAA record support
// - ✅ Specific error handling for HTTP status codes (401/403, 404, 429, 5xx)
// - ❌ NO retry logic (the next cycle is the retry)
// - ❌ NO caching of record identifiers between calls
// - ❌ NO background tasks
//
// ## Settings
//
// ```json
// {
//   "provider": "cloudflare",
//   "domain": "example.com",
//   "host": "www",
//   "zone_identifier": "023e105f4ecef8ad9ca31a8372d0c353",
//   "token": "<API token with Zone:DNS:Edit>",
//   "ttl": 1,
//   "proxied": false
// }
// ```
//
// `ttl` defaults to 1 (automatic), `proxied` to false.
//
// ## Security Requirements
//
// - API token NEVER appears in logs or `Debug` output
// - Provider creation fails fast if the token or zone identifier is empty
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=A&name=...`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::net::IpAddr;
use std::time::Duration;
use updater_core::config::RecordConfig;
use updater_core::{DnsProvider, DnsProviderFactory, Error, ProviderRegistry, RecordId, Result, UpdateResult};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifier this provider is registered under
pub const PROVIDER_NAME: &str = "cloudflare";

/// Provider-specific fields of a Cloudflare record definition
#[derive(Deserialize)]
struct CloudflareSettings {
    zone_identifier: String,
    token: String,
    #[serde(default = "default_ttl")]
    ttl: u32,
    #[serde(default)]
    proxied: bool,
}

fn default_ttl() -> u32 {
    1
}

/// Cloudflare DNS provider
///
/// # Trust Level: Untrusted
///
/// This provider is isolated, stateless, and single-shot. Scheduling and
/// retries are owned by the `Runner`.
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the API token.
pub struct CloudflareProvider {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// Zone holding the record
    zone_id: String,

    /// TTL for created and updated records (1 = automatic)
    ttl: u32,

    /// Whether the record is proxied through Cloudflare
    proxied: bool,

    /// API base URL, overridable for tests
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .field("ttl", &self.ttl)
            .field("proxied", &self.proxied)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider against the public API
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    /// - `zone_id`: Zone identifier holding the records
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either value is empty.
    pub fn new(api_token: impl Into<String>, zone_id: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_token, zone_id, CLOUDFLARE_API_BASE)
    }

    /// Create a provider talking to a different API base URL
    pub fn with_base_url(
        api_token: impl Into<String>,
        zone_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_token = api_token.into();
        let zone_id = zone_id.into();

        if api_token.trim().is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }
        if zone_id.trim().is_empty() {
            return Err(Error::config("Cloudflare zone identifier cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            zone_id,
            ttl: default_ttl(),
            proxied: false,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Set the TTL used for created and updated records
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set whether records are proxied
    pub fn with_proxied(mut self, proxied: bool) -> Self {
        self.proxied = proxied;
        self
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, self.zone_id)
    }

    /// Find the existing record of this type and name
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /zones/:zone_id/dns_records?type=A&name=www.example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn find_record(&self, name: &str, record_type: &str) -> Result<Option<ExistingRecord>> {
        tracing::debug!("Looking up record: {} (type: {})", name, record_type);

        let response = self
            .client
            .get(self.records_url())
            .bearer_auth(&self.api_token)
            .query(&[("type", record_type), ("name", name)])
            .send()
            .await
            .map_err(|e| Error::http(format!("Cloudflare request failed: {}", e)))?;

        let json = read_response(response, "Record lookup").await?;

        let records = json["result"].as_array().ok_or_else(|| {
            Error::provider(PROVIDER_NAME, "Invalid response format: result is not an array")
        })?;

        let Some(record) = records.first() else {
            return Ok(None);
        };

        let id = record["id"].as_str().ok_or_else(|| {
            Error::provider(PROVIDER_NAME, "Invalid response format: record.id is not a string")
        })?;
        let content = record["content"].as_str().unwrap_or_default();

        Ok(Some(ExistingRecord {
            id: id.to_string(),
            content: content.parse().ok(),
        }))
    }

    fn payload(&self, name: &str, record_type: &str, ip: IpAddr) -> Value {
        serde_json::json!({
            "type": record_type,
            "name": name,
            "content": ip.to_string(),
            "ttl": self.ttl,
            "proxied": self.proxied,
        })
    }

    async fn create_record(&self, name: &str, record_type: &str, ip: IpAddr) -> Result<()> {
        let response = self
            .client
            .post(self.records_url())
            .bearer_auth(&self.api_token)
            .json(&self.payload(name, record_type, ip))
            .send()
            .await
            .map_err(|e| Error::http(format!("Cloudflare request failed: {}", e)))?;

        read_response(response, "Record creation").await.map(|_| ())
    }

    async fn replace_record(
        &self,
        record_id: &str,
        name: &str,
        record_type: &str,
        ip: IpAddr,
    ) -> Result<()> {
        let url = format!("{}/{}", self.records_url(), record_id);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(&self.payload(name, record_type, ip))
            .send()
            .await
            .map_err(|e| Error::http(format!("Cloudflare request failed: {}", e)))?;

        read_response(response, "Record update").await.map(|_| ())
    }
}

/// Record as currently held by Cloudflare
struct ExistingRecord {
    id: String,
    content: Option<IpAddr>,
}

/// Check the status and `success` flag of an API answer and return its body
async fn read_response(response: reqwest::Response, context: &str) -> Result<Value> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        return Err(match status.as_u16() {
            401 | 403 => Error::auth(format!(
                "Invalid API token or insufficient permissions. Status: {}",
                status
            )),
            404 => Error::not_found(format!("{}: {}", context, error_text)),
            429 => Error::rate_limited(format!("Cloudflare rate limit exceeded. Status: {}", status)),
            500..=599 => Error::http(format!(
                "Cloudflare server error: {} - {}",
                status, error_text
            )),
            _ => Error::provider(
                PROVIDER_NAME,
                format!("{} failed: {} - {}", context, status, error_text),
            ),
        });
    }

    let json: Value = response
        .json()
        .await
        .map_err(|e| Error::provider(PROVIDER_NAME, format!("Failed to parse response: {}", e)))?;

    if json["success"].as_bool() == Some(false) {
        let messages: Vec<&str> = json["errors"]
            .as_array()
            .map(|errors| errors.iter().filter_map(|e| e["message"].as_str()).collect())
            .unwrap_or_default();
        return Err(Error::provider(
            PROVIDER_NAME,
            format!("{} rejected: {}", context, messages.join("; ")),
        ));
    }

    Ok(json)
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    /// Point the record at `ip`
    ///
    /// # API Calls
    ///
    /// ```http
    /// # Find the record
    /// GET /zones/:zone_id/dns_records?type=A&name=www.example.com
    ///
    /// # Absent: create it
    /// POST /zones/:zone_id/dns_records
    ///
    /// # Present with another IP: replace it
    /// PUT /zones/:zone_id/dns_records/:record_id
    /// ```
    async fn update_record(&self, record: &RecordId, ip: IpAddr) -> Result<UpdateResult> {
        let record_type = match ip {
            IpAddr::V4(_) => "A",
            IpAddr::V6(_) => "AAAA",
        };
        let name = record.fqdn();

        let Some(existing) = self.find_record(&name, record_type).await? else {
            tracing::info!("Creating Cloudflare DNS record: {} -> {} ({})", name, ip, record_type);
            self.create_record(&name, record_type, ip).await?;
            return Ok(UpdateResult::Created);
        };

        if existing.content == Some(ip) {
            tracing::debug!("DNS record already has correct IP: {} -> {}", name, ip);
            return Ok(UpdateResult::Unchanged);
        }

        tracing::info!("Updating Cloudflare DNS record: {} -> {} ({})", name, ip, record_type);
        self.replace_record(&existing.id, &name, record_type, ip).await?;

        Ok(UpdateResult::Updated {
            previous_ip: existing.content,
        })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &RecordConfig) -> Result<Box<dyn DnsProvider>> {
        let settings: CloudflareSettings = serde_json::from_value(config.settings.clone())
            .map_err(|e| {
                Error::config(format!("Invalid Cloudflare settings for {}: {}", config.id(), e))
            })?;

        let provider = CloudflareProvider::new(settings.token, settings.zone_identifier)?
            .with_ttl(settings.ttl)
            .with_proxied(settings.proxied);

        Ok(Box::new(provider))
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use updater_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// updater_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider(PROVIDER_NAME, Box::new(CloudflareFactory));
}
