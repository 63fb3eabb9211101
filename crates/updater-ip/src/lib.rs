// # Public IP Resolver
//
// This crate determines the caller's public IP address for the DDNS updater.
//
// ## Methods
//
// - **HTTP**: plain-text "what is my IP" endpoints, tried in order until one
//   answers with an address of the requested family
// - **OpenDNS**: `A`/`AAAA` query for `myip.opendns.com` against the OpenDNS
//   resolvers, which answer with the address the query came from
//
// Each attempt is bounded by the configured attempt timeout, so a dead
// endpoint costs at most that much before the next one is tried. Nothing is
// cached across calls; the runner resolves once per family per cycle.

use async_trait::async_trait;
use hickory_client::client::{Client, SyncClient};
use hickory_client::rr::{DNSClass, Name, RData, RecordType};
use hickory_client::udp::UdpClientConnection;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use updater_core::config::{IpLookupConfig, IpMethod, IpVersion};
use updater_core::{Error, IpResolver, Result};

/// Name OpenDNS resolves to the querying address
const OPENDNS_MYIP: &str = "myip.opendns.com.";

/// OpenDNS resolvers reachable over IPv4
const OPENDNS_V4_SERVERS: [Ipv4Addr; 2] = [
    Ipv4Addr::new(208, 67, 222, 222),
    Ipv4Addr::new(208, 67, 220, 220),
];

/// OpenDNS resolvers reachable over IPv6
const OPENDNS_V6_SERVERS: [Ipv6Addr; 2] = [
    Ipv6Addr::new(0x2620, 0x119, 0x35, 0, 0, 0, 0, 0x35),
    Ipv6Addr::new(0x2620, 0x119, 0x53, 0, 0, 0, 0, 0x53),
];

/// Resolver over the configured lookup methods
pub struct PublicIpResolver {
    config: IpLookupConfig,
    client: reqwest::Client,
}

impl PublicIpResolver {
    /// Create a resolver from the lookup configuration
    pub fn new(config: IpLookupConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.attempt_timeout)
            .user_agent(concat!("ddns-updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    async fn resolve_http(&self, urls: &[String], version: IpVersion) -> Result<IpAddr> {
        let mut failures = Vec::with_capacity(urls.len());

        for url in urls {
            let attempt = tokio::time::timeout(self.config.attempt_timeout, self.fetch(url)).await;
            match attempt {
                Ok(Ok(ip)) if version.accepts(&ip) => {
                    tracing::debug!("{} answered {}", url, ip);
                    return Ok(ip);
                }
                Ok(Ok(ip)) => failures.push(format!("{}: {} is not {}", url, ip, version)),
                Ok(Err(e)) => failures.push(format!("{}: {}", url, e)),
                Err(_) => failures.push(format!("{}: timed out", url)),
            }
            tracing::debug!("IP lookup attempt failed: {}", failures[failures.len() - 1]);
        }

        Err(Error::ip_resolution(format!(
            "all {} endpoints failed: {}",
            version,
            failures.join("; ")
        )))
    }

    async fn fetch(&self, url: &str) -> Result<IpAddr> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::http(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::http(format!("HTTP error: {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read response: {}", e)))?;

        parse_ip(&body)
    }

    async fn resolve_opendns(&self, version: IpVersion) -> Result<IpAddr> {
        let mut attempts: Vec<(SocketAddr, RecordType)> = Vec::new();
        if version != IpVersion::V6 {
            attempts.extend(
                OPENDNS_V4_SERVERS
                    .iter()
                    .map(|server| (SocketAddr::new(IpAddr::V4(*server), 53), RecordType::A)),
            );
        }
        if version != IpVersion::V4 {
            attempts.extend(
                OPENDNS_V6_SERVERS
                    .iter()
                    .map(|server| (SocketAddr::new(IpAddr::V6(*server), 53), RecordType::AAAA)),
            );
        }

        let mut failures = Vec::with_capacity(attempts.len());
        for (server, record_type) in attempts {
            match self.query_opendns(server, record_type).await {
                Ok(ip) if version.accepts(&ip) => return Ok(ip),
                Ok(ip) => failures.push(format!("{}: {} is not {}", server, ip, version)),
                Err(e) => failures.push(format!("{}: {}", server, e)),
            }
        }

        Err(Error::ip_resolution(format!(
            "OpenDNS lookup for {} failed: {}",
            version,
            failures.join("; ")
        )))
    }

    async fn query_opendns(&self, server: SocketAddr, record_type: RecordType) -> Result<IpAddr> {
        let timeout = self.config.attempt_timeout;

        // hickory's sync client blocks; keep it off the runtime threads
        let lookup = tokio::task::spawn_blocking(move || -> Result<IpAddr> {
            let conn = UdpClientConnection::with_timeout(server, timeout)
                .map_err(|e| Error::ip_resolution(format!("Failed to create UDP connection: {}", e)))?;
            let client = SyncClient::new(conn);
            let name = Name::from_str(OPENDNS_MYIP)
                .map_err(|e| Error::ip_resolution(format!("Invalid name {}: {}", OPENDNS_MYIP, e)))?;

            let response = client
                .query(&name, DNSClass::IN, record_type)
                .map_err(|e| Error::ip_resolution(format!("DNS query failed: {}", e)))?;

            response
                .answers()
                .iter()
                .find_map(|record| match record.data() {
                    Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
                    Some(RData::AAAA(aaaa)) => Some(IpAddr::V6(aaaa.0)),
                    _ => None,
                })
                .map(|ip| ip.to_canonical())
                .ok_or_else(|| Error::ip_resolution(format!("No {} answer", record_type)))
        });

        // The UDP timeout bounds the blocking call; this bounds the wait for it
        match tokio::time::timeout(timeout + Duration::from_secs(1), lookup).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::ip_resolution(format!("DNS lookup task failed: {}", e))),
            Err(_) => Err(Error::timeout(format!("DNS query to {} timed out", server))),
        }
    }
}

#[async_trait]
impl IpResolver for PublicIpResolver {
    async fn resolve(&self, version: IpVersion) -> Result<IpAddr> {
        match self.config.method(version) {
            IpMethod::Http { urls } => self.resolve_http(urls, version).await,
            IpMethod::OpenDns => self.resolve_opendns(version).await,
        }
    }
}

impl std::fmt::Debug for PublicIpResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicIpResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Parse a plain-text endpoint answer
///
/// IPv4-mapped IPv6 answers are returned as IPv4.
pub fn parse_ip(body: &str) -> Result<IpAddr> {
    let text = body.trim();
    text.parse::<IpAddr>()
        .map(|ip| ip.to_canonical())
        .map_err(|_| Error::ip_resolution(format!("Invalid IP address: {:?}", text)))
}
