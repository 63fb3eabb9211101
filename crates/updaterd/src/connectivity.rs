//! Startup connectivity check
//!
//! Resolves a well-known host and reaches it over HTTP and HTTPS. Problems
//! are only reported; the daemon starts anyway and the runner retries every
//! period.

use std::time::Duration;
use tokio::net::lookup_host;

/// Host checked at startup
pub const CHECK_HOST: &str = "google.com";

/// Bound on each check
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Check `host` by DNS, HTTP and HTTPS concurrently
///
/// `host` may carry a port. Returns one message per failed check.
pub async fn check(host: &str, timeout: Duration) -> Vec<String> {
    let url = match reqwest::Url::parse(&format!("http://{}", host)) {
        Ok(url) => url,
        Err(e) => return vec![format!("invalid host {:?}: {}", host, e)],
    };
    let Some(name) = url.host_str().map(str::to_string) else {
        return vec![format!("invalid host {:?}", host)];
    };
    let port = url.port_or_known_default().unwrap_or(80);

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => return vec![format!("cannot build HTTP client: {}", e)],
    };

    let dns = async {
        match tokio::time::timeout(timeout, lookup_host((name.as_str(), port))).await {
            Ok(Ok(mut addresses)) => {
                if addresses.next().is_some() {
                    None
                } else {
                    Some(format!("DNS lookup of {} returned no address", name))
                }
            }
            Ok(Err(e)) => Some(format!("DNS lookup of {} failed: {}", name, e)),
            Err(_) => Some(format!("DNS lookup of {} timed out after {:?}", name, timeout)),
        }
    };
    let http = reach(&client, format!("http://{}", host));
    let https = reach(&client, format!("https://{}", host));

    let (dns, http, https) = tokio::join!(dns, http, https);
    [dns, http, https].into_iter().flatten().collect()
}

/// Any HTTP answer counts as reachable
async fn reach(client: &reqwest::Client, url: String) -> Option<String> {
    match client.get(&url).send().await {
        Ok(_) => None,
        Err(e) => Some(format!("cannot reach {}: {}", url, e)),
    }
}
