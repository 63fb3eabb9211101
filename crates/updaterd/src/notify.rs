//! Gotify notification sink

use async_trait::async_trait;
use std::time::Duration;
use updater_core::{Error, Notifier, Priority, Result};

use crate::config::GotifyConfig;

/// Title attached to every message
const TITLE: &str = "DDNS Updater";

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers notifications to a Gotify server
pub struct GotifyNotifier {
    url: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GotifyNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GotifyNotifier")
            .field("url", &self.url)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl GotifyNotifier {
    pub fn new(config: &GotifyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }
}

/// Gotify priority scale (0-10)
fn gotify_priority(priority: Priority) -> u8 {
    match priority {
        Priority::Info => 1,
        Priority::Warning => 2,
        Priority::Error => 4,
    }
}

#[async_trait]
impl Notifier for GotifyNotifier {
    async fn notify(&self, priority: Priority, message: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/message", self.url))
            .query(&[("token", self.token.as_str())])
            .json(&serde_json::json!({
                "title": TITLE,
                "message": message,
                "priority": gotify_priority(priority),
            }))
            .send()
            .await
            // the URL carries the token
            .map_err(|e| Error::http(format!("Gotify request failed: {}", e.without_url())))?;

        if !response.status().is_success() {
            return Err(Error::http(format!("Gotify answered {}", response.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(server: &MockServer) -> GotifyNotifier {
        GotifyNotifier::new(&GotifyConfig {
            url: format!("{}/", server.uri()),
            token: "app-token".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn message_is_posted_with_priority() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .and(query_param("token", "app-token"))
            .and(body_partial_json(serde_json::json!({
                "title": "DDNS Updater",
                "message": "Launched with 2 records to watch",
                "priority": 1,
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server)
            .notify(Priority::Info, "Launched with 2 records to watch")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_message_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = notifier(&server)
            .notify(Priority::Error, "boom")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("401"), "{}", err);
        assert!(!err.to_string().contains("app-token"));
    }

    #[test]
    fn token_not_exposed_in_debug() {
        let notifier = GotifyNotifier::new(&GotifyConfig {
            url: "https://gotify.example.com".to_string(),
            token: "app-token".to_string(),
        })
        .unwrap();

        assert!(!format!("{:?}", notifier).contains("app-token"));
    }
}
