//! Health surface
//!
//! `GET /health` answers 200 while every record is either healthy or has
//! been failing for less than the tolerated number of periods, and 500 with
//! the reason otherwise. `updaterd healthcheck` queries it from a separate
//! process, for container health checks.

use anyhow::{Result, bail};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use updater_core::{Record, RecordStore};

/// Shared state of the health listener
#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<RecordStore>,
    /// How long a record may stay failing before the process is unhealthy
    pub tolerance: Duration,
}

impl HealthState {
    pub fn new(store: Arc<RecordStore>, period: Duration, fail_cycles: u32) -> Self {
        Self {
            store,
            tolerance: period.saturating_mul(fail_cycles),
        }
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

async fn health(State(state): State<HealthState>) -> (StatusCode, String) {
    let records = state.store.all().await;
    match unhealthy_reason(&records, Utc::now(), state.tolerance) {
        None => (StatusCode::OK, "healthy".to_string()),
        Some(reason) => (StatusCode::INTERNAL_SERVER_ERROR, reason),
    }
}

/// Why the process is unhealthy, if it is
///
/// A record counts against health once its trailing run of Fail events
/// started more than `tolerance` before `now`.
pub fn unhealthy_reason(records: &[Record], now: DateTime<Utc>, tolerance: Duration) -> Option<String> {
    let failing: Vec<String> = records
        .iter()
        .filter_map(|record| {
            let since = record.failing_since()?;
            let elapsed = (now - since).to_std().ok()?;
            (elapsed > tolerance).then(|| format!("{} failing since {}", record.id, since.to_rfc3339()))
        })
        .collect();

    if failing.is_empty() {
        None
    } else {
        Some(failing.join("; "))
    }
}

/// Query a running daemon's health listener
pub async fn query(address: SocketAddr) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let response = client.get(format!("http://{}/health", address)).send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        bail!("unhealthy ({}): {}", status, body);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{runner_with, www};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;
    use updater_core::{Event, MemoryPersistence};

    const PERIOD: Duration = Duration::from_secs(300);

    async fn state_with(history: Vec<Event>) -> HealthState {
        let (store, _runner) =
            runner_with(MemoryPersistence::with_history([(www().id(), history)])).await;
        HealthState::new(store, PERIOD, 2)
    }

    async fn get_health(state: HealthState) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn healthy_without_failures() {
        let state = state_with(vec![Event::up_to_date("1.2.3.4".parse().unwrap(), "updated")]).await;
        assert_eq!(get_health(state).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn recent_failure_is_tolerated() {
        let state = state_with(vec![
            Event::failed("transient failure: timeout").at(Utc::now() - chrono::Duration::minutes(5)),
        ])
        .await;
        assert_eq!(get_health(state).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn long_failure_run_is_unhealthy() {
        let start = Utc::now() - chrono::Duration::minutes(30);
        let state = state_with(vec![
            Event::up_to_date("1.2.3.4".parse().unwrap(), "updated").at(start - chrono::Duration::hours(1)),
            Event::failed("permanent failure: bad token").at(start),
            Event::failed("permanent failure: bad token").at(start + chrono::Duration::minutes(20)),
        ])
        .await;

        let (status, body) = get_health(state).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("www.example.com"), "{}", body);
    }

    #[tokio::test]
    async fn retry_in_flight_keeps_a_long_failure_unhealthy() {
        let state = state_with(vec![
            Event::failed("permanent failure: bad token").at(Utc::now() - chrono::Duration::hours(1)),
        ])
        .await;
        state.store.begin_update(&www().id()).await.unwrap();

        assert_eq!(get_health(state).await.0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn tolerance_saturates_instead_of_overflowing() {
        let (store, _runner) = runner_with(MemoryPersistence::new()).await;
        let state = HealthState::new(store, Duration::MAX, 2);
        assert_eq!(state.tolerance, Duration::MAX);
    }

    #[test]
    fn run_is_measured_from_its_first_failure() {
        let now = Utc::now();
        let config = www();
        let record = Record::new(
            &config,
            vec![
                Event::failed("old").at(now - chrono::Duration::hours(3)),
                Event::up_to_date("1.2.3.4".parse().unwrap(), "ok").at(now - chrono::Duration::hours(2)),
                Event::failed("new").at(now - chrono::Duration::minutes(9)),
            ],
        );

        assert!(unhealthy_reason(std::slice::from_ref(&record), now, Duration::from_secs(600)).is_none());
        assert!(unhealthy_reason(&[record], now, Duration::from_secs(480)).is_some());
    }
}
