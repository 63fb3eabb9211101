//! HTTP status surface and force trigger
//!
//! - `GET /api/records`: snapshot of every managed record with its history
//! - `POST /api/update`: request an out-of-schedule cycle (202 Accepted)
//!
//! Both routes live under the configured root URL, e.g. `/ddns/api/records`.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};
use updater_core::{ForceTrigger, Record, RecordStore};

/// Shared state of the status API
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<RecordStore>,
    pub trigger: ForceTrigger,
}

pub fn router(state: ApiState, root_url: &str) -> Router {
    let api = Router::new()
        .route("/api/records", get(list_records))
        .route("/api/update", post(force_update))
        .with_state(state);

    if root_url == "/" {
        api
    } else {
        Router::new().nest(root_url, api)
    }
}

async fn list_records(State(state): State<ApiState>) -> Json<Vec<Record>> {
    Json(state.store.all().await)
}

async fn force_update(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    // A full slot means a forced cycle is already pending
    let queued = state.trigger.force();
    if queued {
        info!("Forced update requested over HTTP");
    } else {
        debug!("Forced update already pending");
    }

    (StatusCode::ACCEPTED, Json(json!({ "queued": queued })))
}

/// Serve `router` on `listener` until the shutdown flag is raised
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            // A dropped sender counts as shutdown too
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{runner_with, www};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;
    use updater_core::{Event, MemoryPersistence};

    #[tokio::test]
    async fn records_are_listed_with_history() {
        let persistence = MemoryPersistence::with_history([(
            www().id(),
            vec![Event::up_to_date("1.2.3.4".parse().unwrap(), "updated")],
        )]);
        let (store, runner) = runner_with(persistence).await;
        let app = router(
            ApiState {
                store,
                trigger: runner.trigger(),
            },
            "/",
        );

        let response = app
            .oneshot(Request::get("/api/records").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let records: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(records[0]["id"]["domain"], "example.com");
        assert_eq!(records[0]["id"]["host"], "www");
        assert_eq!(records[0]["status"], "up_to_date");
        assert_eq!(records[0]["current_ip"], "1.2.3.4");
        assert_eq!(records[0]["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn force_update_is_accepted_and_coalesced() {
        let (store, runner) = runner_with(MemoryPersistence::new()).await;
        let app = router(
            ApiState {
                store,
                trigger: runner.trigger(),
            },
            "/",
        );

        let mut queued = Vec::new();
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(Request::post("/api/update").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);

            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: Value = serde_json::from_slice(&body).unwrap();
            queued.push(body["queued"].as_bool().unwrap());
        }

        // The runner is not running, so the first request stays pending
        assert_eq!(queued, vec![true, false]);
    }

    #[tokio::test]
    async fn routes_are_served_under_the_root_url() {
        let (store, runner) = runner_with(MemoryPersistence::new()).await;
        let app = router(
            ApiState {
                store,
                trigger: runner.trigger(),
            },
            "/ddns",
        );

        let nested = app
            .clone()
            .oneshot(Request::get("/ddns/api/records").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(nested.status(), StatusCode::OK);

        let bare = app
            .oneshot(Request::get("/api/records").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(bare.status(), StatusCode::NOT_FOUND);
    }
}
