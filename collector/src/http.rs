use crate::{
    cache::{Cache, CacheEntry},
    error::ApiError,
    store::Store,
};
use axum::{
    Json, Router,
    extract::{Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use model::{HostStatus, HostStatusBody, HostsBody, LastProbe, PingResultsBody};
use std::sync::Arc;
use tracing::Instrument;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<Cache>,
    pub store: Arc<dyn Store>,
}

/// Internal routes are used by pingers; `/pub` routes serve dashboards.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/hosts", get(list_hosts))
        .route("/ping-results", post(add_ping_results))
        .route("/pub/ping", get(ping))
        .route("/pub/hosts", get(list_hosts))
        .route("/pub/ping-results", get(latest_ping_results))
        .with_state(state)
        .layer(middleware::from_fn(trace_request))
}

// Wraps each request in a span tagged with a random request id.
async fn trace_request(req: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "request",
        req_id = %format!("{:016x}", rand::random::<u64>()),
        method = %req.method(),
        uri = %req.uri(),
    );

    async move {
        tracing::debug!("begin");
        let response = next.run(req).await;
        tracing::debug!(status = %response.status(), "end");
        response
    }
    .instrument(span)
    .await
}

async fn ping() -> &'static str {
    "pong"
}

async fn list_hosts(State(state): State<AppState>) -> Result<Json<HostsBody>, ApiError> {
    let hosts = state.store.list_hosts().await?;
    Ok(Json(HostsBody { hosts }))
}

async fn add_ping_results(
    State(state): State<AppState>,
    body: Result<Json<PingResultsBody>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = body.map_err(|rejection| {
        tracing::debug!("Rejected body: {}", rejection.body_text());
        ApiError::BadRequest
    })?;

    state.cache.write(&body.ping_results).await?;
    Ok(StatusCode::CREATED)
}

async fn latest_ping_results(
    State(state): State<AppState>,
) -> Result<Json<HostStatusBody>, ApiError> {
    let entries = state.cache.read().await?;
    Ok(Json(HostStatusBody {
        ping_results: entries.iter().map(host_status).collect(),
    }))
}

fn host_status(entry: &CacheEntry) -> HostStatus {
    HostStatus {
        host_id: entry.host.id,
        host_name: entry.host.name.clone(),
        last: entry.last.as_ref().map(LastProbe::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockStore, SqliteStore};
    use anyhow::anyhow;
    use model::Host;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    async fn spawn_app(store: Arc<dyn Store>) -> String {
        let state = AppState {
            cache: Arc::new(Cache::new(store.clone())),
            store,
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn sqlite_app() -> String {
        let store = SqliteStore::open_in_memory(1000).unwrap();
        store
            .add_hosts(&["db".to_string(), "web".to_string()])
            .await
            .unwrap();
        spawn_app(Arc::new(store)).await
    }

    fn batch(host_id: i64) -> Value {
        json!({
            "ping_results": [{
                "host_id": host_id,
                "ip": "10.0.0.7",
                "time": "2024-05-01T12:00:00Z",
                "rtt": 1_500_000,
                "success": true
            }]
        })
    }

    #[tokio::test]
    async fn test_liveness() {
        let base = sqlite_app().await;
        for path in ["/ping", "/pub/ping"] {
            let response = reqwest::get(format!("{}{}", base, path)).await.unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(response.text().await.unwrap(), "pong");
        }
    }

    #[tokio::test]
    async fn test_list_hosts() {
        let base = sqlite_app().await;
        let body: HostsBody = reqwest::get(format!("{}/hosts", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(
            body.hosts,
            vec![
                Host {
                    id: 1,
                    name: "db".to_string()
                },
                Host {
                    id: 2,
                    name: "web".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_posted_results_are_served() {
        let base = sqlite_app().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/ping-results", base))
            .json(&batch(2))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);

        let body: Value = reqwest::get(format!("{}/pub/ping-results", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["ping_results"][0], json!({"host_id": 1, "host_name": "db"}));
        let web = &body["ping_results"][1];
        assert_eq!(web["host_name"], "web");
        assert_eq!(web["ip"], "10.0.0.7");
        assert_eq!(web["rtt"], 1_500_000);
        assert_eq!(web["success"], true);
    }

    #[tokio::test]
    async fn test_unknown_host_is_rejected() {
        let base = sqlite_app().await;
        let response = reqwest::Client::new()
            .post(format!("{}/ping-results", base))
            .json(&batch(42))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
        assert_eq!(response.text().await.unwrap(), "bad request");
    }

    #[tokio::test]
    async fn test_oversized_rtt_is_rejected() {
        let base = sqlite_app().await;
        let mut body = batch(1);
        body["ping_results"][0]["rtt"] = json!(u64::MAX);

        let response = reqwest::Client::new()
            .post(format!("{}/ping-results", base))
            .json(&body)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
        assert_eq!(response.text().await.unwrap(), "bad request");
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let base = sqlite_app().await;
        let response = reqwest::Client::new()
            .post(format!("{}/ping-results", base))
            .header("content-type", "application/json")
            .body(r#"{"ping_results": [{"host_id": "one"}]}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let mut store = MockStore::new();
        store.expect_list_hosts().returning(|| {
            Ok(vec![Host {
                id: 1,
                name: "db".to_string(),
            }])
        });
        store.expect_load_last_results().returning(|| Ok(vec![]));
        store
            .expect_append_results()
            .returning(|_| Err(anyhow!("disk I/O error")));
        let base = spawn_app(Arc::new(store)).await;

        let response = reqwest::Client::new()
            .post(format!("{}/ping-results", base))
            .json(&batch(1))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 500);
        assert_eq!(response.text().await.unwrap(), "internal error");
    }
}
