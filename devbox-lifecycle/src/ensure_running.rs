//! Client side of the start endpoint: make sure the dev machine answers before using it.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::time::sleep;

use crate::reply::{StartResponse, StartStatus};

pub const MAX_RETRIES: usize = 10;

pub struct AutostartClient {
    client: Client,
    reachability_timeout: Duration,
    max_retries: usize,
    /// Pause when the start endpoint does not advertise `wait_seconds`.
    default_wait: Duration,
    /// Pause after a failed call to the start endpoint.
    failure_wait: Duration,
}

impl AutostartClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            reachability_timeout: Duration::from_secs(3),
            max_retries: MAX_RETRIES,
            default_wait: Duration::from_secs(10),
            failure_wait: Duration::from_secs(10),
        })
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_waits(mut self, default_wait: Duration, failure_wait: Duration) -> Self {
        self.default_wait = default_wait;
        self.failure_wait = failure_wait;
        self
    }

    async fn reachable(&self, api_url: &str) -> bool {
        match self
            .client
            .get(api_url)
            .timeout(self.reachability_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn call_autostart(&self, autostart_url: &str) -> Result<StartResponse> {
        let resp = self
            .client
            .get(autostart_url)
            .header("Content-Type", "application/json")
            .send()
            .await
            .context("auto-start request failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Auto-start failed: HTTP {}", status.as_u16());
        }
        resp.json::<StartResponse>()
            .await
            .context("auto-start returned an unexpected body")
    }

    /// Return once `api_url` answers, triggering the start endpoint if it does not.
    ///
    /// Without an `autostart_url` the API is assumed to be always on.
    pub async fn ensure_running(&self, api_url: &str, autostart_url: Option<&str>) -> Result<()> {
        let Some(autostart_url) = autostart_url.filter(|u| !u.trim().is_empty()) else {
            return Ok(());
        };

        tracing::info!("Checking if the dev machine is reachable...");
        if self.reachable(api_url).await {
            tracing::info!("Dev machine is already running");
            return Ok(());
        }

        tracing::info!("Dev machine is not reachable, triggering auto-start...");
        let first = self.call_autostart(autostart_url).await?;
        if first.status == StartStatus::Ready {
            tracing::info!("Dev machine is ready");
            return Ok(());
        }

        self.wait_for_ready(api_url, autostart_url).await
    }

    async fn wait_for_ready(&self, api_url: &str, autostart_url: &str) -> Result<()> {
        tracing::info!("Waiting for the dev machine to become ready...");
        for attempt in 1..=self.max_retries {
            if self.reachable(api_url).await {
                tracing::info!("Dev machine is ready");
                return Ok(());
            }

            match self.call_autostart(autostart_url).await {
                Ok(resp) if resp.status == StartStatus::Ready => {
                    tracing::info!("Dev machine is ready");
                    return Ok(());
                }
                Ok(resp) => {
                    let wait = resp
                        .wait_seconds
                        .filter(|s| *s > 0)
                        .map(Duration::from_secs)
                        .unwrap_or(self.default_wait);
                    tracing::info!(
                        "Dev machine is {:?}. Waiting {:?}... ({}/{})",
                        resp.status,
                        wait,
                        attempt,
                        self.max_retries
                    );
                    sleep(wait).await;
                }
                Err(e) => {
                    tracing::error!("Auto-start check failed: {:#}", e);
                    sleep(self.failure_wait).await;
                }
            }
        }
        anyhow::bail!("dev machine failed to start after {} retries", self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// The API comes up after `ready_after` calls to the start endpoint.
    #[derive(Clone)]
    struct Fake {
        autostart_calls: Arc<AtomicUsize>,
        ready_after: usize,
        first_reply: &'static str,
    }

    async fn api(State(f): State<Fake>) -> StatusCode {
        if f.autostart_calls.load(Ordering::SeqCst) >= f.ready_after {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    async fn autostart(State(f): State<Fake>) -> Json<serde_json::Value> {
        let n = f.autostart_calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Json(serde_json::json!({"status": f.first_reply, "message": "first"}))
        } else {
            Json(serde_json::json!({"status": "starting", "message": "booting", "wait_seconds": 0}))
        }
    }

    async fn serve(fake: Fake) -> String {
        let app = Router::new()
            .route("/api", get(api))
            .route("/start", get(autostart))
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client() -> AutostartClient {
        AutostartClient::new()
            .unwrap()
            .with_max_retries(5)
            .with_waits(Duration::from_millis(10), Duration::from_millis(10))
    }

    fn fake(ready_after: usize, first_reply: &'static str) -> Fake {
        Fake {
            autostart_calls: Arc::new(AtomicUsize::new(0)),
            ready_after,
            first_reply,
        }
    }

    #[tokio::test]
    async fn no_autostart_url_is_a_no_op() {
        client()
            .ensure_running("http://127.0.0.1:1", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reachable_api_skips_autostart() {
        let f = fake(0, "ready");
        let base = serve(f.clone()).await;
        client()
            .ensure_running(&format!("{}/api", base), Some(&format!("{}/start", base)))
            .await
            .unwrap();
        assert_eq!(f.autostart_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ready_reply_returns_immediately() {
        let f = fake(usize::MAX, "ready");
        let base = serve(f.clone()).await;
        client()
            .ensure_running(&format!("{}/api", base), Some(&format!("{}/start", base)))
            .await
            .unwrap();
        assert_eq!(f.autostart_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waits_until_api_answers() {
        let f = fake(3, "starting");
        let base = serve(f.clone()).await;
        client()
            .ensure_running(&format!("{}/api", base), Some(&format!("{}/start", base)))
            .await
            .unwrap();
        assert_eq!(f.autostart_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let f = fake(usize::MAX, "starting");
        let base = serve(f.clone()).await;
        let err = client()
            .ensure_running(&format!("{}/api", base), Some(&format!("{}/start", base)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 5 retries"));
        // One initial call plus one per retry.
        assert_eq!(f.autostart_calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn failing_first_call_is_an_error() {
        let f = fake(usize::MAX, "starting");
        let base = serve(f).await;
        let err = client()
            .ensure_running(&format!("{}/api", base), Some(&format!("{}/broken", base)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }
}
