use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

pub const HEALTH_CHECK_USER_AGENT: &str = "devbox-health-check";

/// Readiness of the services running on the instance. Must not have side effects.
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn services_ready(&self) -> bool;
}

/// HTTP readiness: the primary API, then `{backend_url}/health` when a backend is configured.
pub struct HttpServiceProbe {
    client: Client,
    api_url: String,
    backend_health_url: Option<String>,
}

impl HttpServiceProbe {
    pub fn new(api_url: &str, backend_url: Option<&str>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(5))
            .user_agent(HEALTH_CHECK_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            backend_health_url: backend_url
                .map(|u| format!("{}/health", u.trim_end_matches('/'))),
        })
    }

    async fn check(&self, label: &str, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::info!("{} not ready: status={}", label, resp.status());
                false
            }
            Err(e) => {
                tracing::info!("{} not ready: {}", label, e);
                false
            }
        }
    }
}

#[async_trait]
impl ServiceProbe for HttpServiceProbe {
    async fn services_ready(&self) -> bool {
        if !self.check("API", &self.api_url).await {
            return false;
        }
        match &self.backend_health_url {
            Some(url) => self.check("Backend", url).await,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn ready_only_when_every_check_succeeds() {
        let base = serve(
            Router::new()
                .route(
                    "/api",
                    get(|headers: HeaderMap| async move {
                        match headers.get("user-agent").and_then(|v| v.to_str().ok()) {
                            Some(HEALTH_CHECK_USER_AGENT) => StatusCode::OK,
                            _ => StatusCode::FORBIDDEN,
                        }
                    }),
                )
                .route("/up/health", get(|| async { "ok" }))
                .route(
                    "/down/health",
                    get(|| async { StatusCode::BAD_GATEWAY }),
                ),
        )
        .await;

        let api = format!("{}/api", base);
        assert!(HttpServiceProbe::new(&api, None).unwrap().services_ready().await);
        assert!(
            HttpServiceProbe::new(&api, Some(&format!("{}/up/", base)))
                .unwrap()
                .services_ready()
                .await
        );
        assert!(
            !HttpServiceProbe::new(&api, Some(&format!("{}/down", base)))
                .unwrap()
                .services_ready()
                .await
        );
        assert!(
            !HttpServiceProbe::new(&format!("{}/missing", base), None)
                .unwrap()
                .services_ready()
                .await
        );
        assert!(!HttpServiceProbe::new("http://127.0.0.1:1", None)
            .unwrap()
            .services_ready()
            .await);
    }
}
