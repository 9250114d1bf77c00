//! Instance metadata service client.
//!
//! Used by the on-host monitor to discover which machine it is running on.
//! A session token (IMDSv2) is requested first; when the service does not hand
//! one out, plain unauthenticated reads are used.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub region: String,
}

pub struct MetadataClient {
    client: Client,
    base_url: String,
}

impl MetadataClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(2))
            .build()
            .context("failed to build metadata http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    async fn session_token(&self) -> Option<String> {
        let url = format!("{}/latest/api/token", self.base_url);
        let resp = self
            .client
            .put(&url)
            .header(TOKEN_TTL_HEADER, "21600")
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            tracing::debug!(status = %resp.status(), "metadata token not issued, using unauthenticated reads");
            return None;
        }
        let token = resp.text().await.ok()?;
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    async fn read(&self, path: &str, token: Option<&str>) -> Result<String> {
        let url = format!("{}/latest/meta-data/{}", self.base_url, path);
        let mut req = self.client.get(&url);
        if let Some(token) = token {
            req = req.header(TOKEN_HEADER, token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("metadata request failed: {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("metadata GET {url} returned status={status}");
        }
        let body = resp.text().await?;
        let value = body.trim().to_string();
        if value.is_empty() {
            anyhow::bail!("metadata GET {url} returned an empty body");
        }
        Ok(value)
    }

    pub async fn instance_identity(&self) -> Result<InstanceIdentity> {
        let token = self.session_token().await;
        let instance_id = self.read("instance-id", token.as_deref()).await?;
        let region = self.read("placement/region", token.as_deref()).await?;
        Ok(InstanceIdentity {
            instance_id,
            region,
        })
    }
}
