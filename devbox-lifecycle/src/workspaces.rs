use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use devbox_common::Workspace;
use reqwest::Client;

#[async_trait]
pub trait WorkspaceSource: Send + Sync {
    async fn list_workspaces(&self) -> Result<Vec<Workspace>>;
}

/// Workspace API on the instance itself (`GET http://{host}:{port}/api/workspace`).
pub struct WorkspaceClient {
    client: Client,
    url: String,
    api_key: String,
}

impl WorkspaceClient {
    pub fn new(host: &str, port: u16, api_key: &str) -> Result<Self> {
        Self::with_url(&format!("http://{}:{}/api/workspace", host, port), api_key)
    }

    pub fn with_url(url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl WorkspaceSource for WorkspaceClient {
    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let resp = self
            .client
            .get(&self.url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("workspace API returned {}", status);
        }
        resp.json::<Vec<Workspace>>()
            .await
            .context("workspace API returned an unexpected body")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkspaceSummary {
    pub active: usize,
    pub total: usize,
    pub states: BTreeMap<String, String>,
}

impl WorkspaceSummary {
    pub fn from_workspaces(workspaces: &[Workspace]) -> Self {
        let states = workspaces
            .iter()
            .enumerate()
            .map(|(index, w)| {
                (
                    // Unnamed workspaces are keyed by position so none of them is dropped.
                    w.id.clone().unwrap_or_else(|| format!("unknown-{}", index)),
                    w.state.clone().unwrap_or_else(|| "unknown".to_string()),
                )
            })
            .collect();
        Self {
            active: workspaces.iter().filter(|w| w.is_running()).count(),
            total: workspaces.len(),
            states,
        }
    }

    /// Stand-in used when the workspace API cannot be read: one workspace, assumed active.
    pub fn unreachable(reason: &str) -> Self {
        Self {
            active: 1,
            total: 1,
            states: BTreeMap::from([("error".to_string(), reason.to_string())]),
        }
    }
}

pub async fn summarize(source: &dyn WorkspaceSource) -> WorkspaceSummary {
    match source.list_workspaces().await {
        Ok(workspaces) => {
            let summary = WorkspaceSummary::from_workspaces(&workspaces);
            tracing::info!(
                "Workspaces: {} active, {} total",
                summary.active,
                summary.total
            );
            summary
        }
        Err(e) => {
            let reason = format!("{:#}", e);
            tracing::error!("Error checking workspaces, assuming active: {}", reason);
            WorkspaceSummary::unreachable(&reason)
        }
    }
}
