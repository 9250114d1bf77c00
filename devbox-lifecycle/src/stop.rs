//! Stop handler: stop a running machine only when it is idle on both signals.
//!
//! Idle means no running workspace AND inbound traffic under the threshold over the
//! trailing window. Missing metrics, unreadable workspaces and errors all keep the
//! machine running.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use devbox_common::MetricWindow;
use devbox_providers::CloudProvider;
use serde::{Deserialize, Serialize};

use crate::config::StopConfig;
use crate::reply::{guarded, Reply, StopResponse, StopStatus};
use crate::workspaces::{self, WorkspaceClient, WorkspaceSource, WorkspaceSummary};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopEvent {
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl StopEvent {
    pub fn for_instance(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Stop,
    KeepRunning { reasons: Vec<String> },
}

impl Decision {
    /// Reasons joined for display, e.g. `"2 active workspace(s) and high network traffic (150.00 MB)"`.
    pub fn reason(&self) -> String {
        match self {
            Decision::Stop => String::new(),
            Decision::KeepRunning { reasons } if reasons.is_empty() => "unknown".to_string(),
            Decision::KeepRunning { reasons } => reasons.join(" and "),
        }
    }
}

/// Stop iff there is no active workspace and traffic stayed strictly below the threshold.
pub fn decide(active_workspaces: usize, network_mb: f64, threshold_mb: f64) -> Decision {
    let mut reasons = Vec::new();
    if active_workspaces > 0 {
        reasons.push(format!("{} active workspace(s)", active_workspaces));
    }
    if network_mb >= threshold_mb {
        reasons.push(format!("high network traffic ({:.2} MB)", network_mb));
    }
    if reasons.is_empty() {
        Decision::Stop
    } else {
        Decision::KeepRunning { reasons }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub struct StopHandler {
    config: StopConfig,
    provider: Arc<dyn CloudProvider>,
    workspaces: Option<Arc<dyn WorkspaceSource>>,
}

impl StopHandler {
    /// Workspaces are only consulted when both the API key and the public address are known.
    pub fn new(config: StopConfig, provider: Arc<dyn CloudProvider>) -> Result<Self> {
        let workspaces: Option<Arc<dyn WorkspaceSource>> =
            match (&config.workspace_api_key, &config.instance_public_ip) {
                (Some(key), Some(ip)) => Some(Arc::new(WorkspaceClient::new(
                    ip,
                    config.workspace_port,
                    key,
                )?)),
                _ => None,
            };
        Ok(Self {
            config,
            provider,
            workspaces,
        })
    }

    pub fn with_workspaces(mut self, source: Arc<dyn WorkspaceSource>) -> Self {
        self.workspaces = Some(source);
        self
    }

    /// Entry point. Never fails: errors and panics become a 500 `error` reply.
    pub async fn handle(&self, event: StopEvent) -> Reply<StopResponse> {
        let instance_id = match event.instance_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                tracing::error!("No instance_id provided in event");
                return Reply::with_status(400, StopResponse::error("instance_id is required"));
            }
        };
        guarded(self.run(&instance_id), |message| {
            Reply::with_status(500, StopResponse::error(message))
        })
        .await
    }

    async fn run(&self, instance_id: &str) -> Result<Reply<StopResponse>> {
        tracing::info!(%instance_id, "Checking activity for instance");

        let state = self.provider.describe_instance(instance_id).await?;
        tracing::info!(%state, "Instance current state");
        if !state.is_running() {
            let mut body = StopResponse::new(
                StopStatus::Skipped,
                format!("Instance is {}, not running", state),
            );
            body.instance_id = Some(instance_id.to_string());
            body.current_state = Some(state.to_string());
            return Ok(Reply::ok(body));
        }

        let Some(window) = self.fetch_network_volume(instance_id).await? else {
            tracing::info!("No network data available, instance likely just started");
            let mut body = StopResponse::new(StopStatus::Active, "No metrics yet, assuming active");
            body.instance_id = Some(instance_id.to_string());
            return Ok(Reply::ok(body));
        };
        let network_mb = window.megabytes();
        tracing::info!(
            "Network traffic in last {} min: {} bytes ({:.2} MB)",
            self.config.metric_window.num_minutes(),
            window.bytes,
            network_mb
        );

        let summary = self.fetch_workspace_state().await;
        let threshold = self.config.network_threshold_mb;

        let mut body = match decide(summary.active, network_mb, threshold) {
            Decision::Stop => {
                tracing::info!(
                    "Instance idle - stopping {}. Active workspaces: {}, Network: {:.2} MB",
                    instance_id,
                    summary.active,
                    network_mb
                );
                self.provider.stop_instance(instance_id).await?;
                let mut body =
                    StopResponse::new(StopStatus::Stopped, "Instance stopped due to inactivity");
                body.network_threshold_mb = Some(threshold);
                body
            }
            keep => {
                let reason = keep.reason();
                tracing::info!("Instance active: {}", reason);
                StopResponse::new(
                    StopStatus::Active,
                    format!("Instance still active: {}", reason),
                )
            }
        };
        body.instance_id = Some(instance_id.to_string());
        body.network_mb = Some(round2(network_mb));
        body.active_workspaces = Some(summary.active);
        body.total_workspaces = Some(summary.total);
        body.workspace_states = Some(summary.states);
        Ok(Reply::ok(body))
    }

    /// Summed inbound traffic over the trailing window, as a single period.
    pub async fn fetch_network_volume(&self, instance_id: &str) -> Result<Option<MetricWindow>> {
        let end = Utc::now();
        let start = end - self.config.metric_window;
        self.provider.network_in(instance_id, start, end).await
    }

    pub async fn fetch_workspace_state(&self) -> WorkspaceSummary {
        match &self.workspaces {
            Some(source) => workspaces::summarize(source.as_ref()).await,
            None => {
                tracing::warn!("Workspace API credentials not configured, skipping workspace check");
                WorkspaceSummary::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_needs_both_signals_idle() {
        assert_eq!(decide(0, 50.0, 100.0), Decision::Stop);
        assert_eq!(decide(0, 99.99, 100.0), Decision::Stop);

        let d = decide(2, 50.0, 100.0);
        assert_eq!(d.reason(), "2 active workspace(s)");

        let d = decide(0, 150.0, 100.0);
        assert_eq!(d.reason(), "high network traffic (150.00 MB)");

        let d = decide(0, 100.0, 100.0);
        assert!(matches!(d, Decision::KeepRunning { .. }));

        let d = decide(2, 150.0, 100.0);
        assert_eq!(
            d.reason(),
            "2 active workspace(s) and high network traffic (150.00 MB)"
        );
    }

    #[test]
    fn stop_event_tolerates_missing_field() {
        let e: StopEvent = serde_json::from_str("{}").unwrap();
        assert_eq!(e, StopEvent::default());
        let e: StopEvent = serde_json::from_str(r#"{"instance_id":"i-1"}"#).unwrap();
        assert_eq!(e, StopEvent::for_instance("i-1"));
    }

    #[test]
    fn rounding_keeps_two_decimals() {
        assert_eq!(round2(47.683_715), 47.68);
        assert_eq!(round2(0.005_1), 0.01);
    }
}
