use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use devbox_common::{InstanceState, Workspace};
use devbox_lifecycle::config::StopConfig;
use devbox_lifecycle::reply::StopStatus;
use devbox_lifecycle::stop::{StopEvent, StopHandler};
use devbox_lifecycle::workspaces::WorkspaceSource;
use devbox_providers::mock::MockProvider;

const MB: f64 = 1024.0 * 1024.0;

struct FakeWorkspaces {
    result: Result<Vec<Workspace>, String>,
    calls: AtomicUsize,
}

impl FakeWorkspaces {
    fn running(active: usize, idle: usize) -> Arc<Self> {
        let mut list = Vec::new();
        for i in 0..active {
            list.push(Workspace {
                id: Some(format!("ws-run-{}", i)),
                state: Some("running".to_string()),
            });
        }
        for i in 0..idle {
            list.push(Workspace {
                id: Some(format!("ws-idle-{}", i)),
                state: Some("stopped".to_string()),
            });
        }
        Arc::new(Self {
            result: Ok(list),
            calls: AtomicUsize::new(0),
        })
    }

    fn broken(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceSource for FakeWorkspaces {
    async fn list_workspaces(&self) -> anyhow::Result<Vec<Workspace>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(|m| anyhow::anyhow!(m))
    }
}

fn handler(provider: &Arc<MockProvider>, workspaces: Option<Arc<FakeWorkspaces>>) -> StopHandler {
    let h = StopHandler::new(StopConfig::default(), provider.clone()).unwrap();
    match workspaces {
        Some(ws) => h.with_workspaces(ws),
        None => h,
    }
}

#[tokio::test]
async fn idle_instance_is_stopped() {
    let provider =
        Arc::new(MockProvider::new(InstanceState::Running).with_network_bytes(50.0 * MB));
    let ws = FakeWorkspaces::running(0, 2);

    let reply = handler(&provider, Some(ws.clone()))
        .handle(StopEvent::for_instance("i-0dev"))
        .await;

    assert_eq!(reply.status_code, 200);
    let body = reply.body;
    assert_eq!(body.status, StopStatus::Stopped);
    assert_eq!(body.message, "Instance stopped due to inactivity");
    assert_eq!(body.instance_id.as_deref(), Some("i-0dev"));
    assert_eq!(body.network_mb, Some(50.0));
    assert_eq!(body.network_threshold_mb, Some(100.0));
    assert_eq!(body.active_workspaces, Some(0));
    assert_eq!(body.total_workspaces, Some(2));
    assert_eq!(body.workspace_states.unwrap().len(), 2);
    assert_eq!(provider.snapshot().stop_calls, 1);
    assert_eq!(ws.calls(), 1);
}

#[tokio::test]
async fn active_workspaces_keep_instance_running() {
    let provider =
        Arc::new(MockProvider::new(InstanceState::Running).with_network_bytes(50.0 * MB));

    let reply = handler(&provider, Some(FakeWorkspaces::running(2, 0)))
        .handle(StopEvent::for_instance("i-0dev"))
        .await;

    assert_eq!(reply.body.status, StopStatus::Active);
    assert_eq!(
        reply.body.message,
        "Instance still active: 2 active workspace(s)"
    );
    assert_eq!(reply.body.active_workspaces, Some(2));
    assert_eq!(provider.snapshot().stop_calls, 0);
}

#[tokio::test]
async fn heavy_traffic_keeps_instance_running() {
    let provider =
        Arc::new(MockProvider::new(InstanceState::Running).with_network_bytes(150.0 * MB));

    let reply = handler(&provider, Some(FakeWorkspaces::running(0, 0)))
        .handle(StopEvent::for_instance("i-0dev"))
        .await;

    assert_eq!(reply.body.status, StopStatus::Active);
    assert_eq!(
        reply.body.message,
        "Instance still active: high network traffic (150.00 MB)"
    );
    assert_eq!(reply.body.network_mb, Some(150.0));
    assert_eq!(provider.snapshot().stop_calls, 0);
}

#[tokio::test]
async fn both_reasons_are_reported() {
    let provider =
        Arc::new(MockProvider::new(InstanceState::Running).with_network_bytes(150.0 * MB));

    let reply = handler(&provider, Some(FakeWorkspaces::running(2, 1)))
        .handle(StopEvent::for_instance("i-0dev"))
        .await;

    assert_eq!(
        reply.body.message,
        "Instance still active: 2 active workspace(s) and high network traffic (150.00 MB)"
    );
}

#[tokio::test]
async fn missing_metrics_assume_active_without_workspace_lookup() {
    let provider = Arc::new(MockProvider::new(InstanceState::Running));
    let ws = FakeWorkspaces::running(0, 0);

    let reply = handler(&provider, Some(ws.clone()))
        .handle(StopEvent::for_instance("i-0dev"))
        .await;

    assert_eq!(reply.body.status, StopStatus::Active);
    assert_eq!(reply.body.message, "No metrics yet, assuming active");
    assert!(reply.body.network_mb.is_none());
    assert_eq!(ws.calls(), 0);
    let s = provider.snapshot();
    assert_eq!(s.metric_calls, 1);
    assert_eq!(s.stop_calls, 0);
}

#[tokio::test]
async fn unreadable_workspaces_count_as_active() {
    let provider =
        Arc::new(MockProvider::new(InstanceState::Running).with_network_bytes(1.0 * MB));

    let reply = handler(&provider, Some(FakeWorkspaces::broken("connection refused")))
        .handle(StopEvent::for_instance("i-0dev"))
        .await;

    assert_eq!(reply.body.status, StopStatus::Active);
    assert_eq!(reply.body.active_workspaces, Some(1));
    let states = reply.body.workspace_states.unwrap();
    assert!(states["error"].contains("connection refused"));
    assert_eq!(provider.snapshot().stop_calls, 0);
}

#[tokio::test]
async fn without_workspace_credentials_only_traffic_counts() {
    let provider =
        Arc::new(MockProvider::new(InstanceState::Running).with_network_bytes(10.0 * MB));

    let reply = handler(&provider, None)
        .handle(StopEvent::for_instance("i-0dev"))
        .await;

    assert_eq!(reply.body.status, StopStatus::Stopped);
    assert_eq!(reply.body.total_workspaces, Some(0));
}

#[tokio::test]
async fn non_running_instance_is_skipped() {
    let provider =
        Arc::new(MockProvider::new(InstanceState::Stopped).with_network_bytes(0.0));

    let reply = handler(&provider, None)
        .handle(StopEvent::for_instance("i-0dev"))
        .await;

    assert_eq!(reply.status_code, 200);
    assert_eq!(reply.body.status, StopStatus::Skipped);
    assert_eq!(reply.body.message, "Instance is stopped, not running");
    assert_eq!(reply.body.current_state.as_deref(), Some("stopped"));
    let s = provider.snapshot();
    assert_eq!(s.metric_calls, 0);
    assert_eq!(s.stop_calls, 0);
}

#[tokio::test]
async fn missing_instance_id_is_rejected() {
    let provider = Arc::new(MockProvider::new(InstanceState::Running));

    for event in [StopEvent::default(), StopEvent::for_instance("  ")] {
        let reply = handler(&provider, None).handle(event).await;
        assert_eq!(reply.status_code, 400);
        assert_eq!(reply.body.status, StopStatus::Error);
        assert_eq!(reply.body.message, "instance_id is required");
    }
    assert_eq!(provider.snapshot().describe_calls, 0);
}

#[tokio::test]
async fn provider_failures_become_error_replies() {
    let provider =
        Arc::new(MockProvider::new(InstanceState::Running).failing_describe("InvalidInstanceID"));
    let reply = handler(&provider, None)
        .handle(StopEvent::for_instance("i-0dev"))
        .await;
    assert_eq!(reply.status_code, 500);
    assert!(reply.body.message.contains("InvalidInstanceID"));

    let provider = Arc::new(
        MockProvider::new(InstanceState::Running)
            .with_network_bytes(0.0)
            .failing_stop("UnauthorizedOperation"),
    );
    let reply = handler(&provider, None)
        .handle(StopEvent::for_instance("i-0dev"))
        .await;
    assert_eq!(reply.status_code, 500);
    assert_eq!(reply.body.status, StopStatus::Error);
    assert_eq!(provider.snapshot().stop_calls, 1);
}
