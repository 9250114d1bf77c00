//! Handler replies and the error boundary shared by the start and stop handlers.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

/// A handler result: HTTP-style status code plus a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub status_code: u16,
    pub body: T,
}

impl<T> Reply<T> {
    pub fn ok(body: T) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn with_status(status_code: u16, body: T) -> Self {
        Self { status_code, body }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartStatus {
    Ready,
    Starting,
    Transitioning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub status: StartStatus,
    pub message: String,
    #[serde(
        rename = "daytona_api_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_time_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
}

impl StartResponse {
    pub fn new(status: StartStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            api_url: None,
            backend_url: None,
            startup_time_seconds: None,
            wait_seconds: None,
            current_state: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StartStatus::Error, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopStatus {
    Skipped,
    Active,
    Stopped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopResponse {
    pub status: StopStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_threshold_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_workspaces: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_workspaces: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_states: Option<BTreeMap<String, String>>,
}

impl StopResponse {
    pub fn new(status: StopStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            instance_id: None,
            current_state: None,
            network_mb: None,
            network_threshold_mb: None,
            active_workspaces: None,
            total_workspaces: None,
            workspace_states: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StopStatus::Error, message)
    }
}

/// Run a handler body, turning an `Err` or a panic into the reply built by `on_error`.
pub async fn guarded<T, F>(fut: F, on_error: impl FnOnce(String) -> Reply<T>) -> Reply<T>
where
    F: Future<Output = anyhow::Result<Reply<T>>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            let message = format!("{:#}", e);
            tracing::error!("Error: {}", message);
            on_error(message)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!("Handler panicked: {}", message);
            on_error(message)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
