use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devbox_common::{InstanceState, MetricWindow};

pub mod metadata;

#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceState>;

    async fn start_instance(&self, instance_id: &str) -> Result<()>;

    /// Block until the provider reports the instance as running.
    /// Relies on the provider's own waiter semantics; callers add no timeout.
    async fn wait_until_running(&self, instance_id: &str) -> Result<()>;

    /// Request a stop. Returns as soon as the request is accepted.
    async fn stop_instance(&self, instance_id: &str) -> Result<()>;

    /// Summed inbound network bytes over `[start, end)` as a single period.
    /// `Ok(None)` when the metrics API has no datapoint for the window yet.
    async fn network_in(
        &self,
        instance_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<MetricWindow>>;

    /// Dispatch a shell script on the instance. Returns the provider's command id.
    async fn send_shell_command(&self, instance_id: &str, command: &RemoteCommand) -> Result<String>;

    async fn command_invocation(
        &self,
        instance_id: &str,
        command_id: &str,
    ) -> Result<CommandInvocation>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCommand {
    pub lines: Vec<String>,
    pub timeout_seconds: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    InProgress,
    Delayed,
    Success,
    Cancelled,
    TimedOut,
    Failed,
    Cancelling,
    Other(String),
}

impl CommandStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Pending" => CommandStatus::Pending,
            "InProgress" => CommandStatus::InProgress,
            "Delayed" => CommandStatus::Delayed,
            "Success" => CommandStatus::Success,
            "Cancelled" => CommandStatus::Cancelled,
            "TimedOut" => CommandStatus::TimedOut,
            "Failed" => CommandStatus::Failed,
            "Cancelling" => CommandStatus::Cancelling,
            other => CommandStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommandStatus::Pending => "Pending",
            CommandStatus::InProgress => "InProgress",
            CommandStatus::Delayed => "Delayed",
            CommandStatus::Success => "Success",
            CommandStatus::Cancelled => "Cancelled",
            CommandStatus::TimedOut => "TimedOut",
            CommandStatus::Failed => "Failed",
            CommandStatus::Cancelling => "Cancelling",
            CommandStatus::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandInvocation {
    pub status: CommandStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

#[cfg(feature = "aws")]
pub mod aws_cli;

#[cfg(feature = "mock")]
pub mod mock;
