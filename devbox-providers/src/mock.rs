use crate::{CloudProvider, CommandInvocation, CommandStatus, RemoteCommand};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devbox_common::{InstanceState, MetricWindow};
use std::sync::{Mutex, MutexGuard};

/// In-memory provider for local runs and tests.
///
/// Holds a single machine. `start_instance` + `wait_until_running` flip it to running,
/// `stop_instance` flips it to stopping. Every call is counted.
pub struct MockProvider {
    inner: Mutex<MockState>,
}

#[derive(Clone, Debug)]
pub struct MockState {
    pub state: InstanceState,
    pub network_bytes: Option<f64>,
    pub command_status: Result<CommandStatus, String>,
    pub fail_describe: Option<String>,
    pub fail_stop: Option<String>,
    pub fail_send_command: Option<String>,
    pub describe_calls: usize,
    pub start_calls: usize,
    pub wait_calls: usize,
    pub stop_calls: usize,
    pub metric_calls: usize,
    pub sent_commands: Vec<RemoteCommand>,
    pub invocation_calls: usize,
}

impl MockProvider {
    pub fn new(state: InstanceState) -> Self {
        Self {
            inner: Mutex::new(MockState {
                state,
                network_bytes: None,
                command_status: Ok(CommandStatus::Success),
                fail_describe: None,
                fail_stop: None,
                fail_send_command: None,
                describe_calls: 0,
                start_calls: 0,
                wait_calls: 0,
                stop_calls: 0,
                metric_calls: 0,
                sent_commands: Vec::new(),
                invocation_calls: 0,
            }),
        }
    }

    pub fn with_network_bytes(self, bytes: f64) -> Self {
        self.lock().network_bytes = Some(bytes);
        self
    }

    /// Status returned by `command_invocation`; `Err` makes the status query fail.
    pub fn with_command_status(self, status: Result<CommandStatus, String>) -> Self {
        self.lock().command_status = status;
        self
    }

    pub fn failing_describe(self, message: &str) -> Self {
        self.lock().fail_describe = Some(message.to_string());
        self
    }

    pub fn failing_stop(self, message: &str) -> Self {
        self.lock().fail_stop = Some(message.to_string());
        self
    }

    pub fn failing_send_command(self, message: &str) -> Self {
        self.lock().fail_send_command = Some(message.to_string());
        self
    }

    /// Snapshot of the machine and call counters.
    pub fn snapshot(&self) -> MockState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // Counters stay readable after a panicking caller.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn describe_instance(&self, _instance_id: &str) -> Result<InstanceState> {
        let mut s = self.lock();
        s.describe_calls += 1;
        if let Some(msg) = &s.fail_describe {
            anyhow::bail!("{}", msg);
        }
        Ok(s.state.clone())
    }

    async fn start_instance(&self, _instance_id: &str) -> Result<()> {
        let mut s = self.lock();
        s.start_calls += 1;
        s.state = InstanceState::Pending;
        Ok(())
    }

    async fn wait_until_running(&self, _instance_id: &str) -> Result<()> {
        let mut s = self.lock();
        s.wait_calls += 1;
        s.state = InstanceState::Running;
        Ok(())
    }

    async fn stop_instance(&self, _instance_id: &str) -> Result<()> {
        let mut s = self.lock();
        s.stop_calls += 1;
        if let Some(msg) = &s.fail_stop {
            anyhow::bail!("{}", msg);
        }
        s.state = InstanceState::Stopping;
        Ok(())
    }

    async fn network_in(
        &self,
        _instance_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<MetricWindow>> {
        let mut s = self.lock();
        s.metric_calls += 1;
        Ok(s.network_bytes.map(|bytes| MetricWindow { bytes, start, end }))
    }

    async fn send_shell_command(&self, _instance_id: &str, command: &RemoteCommand) -> Result<String> {
        let mut s = self.lock();
        if let Some(msg) = &s.fail_send_command {
            anyhow::bail!("{}", msg);
        }
        s.sent_commands.push(command.clone());
        Ok(format!("mock-cmd-{}", s.sent_commands.len()))
    }

    async fn command_invocation(
        &self,
        _instance_id: &str,
        _command_id: &str,
    ) -> Result<CommandInvocation> {
        let mut s = self.lock();
        s.invocation_calls += 1;
        match &s.command_status {
            Ok(status) => Ok(CommandInvocation {
                status: status.clone(),
                stdout: Some(String::new()),
                stderr: Some(String::new()),
            }),
            Err(msg) => Err(anyhow::anyhow!("{}", msg)),
        }
    }
}
