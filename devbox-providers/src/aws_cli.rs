use crate::{CloudProvider, CommandInvocation, CommandStatus, RemoteCommand};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use devbox_common::{InstanceState, MetricWindow};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Cloud provider backed by the `aws` command line client.
///
/// Credentials come from whatever the CLI resolves (instance profile, env, ...).
pub struct AwsCliProvider {
    binary: String,
    region: Option<String>,
    timeout: Duration,
}

impl AwsCliProvider {
    pub fn new(region: Option<String>) -> Self {
        let region = region
            .as_deref()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Self {
            binary: "aws".to_string(),
            region,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(&self, service: &str, operation: &str, extra: &[String]) -> Vec<String> {
        let mut args = vec![service.to_string(), operation.to_string()];
        args.extend(extra.iter().cloned());
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        args.push("--output".to_string());
        args.push("json".to_string());
        args
    }

    async fn run(&self, args: Vec<String>, timeout: Option<Duration>) -> Result<String> {
        tracing::debug!(binary = %self.binary, args = ?args, "running cloud cli");
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let fut = cmd.output();
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                anyhow::anyhow!(
                    "{} {} timed out after {}s",
                    self.binary,
                    args.iter().take(2).cloned().collect::<Vec<_>>().join(" "),
                    limit.as_secs()
                )
            })?,
            None => fut.await,
        }
        .with_context(|| format!("failed to spawn '{}'", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} {} failed: status={} stderr={}",
                self.binary,
                args.iter().take(2).cloned().collect::<Vec<_>>().join(" "),
                output.status,
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_json(&self, args: Vec<String>) -> Result<Value> {
        let stdout = self.run(args, Some(self.timeout)).await?;
        serde_json::from_str(&stdout).context("cloud cli returned invalid json")
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_instance_state(resp: &Value) -> Result<InstanceState> {
    resp["Reservations"][0]["Instances"][0]["State"]["Name"]
        .as_str()
        .map(InstanceState::parse)
        .ok_or_else(|| anyhow::anyhow!("describe-instances response has no instance state"))
}

pub(crate) fn parse_network_sum(resp: &Value) -> Option<f64> {
    resp["Datapoints"]
        .as_array()
        .and_then(|points| points.first())
        .and_then(|p| p["Sum"].as_f64())
}

pub(crate) fn parse_command_id(resp: &Value) -> Result<String> {
    resp["Command"]["CommandId"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("send-command response has no command id"))
}

pub(crate) fn parse_invocation(resp: &Value) -> Result<CommandInvocation> {
    let status = resp["Status"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("get-command-invocation response has no status"))?;
    Ok(CommandInvocation {
        status: CommandStatus::parse(status),
        stdout: resp["StandardOutputContent"].as_str().map(|s| s.to_string()),
        stderr: resp["StandardErrorContent"].as_str().map(|s| s.to_string()),
    })
}

#[async_trait]
impl CloudProvider for AwsCliProvider {
    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceState> {
        let resp = self
            .run_json(self.args(
                "ec2",
                "describe-instances",
                &["--instance-ids".to_string(), instance_id.to_string()],
            ))
            .await?;
        parse_instance_state(&resp)
    }

    async fn start_instance(&self, instance_id: &str) -> Result<()> {
        self.run_json(self.args(
            "ec2",
            "start-instances",
            &["--instance-ids".to_string(), instance_id.to_string()],
        ))
        .await?;
        tracing::info!(instance_id, "[aws-cli] start-instances accepted");
        Ok(())
    }

    async fn wait_until_running(&self, instance_id: &str) -> Result<()> {
        // `aws ec2 wait` prints nothing and exits non-zero once its own attempts run out.
        let mut args = vec![
            "ec2".to_string(),
            "wait".to_string(),
            "instance-running".to_string(),
            "--instance-ids".to_string(),
            instance_id.to_string(),
        ];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        self.run(args, None).await?;
        Ok(())
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<()> {
        self.run_json(self.args(
            "ec2",
            "stop-instances",
            &["--instance-ids".to_string(), instance_id.to_string()],
        ))
        .await?;
        tracing::info!(instance_id, "[aws-cli] stop-instances accepted");
        Ok(())
    }

    async fn network_in(
        &self,
        instance_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<MetricWindow>> {
        let period = (end - start).num_seconds().max(60);
        let resp = self
            .run_json(self.args(
                "cloudwatch",
                "get-metric-statistics",
                &[
                    "--namespace".to_string(),
                    "AWS/EC2".to_string(),
                    "--metric-name".to_string(),
                    "NetworkIn".to_string(),
                    "--dimensions".to_string(),
                    format!("Name=InstanceId,Value={}", instance_id),
                    "--start-time".to_string(),
                    rfc3339(start),
                    "--end-time".to_string(),
                    rfc3339(end),
                    "--period".to_string(),
                    period.to_string(),
                    "--statistics".to_string(),
                    "Sum".to_string(),
                ],
            ))
            .await?;
        Ok(parse_network_sum(&resp).map(|bytes| MetricWindow { bytes, start, end }))
    }

    async fn send_shell_command(&self, instance_id: &str, command: &RemoteCommand) -> Result<String> {
        let parameters = json!({ "commands": command.lines }).to_string();
        let resp = self
            .run_json(self.args(
                "ssm",
                "send-command",
                &[
                    "--instance-ids".to_string(),
                    instance_id.to_string(),
                    "--document-name".to_string(),
                    "AWS-RunShellScript".to_string(),
                    "--parameters".to_string(),
                    parameters,
                    "--timeout-seconds".to_string(),
                    command.timeout_seconds.to_string(),
                ],
            ))
            .await?;
        parse_command_id(&resp)
    }

    async fn command_invocation(
        &self,
        instance_id: &str,
        command_id: &str,
    ) -> Result<CommandInvocation> {
        let resp = self
            .run_json(self.args(
                "ssm",
                "get-command-invocation",
                &[
                    "--command-id".to_string(),
                    command_id.to_string(),
                    "--instance-id".to_string(),
                    instance_id.to_string(),
                ],
            ))
            .await?;
        parse_invocation(&resp)
    }
}
