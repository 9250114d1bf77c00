//! Start handler: bring the dev machine and its services up on demand.
//!
//! `running` + services up answers immediately. `running` + services down restarts the
//! compose stack remotely. `stopped` boots the machine. Anything else is in transition and
//! the caller is told to retry later.

use std::sync::Arc;

use anyhow::Result;
use devbox_common::InstanceState;
use devbox_providers::{CloudProvider, CommandStatus, RemoteCommand};
use tokio::time::{sleep, Instant};

use crate::config::StartConfig;
use crate::probe::ServiceProbe;
use crate::reply::{guarded, Reply, StartResponse, StartStatus};

pub struct StartHandler {
    config: StartConfig,
    provider: Arc<dyn CloudProvider>,
    probe: Arc<dyn ServiceProbe>,
}

impl StartHandler {
    pub fn new(
        config: StartConfig,
        provider: Arc<dyn CloudProvider>,
        probe: Arc<dyn ServiceProbe>,
    ) -> Self {
        Self {
            config,
            provider,
            probe,
        }
    }

    pub fn config(&self) -> &StartConfig {
        &self.config
    }

    /// Entry point. Never fails: errors and panics become a 500 `error` reply.
    pub async fn handle(&self) -> Reply<StartResponse> {
        guarded(self.run(), |message| {
            Reply::with_status(500, StartResponse::error(message))
        })
        .await
    }

    async fn run(&self) -> Result<Reply<StartResponse>> {
        let instance_id = &self.config.instance_id;
        let state = self.provider.describe_instance(instance_id).await?;
        tracing::info!(%instance_id, %state, "Current instance state");

        match state {
            InstanceState::Running => {
                if self.services_ready().await {
                    tracing::info!("Instance running and services ready");
                    return Ok(Reply::ok(self.ready("Instance running and services ready", None)));
                }

                tracing::info!("Instance running but services not ready, starting services...");
                if !self.start_dependent_services().await {
                    return Ok(Reply::ok(
                        self.starting("Instance running but services starting"),
                    ));
                }
                let body = self.await_services("Services started successfully").await;
                Ok(Reply::ok(body))
            }
            InstanceState::Stopped => {
                tracing::info!(%instance_id, "Starting instance...");
                self.provider.start_instance(instance_id).await?;

                tracing::info!("Waiting for instance to reach running state...");
                self.provider.wait_until_running(instance_id).await?;
                tracing::info!("Instance is running, waiting for services...");

                let body = self
                    .await_services("Instance and services started successfully")
                    .await;
                Ok(Reply::ok(body))
            }
            other => {
                tracing::info!(state = %other, "Instance in transition, nothing to do");
                let mut body = StartResponse::new(
                    StartStatus::Transitioning,
                    format!("Instance is {}, please wait", other),
                );
                body.current_state = Some(other.to_string());
                body.wait_seconds = Some(self.config.retry_after_seconds);
                Ok(Reply::ok(body))
            }
        }
    }

    pub async fn services_ready(&self) -> bool {
        self.probe.services_ready().await
    }

    /// Restart the compose stack on the instance.
    ///
    /// `true` when the command succeeded or is still running, also when its status
    /// could not be read. `false` when it could not be dispatched or ended badly.
    pub async fn start_dependent_services(&self) -> bool {
        let instance_id = &self.config.instance_id;
        let command = RemoteCommand {
            lines: vec![
                format!("cd {}", self.config.compose_dir),
                "sudo docker compose up -d".to_string(),
            ],
            timeout_seconds: self.config.remote_command_timeout_seconds,
        };

        let command_id = match self.provider.send_shell_command(instance_id, &command).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Failed to start services: {:#}", e);
                return false;
            }
        };
        tracing::info!(%command_id, "Sent compose command");

        sleep(self.config.command_settle_delay).await;

        match self.provider.command_invocation(instance_id, &command_id).await {
            Ok(invocation) => match invocation.status {
                CommandStatus::Success | CommandStatus::InProgress => {
                    tracing::info!(status = %invocation.status, "Compose command accepted");
                    true
                }
                status => {
                    tracing::error!(
                        %status,
                        stdout = invocation.stdout.as_deref().unwrap_or(""),
                        stderr = invocation.stderr.as_deref().unwrap_or(""),
                        "Compose command did not succeed"
                    );
                    false
                }
            },
            Err(e) => {
                tracing::warn!("Could not get command status (likely still running): {:#}", e);
                true
            }
        }
    }

    async fn await_services(&self, ready_message: &str) -> StartResponse {
        match self.wait_for_services().await {
            Some(elapsed) => self.ready(ready_message, Some(elapsed)),
            None => self.starting("Services are starting, please wait"),
        }
    }

    /// Poll readiness every `poll_interval` until `max_wait` is spent.
    /// Returns the elapsed whole seconds once ready. Never sleeps past the deadline.
    async fn wait_for_services(&self) -> Option<u64> {
        let started = Instant::now();
        let max_wait = self.config.max_wait;
        loop {
            if started.elapsed() >= max_wait {
                tracing::warn!(
                    "Services did not become ready within {} seconds",
                    max_wait.as_secs()
                );
                return None;
            }
            if self.services_ready().await {
                let elapsed = started.elapsed().as_secs();
                tracing::info!("Services ready after {} seconds", elapsed);
                return Some(elapsed);
            }
            let remaining = max_wait.saturating_sub(started.elapsed());
            let pause = self.config.poll_interval.min(remaining);
            tracing::info!(
                "Services not ready yet, waiting {} seconds...",
                pause.as_secs()
            );
            sleep(pause).await;
        }
    }

    fn ready(&self, message: &str, startup_time_seconds: Option<u64>) -> StartResponse {
        let mut body = StartResponse::new(StartStatus::Ready, message);
        body.api_url = Some(self.config.api_url.clone());
        body.backend_url = self.config.backend_url.clone();
        body.startup_time_seconds = startup_time_seconds;
        body
    }

    fn starting(&self, message: &str) -> StartResponse {
        let mut body = StartResponse::new(StartStatus::Starting, message);
        body.wait_seconds = Some(self.config.retry_after_seconds);
        body
    }
}
