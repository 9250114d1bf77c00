use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use devbox_providers::metadata::MetadataClient;
use tokio::sync::watch;

use crate::config::MonitorConfig;
use crate::sources::{
    self, ActivitySample, ActivitySource, BackendHealthSource, ContainerSource, LogFileSource,
    StoredActivitySource,
};
use crate::stopper::{InstanceStopper, SelfStopper};
use crate::store::ActivityStore;

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Below the idle threshold.
    Active { idle_minutes: f64 },
    /// Threshold crossed, but activity showed up during the grace period.
    Cancelled { idle_minutes: f64 },
    Stopped { instance_id: String },
    /// Stop was attempted and failed; retried on the next cycle.
    StopFailed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    InstanceStopped,
    Interrupted,
}

pub struct IdleMonitor {
    config: MonitorConfig,
    sources: Vec<Box<dyn ActivitySource>>,
    store: ActivityStore,
    stopper: Box<dyn InstanceStopper>,
}

fn minutes(d: chrono::Duration) -> f64 {
    d.num_milliseconds() as f64 / 60_000.0
}

impl IdleMonitor {
    pub fn new(
        config: MonitorConfig,
        sources: Vec<Box<dyn ActivitySource>>,
        store: ActivityStore,
        stopper: Box<dyn InstanceStopper>,
    ) -> Self {
        Self {
            config,
            sources,
            store,
            stopper,
        }
    }

    /// Wire the production sources and the metadata-driven stopper.
    pub fn from_config(config: MonitorConfig) -> Result<Self> {
        let store = ActivityStore::new(config.activity_file.clone());
        let sources: Vec<Box<dyn ActivitySource>> = vec![
            Box::new(BackendHealthSource::new(&config.backend_url)?),
            Box::new(LogFileSource::new(config.backend_log_file.clone())),
            Box::new(StoredActivitySource::new(store.clone())),
            Box::new(ContainerSource::new()),
        ];
        let stopper = SelfStopper::new(MetadataClient::new(&config.metadata_url)?);
        Ok(Self::new(config, sources, store, Box::new(stopper)))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub async fn sample_activity(&self) -> ActivitySample {
        sources::sample_activity(&self.sources, Utc::now()).await
    }

    pub async fn persist_activity(&self, last_activity: DateTime<Utc>) {
        match self.store.persist(last_activity, Utc::now()).await {
            Ok(()) => tracing::debug!(%last_activity, "Updated activity file"),
            Err(e) => tracing::error!("Could not update activity file: {:#}", e),
        }
    }

    /// One monitor cycle: sample, persist, and stop the machine if it stayed idle
    /// through the grace period.
    pub async fn evaluate(&self) -> CycleOutcome {
        let threshold = self.config.idle_threshold();
        let sample = self.sample_activity().await;
        let idle = Utc::now() - sample.last_activity;
        tracing::info!(
            "Idle for {:.1} minutes (threshold: {} minutes)",
            minutes(idle),
            self.config.idle_threshold_minutes
        );

        self.persist_activity(sample.last_activity).await;

        if idle < threshold {
            return CycleOutcome::Active {
                idle_minutes: minutes(idle),
            };
        }

        tracing::warn!(
            "Instance has been idle for {:.1} minutes, initiating shutdown...",
            minutes(idle)
        );
        tracing::info!(
            "Waiting {} seconds before shutdown (grace period)...",
            self.config.grace_period.as_secs()
        );
        tokio::time::sleep(self.config.grace_period).await;

        let recheck = self.sample_activity().await;
        let idle_after = Utc::now() - recheck.last_activity;
        if idle_after < threshold {
            tracing::info!("Activity detected during grace period, canceling shutdown");
            return CycleOutcome::Cancelled {
                idle_minutes: minutes(idle_after),
            };
        }

        match self.stopper.stop_self().await {
            Ok(instance_id) => {
                tracing::info!(%instance_id, "Instance stop initiated successfully");
                CycleOutcome::Stopped { instance_id }
            }
            Err(e) => {
                tracing::error!("Failed to stop instance, will retry on next check: {:#}", e);
                CycleOutcome::StopFailed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    /// Evaluate every `check_interval` until the machine is stopped or `shutdown` flips to true.
    ///
    /// Each cycle runs in its own task; a cycle that panics is logged and the loop goes on.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> RunExit {
        tracing::info!("{}", "=".repeat(60));
        tracing::info!("Auto-Stop Monitoring Service Started");
        tracing::info!("Idle threshold: {} minutes", self.config.idle_threshold_minutes);
        tracing::info!("Check interval: {} seconds", self.config.check_interval.as_secs());
        tracing::info!("{}", "=".repeat(60));

        loop {
            if *shutdown.borrow() {
                tracing::info!("Received interrupt signal, shutting down gracefully...");
                return RunExit::Interrupted;
            }

            let monitor = self.clone();
            match tokio::spawn(async move { monitor.evaluate().await }).await {
                Ok(CycleOutcome::Stopped { .. }) => {
                    tracing::info!("Instance stop initiated, exiting monitor");
                    return RunExit::InstanceStopped;
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Unexpected error in monitor cycle: {}", e),
            }

            tracing::debug!(
                "Sleeping for {} seconds...",
                self.config.check_interval.as_secs()
            );
            if wait_or_shutdown(self.config.check_interval, &mut shutdown).await {
                tracing::info!("Received interrupt signal, shutting down gracefully...");
                return RunExit::Interrupted;
            }
        }
    }
}

/// Sleep for `interval`; returns true as soon as a shutdown is signalled.
async fn wait_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return true,
                Ok(()) => continue,
                // Sender gone: nobody can ask for a shutdown any more.
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}
