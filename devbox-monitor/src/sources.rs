//! Activity signals sampled by the monitor.
//!
//! Every source reports a [`Probe`]; none of them can abort a cycle.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use tokio::process::Command;

use crate::store::ActivityStore;

/// Outcome of sampling a single activity source.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    /// The source saw activity at this instant.
    Observed(DateTime<Utc>),
    /// The source was consulted but never contributes a timestamp.
    Informational(String),
    /// Nothing to read (missing file, backend not answering 200, ...).
    Unavailable(String),
    /// The source could not be read.
    Failed(String),
}

#[async_trait]
pub trait ActivitySource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn probe(&self) -> Probe;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivitySample {
    pub last_activity: DateTime<Utc>,
    pub observed: Vec<(&'static str, DateTime<Utc>)>,
    pub fallback_used: bool,
}

/// How far back "last activity" is placed when no source reports anything.
pub fn no_activity_fallback() -> chrono::Duration {
    chrono::Duration::days(1)
}

/// Maximum of the observed timestamps, or `now - 1 day` when there are none.
pub fn latest_activity(observed: &[DateTime<Utc>], now: DateTime<Utc>) -> (DateTime<Utc>, bool) {
    match observed.iter().max() {
        Some(ts) => (*ts, false),
        None => (now - no_activity_fallback(), true),
    }
}

pub async fn sample_activity(
    sources: &[Box<dyn ActivitySource>],
    now: DateTime<Utc>,
) -> ActivitySample {
    let mut observed = Vec::new();
    for source in sources {
        match source.probe().await {
            Probe::Observed(ts) => {
                tracing::debug!(source = source.name(), at = %ts, "activity observed");
                observed.push((source.name(), ts));
            }
            Probe::Informational(detail) => {
                tracing::debug!(source = source.name(), %detail, "source consulted");
            }
            Probe::Unavailable(reason) => {
                tracing::debug!(source = source.name(), %reason, "source unavailable");
            }
            Probe::Failed(reason) => {
                tracing::debug!(source = source.name(), %reason, "source failed");
            }
        }
    }

    let timestamps: Vec<DateTime<Utc>> = observed.iter().map(|(_, ts)| *ts).collect();
    let (last_activity, fallback_used) = latest_activity(&timestamps, now);
    if fallback_used {
        tracing::warn!("No activity detected from any source");
    } else {
        tracing::info!(%last_activity, "Last activity detected");
    }
    ActivitySample {
        last_activity,
        observed,
        fallback_used,
    }
}

// --- Sources ---

/// Live probe of the backend: a 200 from `/health` means the host is in use right now.
pub struct BackendHealthSource {
    client: Client,
    health_url: String,
}

impl BackendHealthSource {
    pub fn new(backend_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            health_url: format!("{}/health", backend_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ActivitySource for BackendHealthSource {
    fn name(&self) -> &'static str {
        "backend_health"
    }

    async fn probe(&self) -> Probe {
        match self.client.get(&self.health_url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => Probe::Observed(Utc::now()),
            Ok(resp) => Probe::Unavailable(format!("status={}", resp.status())),
            Err(e) => Probe::Failed(format!("health check failed: {}", e)),
        }
    }
}

/// Modification time of the backend log file.
pub struct LogFileSource {
    path: PathBuf,
}

impl LogFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ActivitySource for LogFileSource {
    fn name(&self) -> &'static str {
        "backend_log"
    }

    async fn probe(&self) -> Probe {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Probe::Unavailable(format!("{} does not exist", self.path.display()))
            }
            Err(e) => return Probe::Failed(format!("{}: {}", self.path.display(), e)),
        };
        match meta.modified() {
            Ok(mtime) => Probe::Observed(DateTime::<Utc>::from(mtime)),
            Err(e) => Probe::Failed(format!("{}: {}", self.path.display(), e)),
        }
    }
}

/// The timestamp persisted by the previous cycle.
pub struct StoredActivitySource {
    store: ActivityStore,
}

impl StoredActivitySource {
    pub fn new(store: ActivityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActivitySource for StoredActivitySource {
    fn name(&self) -> &'static str {
        "stored_activity"
    }

    async fn probe(&self) -> Probe {
        match self.store.load().await {
            Ok(Some(record)) => Probe::Observed(record.last_activity),
            Ok(None) => Probe::Unavailable("no activity recorded yet".to_string()),
            Err(e) => Probe::Failed(format!("{:#}", e)),
        }
    }
}

/// Running local containers. Idle containers are not activity, so this only reports a count.
pub struct ContainerSource {
    binary: String,
    timeout: Duration,
}

impl ContainerSource {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Default for ContainerSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivitySource for ContainerSource {
    fn name(&self) -> &'static str {
        "containers"
    }

    async fn probe(&self) -> Probe {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["ps", "--format", "{{.Names}}"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Probe::Failed(format!("failed to run {}: {}", self.binary, e)),
            Err(_) => return Probe::Failed(format!("{} ps timed out", self.binary)),
        };
        if !output.status.success() {
            return Probe::Failed(format!("{} ps exited with {}", self.binary, output.status));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let count = stdout.lines().filter(|l| !l.trim().is_empty()).count();
        Probe::Informational(format!("{} running container(s)", count))
    }
}
