use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use devbox_common::ActivityRecord;

/// Local JSON file holding the last observed activity.
///
/// Single writer (the monitor). Each write replaces the whole record.
#[derive(Clone, Debug)]
pub struct ActivityStore {
    path: PathBuf,
}

impl ActivityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no record has been written yet.
    pub async fn load(&self) -> Result<Option<ActivityRecord>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(record))
    }

    pub async fn persist(&self, last_activity: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let record = ActivityRecord {
            last_activity,
            last_check: now,
        };
        let body = serde_json::to_string_pretty(&record)?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}
