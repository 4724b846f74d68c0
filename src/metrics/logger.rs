// Metrics logger

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use super::types::{FixOutcomeMetric, SessionEventMetric};

/// Append-only JSONL metrics, one file per day.
#[derive(Debug, Clone)]
pub struct MetricsLogger {
    metrics_dir: PathBuf,
}

impl MetricsLogger {
    pub fn new(metrics_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&metrics_dir).with_context(|| {
            format!(
                "Failed to create metrics directory: {}",
                metrics_dir.display()
            )
        })?;
        Ok(Self { metrics_dir })
    }

    /// Log a fix attempt outcome to today's JSONL file.
    pub fn log_fix(&self, metric: &FixOutcomeMetric) -> Result<()> {
        self.append("fixes", metric)
    }

    /// Log a session lifecycle event to today's JSONL file.
    pub fn log_session(&self, metric: &SessionEventMetric) -> Result<()> {
        self.append("sessions", metric)
    }

    /// Hash an id for privacy (SHA-256).
    pub fn hash_id(id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn append<T: Serialize>(&self, kind: &str, metric: &T) -> Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let log_file = self.metrics_dir.join(format!("{kind}-{today}.jsonl"));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("Failed to open metrics log: {}", log_file.display()))?;

        let json = serde_json::to_string(metric).context("Failed to serialize metric")?;
        writeln!(file, "{}", json).context("Failed to write metric to log")?;
        Ok(())
    }
}
