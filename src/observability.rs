//! Logging and alerting context
//!
//! One [`Observer`] is built at startup and handed to every component. It
//! keeps pass counters and routes critical failures to the alert sink, so
//! nothing reconfigures a global logger at runtime.

use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

/// Counters for one process lifetime
#[derive(Debug, Default)]
pub struct Metrics {
    exposures_transferred: AtomicU64,
    transfer_failures: AtomicU64,
    checksum_failures: AtomicU64,
    archives_attempted: AtomicU64,
    alerts_raised: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exposure_transferred(&self) {
        self.exposures_transferred.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "exposures_transferred", "Metric incremented");
    }

    pub fn transfer_failed(&self) {
        self.transfer_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "transfer_failures", "Metric incremented");
    }

    pub fn checksum_failed(&self) {
        self.checksum_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "checksum_failures", "Metric incremented");
    }

    pub fn archive_attempted(&self) {
        self.archives_attempted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "archives_attempted", "Metric incremented");
    }

    fn alert_raised(&self) {
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            exposures_transferred: self.exposures_transferred.load(Ordering::Relaxed),
            transfer_failures: self.transfer_failures.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            archives_attempted: self.archives_attempted.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub exposures_transferred: u64,
    pub transfer_failures: u64,
    pub checksum_failures: u64,
    pub archives_attempted: u64,
    pub alerts_raised: u64,
}

#[derive(Serialize)]
struct AlertLine<'a> {
    timestamp: String,
    subject: &'a str,
    message: &'a str,
}

/// Logging/alerting context passed explicitly into components
#[derive(Debug, Default)]
pub struct Observer {
    pub metrics: Metrics,
    alert_log: Option<PathBuf>,
}

impl Observer {
    pub fn new(alert_log: Option<PathBuf>) -> Self {
        Self {
            metrics: Metrics::new(),
            alert_log,
        }
    }

    /// Report a failure that needs operator attention
    ///
    /// Logged at error level with `alert = true` and appended to the alert
    /// sink when one is configured. Never fails: a broken sink is only
    /// logged.
    pub fn critical(&self, subject: &str, message: &str) {
        self.metrics.alert_raised();
        error!(alert = true, subject, "{}", message);

        let Some(path) = &self.alert_log else {
            return;
        };
        let line = AlertLine {
            timestamp: Utc::now().to_rfc3339(),
            subject,
            message,
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| {
                let mut text = serde_json::to_string(&line).map_err(std::io::Error::other)?;
                text.push('\n');
                file.write_all(text.as_bytes())
            });
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write alert sink");
        }
    }
}
