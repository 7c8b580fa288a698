//! Periodic collection in the background
//!
//! Runs [`UsageCollector::collect_usage`] on a fixed interval and hands each
//! pass's report to a channel, using `Arc<Mutex<bool>>` as the stop flag.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Duration, MissedTickBehavior};
use warden_core::Result;

use crate::collector::{UsageCollector, UsageReport};

/// Background collection loop
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio::sync::mpsc;
/// use warden_cgroup::{MockAccessor, UsageCollector, UsageMonitor};
/// use warden_core::HierarchyMode;
/// use warden_proc::{MockProcessReader, ProcessSampler};
///
/// # async fn run() {
/// let accessor = Arc::new(MockAccessor::new(HierarchyMode::Unified));
/// let sampler = ProcessSampler::new(Arc::new(MockProcessReader::new()));
/// let collector = UsageCollector::new(accessor, sampler);
/// let (tx, mut rx) = mpsc::channel(8);
///
/// let monitor = UsageMonitor::new(collector, "/user.slice", Duration::from_secs(15))
///     .with_reports(tx);
/// let handle = monitor.start().await.unwrap();
///
/// while let Some(report) = rx.recv().await {
///     println!("{} groups", report.groups.len());
/// }
///
/// monitor.stop().await;
/// handle.await.unwrap();
/// # }
/// ```
pub struct UsageMonitor {
    collector: UsageCollector,
    root: String,
    period: Duration,
    running: Arc<Mutex<bool>>,
    report_tx: Option<mpsc::Sender<UsageReport>>,
}

impl UsageMonitor {
    /// Create a monitor collecting below `root` every `period`
    #[must_use]
    pub fn new(collector: UsageCollector, root: impl Into<String>, period: Duration) -> Self {
        Self {
            collector,
            root: root.into(),
            period,
            running: Arc::new(Mutex::new(false)),
            report_tx: None,
        }
    }

    /// Add channel receiving every pass's report
    #[must_use]
    pub fn with_reports(mut self, tx: mpsc::Sender<UsageReport>) -> Self {
        self.report_tx = Some(tx);
        self
    }

    /// Start collecting in the background
    ///
    /// The first pass runs immediately.
    ///
    /// # Errors
    /// Returns error if the period is zero
    pub async fn start(&self) -> Result<tokio::task::JoinHandle<()>> {
        if self.period.is_zero() {
            return Err(warden_core::Error::InvalidConfig {
                message: "monitor interval must be positive".to_string(),
            });
        }

        *self.running.lock().await = true;

        let collector = self.collector.clone();
        let running = Arc::clone(&self.running);
        let report_tx = self.report_tx.clone();
        let root = self.root.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(root = %root, interval_secs = period.as_secs_f64(), "Usage monitoring started");

            loop {
                ticker.tick().await;

                if !*running.lock().await {
                    tracing::debug!("Monitor stopping");
                    break;
                }

                match collector.collect_usage(&root).await {
                    Ok(report) => {
                        if let Some(ref tx) = report_tx {
                            if tx.send(report).await.is_err() {
                                tracing::debug!("Report receiver dropped");
                                break;
                            }
                        }
                    }
                    Err(e) => tracing::error!(root = %root, error = %e, "Collection pass failed"),
                }
            }

            tracing::info!(root = %root, "Usage monitoring stopped");
        });

        Ok(handle)
    }

    /// Stop collecting after the current pass
    pub async fn stop(&self) {
        *self.running.lock().await = false;
        tracing::debug!("Stopping monitor");
    }
}

impl std::fmt::Debug for UsageMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageMonitor")
            .field("root", &self.root)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}
