//! Watch command implementation

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::Duration;
use warden_cgroup::UsageMonitor;
use warden_core::WardenConfig;

use super::collect;

pub async fn execute(config: &WardenConfig, interval: u64, json: bool) -> Result<()> {
    if interval == 0 {
        anyhow::bail!("Interval must be at least one second");
    }

    let collector = collect::collector(config).await?;
    let (tx, mut rx) = mpsc::channel(4);
    let period = Duration::from_secs(interval);
    let monitor =
        UsageMonitor::new(collector, config.root_group.clone(), period).with_reports(tx);

    let handle = monitor.start().await.context("Failed to start monitor")?;

    loop {
        tokio::select! {
            report = rx.recv() => match report {
                Some(report) => collect::print_report(&report, json)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    monitor.stop().await;
    // the loop may be parked on its next tick
    handle.abort();
    Ok(())
}
