//! Collect command implementation

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use warden_cgroup::{UsageCollector, UsageReport};
use warden_core::{MemorySize, ProcessAggregate, UsageSnapshot, WardenConfig};
use warden_proc::{ProcessSampler, ProcfsReader};

pub async fn execute(config: &WardenConfig, json: bool) -> Result<()> {
    let collector = collector(config).await?;

    tracing::info!(root = %config.root_group, "Collecting usage");
    let report = collector
        .collect_usage(&config.root_group)
        .await
        .context("Collection pass failed")?;

    print_report(&report, json)
}

/// Collector over the detected hierarchy and the configured procfs
pub async fn collector(config: &WardenConfig) -> Result<UsageCollector> {
    let provider = super::provider(config).await?;
    let sampler = ProcessSampler::new(Arc::new(ProcfsReader::new(config.proc_root.clone())));
    Ok(UsageCollector::new(provider.accessor(), sampler))
}

#[derive(Serialize)]
struct GroupRecord<'a> {
    group: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<&'a UsageSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    processes: &'a [ProcessAggregate],
}

/// Print one pass as a table, or as a single JSON document
pub fn print_report(report: &UsageReport, json: bool) -> Result<()> {
    if json {
        let records: Vec<GroupRecord<'_>> = report
            .groups
            .iter()
            .map(|usage| GroupRecord {
                group: usage.group.as_str(),
                snapshot: usage.snapshot.as_ref().ok(),
                error: usage.snapshot.as_ref().err().map(ToString::to_string),
                processes: &usage.processes,
            })
            .collect();
        println!("{}", serde_json::to_string(&records)?);
        return Ok(());
    }

    println!("\nUsage below {} group(s)", report.groups.len());
    println!("{:-<72}", "");

    for usage in &report.groups {
        match &usage.snapshot {
            Ok(snapshot) => {
                println!("{} ({})", usage.group, snapshot.owner_username);
                println!(
                    "  CPU:     {:.2}s, quota {}",
                    snapshot.cpu_seconds_total, snapshot.cpu_quota_per_second
                );
                println!(
                    "  Memory:  {} of {}",
                    snapshot.memory_usage_bytes, snapshot.memory_ceiling_bytes
                );
            }
            Err(e) => println!("{} (unavailable: {e})", usage.group),
        }

        for process in &usage.processes {
            println!(
                "    {:<20} {:>4} proc  {:>10.2}s  {}",
                process.command,
                process.count,
                process.cpu_seconds_total,
                MemorySize::from_bytes(process.memory_bytes_total)
            );
        }
    }

    println!("{:-<72}", "");
    println!(
        "{} group(s), {} failed, {:.1}ms",
        report.groups.len(),
        report.failed_snapshots(),
        report.duration.as_secs_f64() * 1000.0
    );

    Ok(())
}
