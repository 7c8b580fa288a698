//! One collection pass over every group below a root

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::warn;
use warden_core::{GroupHandle, ProcessAggregate, ProcessId, Result, UsageSnapshot, WardenEvent};
use warden_proc::ProcessSampler;

use crate::accessor::GroupAccessor;

/// Usage of one group from one pass
#[derive(Debug)]
pub struct GroupUsage {
    /// The group
    pub group: GroupHandle,
    /// Usage snapshot, or why it could not be read
    pub snapshot: Result<UsageSnapshot>,
    /// Per-command process totals, sorted by command
    pub processes: Vec<ProcessAggregate>,
}

/// Result of one collection pass
#[derive(Debug)]
pub struct UsageReport {
    /// Every enumerated group, sorted by path
    pub groups: Vec<GroupUsage>,
    /// Groups whose cached history was dropped after this pass
    pub pruned: Vec<String>,
    /// Wall-clock time of the pass
    pub duration: Duration,
}

impl UsageReport {
    /// Number of groups whose snapshot failed
    #[must_use]
    pub fn failed_snapshots(&self) -> usize {
        self.groups.iter().filter(|g| g.snapshot.is_err()).count()
    }
}

/// Runs collection passes; owns the process history through its sampler
#[derive(Clone)]
pub struct UsageCollector {
    accessor: Arc<dyn GroupAccessor>,
    sampler: ProcessSampler,
    event_tx: Option<mpsc::Sender<WardenEvent>>,
}

impl UsageCollector {
    /// Create a collector
    pub fn new(accessor: Arc<dyn GroupAccessor>, sampler: ProcessSampler) -> Self {
        Self {
            accessor,
            sampler,
            event_tx: None,
        }
    }

    /// Add event channel for emitting events
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::Sender<WardenEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Get the sampler
    #[must_use]
    pub const fn sampler(&self) -> &ProcessSampler {
        &self.sampler
    }

    /// Enumerate groups below `root`, snapshot and aggregate each one
    /// concurrently, then drop history of groups no longer present
    ///
    /// A failed snapshot is reported in that group's entry only.
    ///
    /// # Errors
    /// Returns error only if enumeration itself fails
    pub async fn collect_usage(&self, root: &str) -> Result<UsageReport> {
        let started = Instant::now();
        let groups = self.accessor.enumerate(root).await?;

        let mut tasks = JoinSet::new();
        for (group, pids) in groups {
            let accessor = Arc::clone(&self.accessor);
            let sampler = self.sampler.clone();
            tasks.spawn(collect_group(accessor, sampler, group, pids));
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(usage) => results.push(usage),
                Err(e) => warn!(error = %e, "Group task failed"),
            }
        }
        results.sort_by(|a, b| a.group.as_str().cmp(b.group.as_str()));

        // strictly after the join
        let current: HashSet<String> = results.iter().map(|u| u.group.to_string()).collect();
        let pruned = self.sampler.tidy(&current).await;

        let report = UsageReport {
            groups: results,
            pruned,
            duration: started.elapsed(),
        };
        self.emit_pass(&report).await;
        Ok(report)
    }

    async fn emit_pass(&self, report: &UsageReport) {
        let now = SystemTime::now();

        for usage in &report.groups {
            if let Err(e) = &usage.snapshot {
                self.emit(WardenEvent::SnapshotFailed {
                    group: usage.group.to_string(),
                    message: e.to_string(),
                    timestamp: now,
                })
                .await;
            }
        }

        for group in &report.pruned {
            self.emit(WardenEvent::GroupPruned {
                group: group.clone(),
                timestamp: now,
            })
            .await;
        }

        self.emit(WardenEvent::PassCompleted {
            groups: report.groups.len(),
            failed_snapshots: report.failed_snapshots(),
            duration: report.duration,
            timestamp: now,
        })
        .await;
    }

    async fn emit(&self, event: WardenEvent) {
        event.emit_trace();
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

async fn collect_group(
    accessor: Arc<dyn GroupAccessor>,
    sampler: ProcessSampler,
    group: GroupHandle,
    pids: BTreeSet<ProcessId>,
) -> GroupUsage {
    let snapshot = accessor.snapshot(&group).await;
    let processes = sampler.aggregate(group.as_str(), &pids).await;
    GroupUsage {
        group,
        snapshot,
        processes,
    }
}

impl std::fmt::Debug for UsageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageCollector")
            .field("mode", &self.accessor.mode())
            .finish_non_exhaustive()
    }
}
