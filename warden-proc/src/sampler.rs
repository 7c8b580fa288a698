//! Per-command aggregation of a group's processes

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};
use warden_core::{ProcessAggregate, ProcessId, ProcessSample};

use crate::cache::ProcessCache;
use crate::reader::ProcessReader;

/// Samples processes and folds them into a [`ProcessCache`]
///
/// Cloning shares the reader and the cache, so one sampler can be handed
/// to every per-group task of a collection pass.
#[derive(Clone)]
pub struct ProcessSampler {
    reader: Arc<dyn ProcessReader>,
    cache: Arc<ProcessCache>,
}

impl ProcessSampler {
    /// Create a sampler with an empty cache
    pub fn new(reader: Arc<dyn ProcessReader>) -> Self {
        Self::with_cache(reader, Arc::new(ProcessCache::new()))
    }

    /// Create a sampler over an existing cache
    pub fn with_cache(reader: Arc<dyn ProcessReader>, cache: Arc<ProcessCache>) -> Self {
        Self { reader, cache }
    }

    /// Get the cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ProcessCache> {
        &self.cache
    }

    /// Sample `pids` and return per-command totals for `group`
    ///
    /// PIDs are read concurrently; ones that cannot be read are left out
    /// of this pass.
    pub async fn aggregate(
        &self,
        group: &str,
        pids: &BTreeSet<ProcessId>,
    ) -> Vec<ProcessAggregate> {
        let mut reads = JoinSet::new();
        for &pid in pids {
            let reader = Arc::clone(&self.reader);
            reads.spawn(async move { (pid, reader.read(pid).await) });
        }

        let mut fresh = Vec::with_capacity(pids.len());
        while let Some(joined) = reads.join_next().await {
            match joined {
                Ok((pid, Ok(stat))) => fresh.push(ProcessSample {
                    pid,
                    command: stat.command,
                    cpu_seconds: stat.cpu_seconds,
                    memory_bytes: stat.memory_bytes,
                    live: true,
                }),
                Ok((pid, Err(e))) => {
                    trace!(group = %group, pid = %pid, error = %e, "Skipping process");
                }
                Err(e) => warn!(group = %group, error = %e, "Process read task failed"),
            }
        }

        let entry = self.cache.entry(group).await;
        let mut entry = entry.lock().await;
        entry.merge(fresh);
        let aggregates = entry.aggregate();

        debug!(
            group = %group,
            commands = aggregates.len(),
            cached = entry.len(),
            "Aggregated processes"
        );
        aggregates
    }

    /// Forget every group not in `current`
    ///
    /// Must only run after all aggregation of the pass has joined.
    pub async fn tidy(&self, current: &HashSet<String>) -> Vec<String> {
        self.cache.tidy(current).await
    }
}
