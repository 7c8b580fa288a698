//! Per-group process history

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use warden_core::{ProcessAggregate, ProcessId, ProcessSample};

/// Cached processes of one group
///
/// Exited processes stay cached while any live process still runs the same
/// command, so a command's CPU total keeps counting time spent by PIDs that
/// are gone.
#[derive(Debug, Default)]
pub struct GroupCache {
    samples: HashMap<ProcessId, ProcessSample>,
    // last reported CPU total per command
    high_water: HashMap<String, f64>,
}

impl GroupCache {
    /// Merge fresh samples, replacing any prior sample of the same PID and
    /// marking it live
    pub fn merge(&mut self, fresh: impl IntoIterator<Item = ProcessSample>) {
        for mut sample in fresh {
            sample.live = true;
            self.samples.insert(sample.pid, sample);
        }
    }

    /// Prune commands with no live process, aggregate the rest by command,
    /// then consume the live flags
    ///
    /// Output is sorted by command name.
    pub fn aggregate(&mut self) -> Vec<ProcessAggregate> {
        let active: HashSet<String> = self
            .samples
            .values()
            .filter(|s| s.live)
            .map(|s| s.command.clone())
            .collect();

        self.samples.retain(|_, s| active.contains(&s.command));
        self.high_water.retain(|command, _| active.contains(command));

        let mut totals: BTreeMap<&str, ProcessAggregate> = BTreeMap::new();
        for sample in self.samples.values() {
            let entry = totals
                .entry(sample.command.as_str())
                .or_insert_with(|| ProcessAggregate {
                    command: sample.command.clone(),
                    cpu_seconds_total: 0.0,
                    memory_bytes_total: 0,
                    count: 0,
                });

            entry.cpu_seconds_total += sample.cpu_seconds;
            if sample.live {
                entry.memory_bytes_total += sample.memory_bytes;
                entry.count += 1;
            }
        }

        let mut aggregates: Vec<ProcessAggregate> = totals.into_values().collect();
        for aggregate in &mut aggregates {
            let mark = self
                .high_water
                .entry(aggregate.command.clone())
                .or_insert(0.0);
            if aggregate.cpu_seconds_total < *mark {
                aggregate.cpu_seconds_total = *mark;
            }
            *mark = aggregate.cpu_seconds_total;
        }

        for sample in self.samples.values_mut() {
            sample.live = false;
        }

        aggregates
    }

    /// Number of cached processes, live or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether a PID is cached
    #[must_use]
    pub fn contains(&self, pid: ProcessId) -> bool {
        self.samples.contains_key(&pid)
    }
}

/// Process history for every group, owned by a collector
///
/// The outer map lock is held only to find or create an entry; each
/// group's entry has its own lock so groups are processed independently.
#[derive(Debug, Default)]
pub struct ProcessCache {
    groups: Mutex<HashMap<String, Arc<Mutex<GroupCache>>>>,
}

impl ProcessCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for `group`, creating it if absent
    pub async fn entry(&self, group: &str) -> Arc<Mutex<GroupCache>> {
        let mut groups = self.groups.lock().await;
        Arc::clone(groups.entry(group.to_string()).or_default())
    }

    /// Drop every group not in `current`, returning the removed names
    pub async fn tidy(&self, current: &HashSet<String>) -> Vec<String> {
        let mut groups = self.groups.lock().await;
        let stale: Vec<String> = groups
            .keys()
            .filter(|name| !current.contains(*name))
            .cloned()
            .collect();

        for name in &stale {
            groups.remove(name);
        }
        stale
    }

    /// Number of groups with an entry
    pub async fn group_count(&self) -> usize {
        self.groups.lock().await.len()
    }

    /// Number of cached processes for `group`, if it has an entry
    pub async fn process_count(&self, group: &str) -> Option<usize> {
        let entry = self.groups.lock().await.get(group).cloned()?;
        let count = entry.lock().await.len();
        Some(count)
    }
}
