//! Process table readers

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::trace;
use warden_core::{Error, ProcessId, Result};

/// Point-in-time state of one process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStat {
    /// Command name (`comm`)
    pub command: String,
    /// Cumulative user + system CPU time in seconds
    pub cpu_seconds: f64,
    /// Resident set size in bytes
    pub memory_bytes: u64,
}

/// Reads the state of a single process
///
/// A read error usually means the process exited between enumeration and
/// sampling; callers skip the PID.
#[async_trait]
pub trait ProcessReader: Send + Sync {
    /// Read command name, CPU time and resident memory of `pid`
    async fn read(&self, pid: ProcessId) -> Result<ProcessStat>;
}

/// Reader backed by a procfs mount
#[derive(Debug, Clone)]
pub struct ProcfsReader {
    root: PathBuf,
    clock_ticks: f64,
    page_size: u64,
}

impl ProcfsReader {
    /// Create a reader for the procfs mounted at `root`, using the host's
    /// clock tick rate and page size
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_params(root, host_clock_ticks(), host_page_size())
    }

    /// Create a reader with explicit tick rate and page size
    #[must_use]
    pub fn with_params(root: impl Into<PathBuf>, clock_ticks: f64, page_size: u64) -> Self {
        Self {
            root: root.into(),
            clock_ticks,
            page_size,
        }
    }

    /// Get the procfs root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse the contents of `/proc/<pid>/stat` into CPU seconds and RSS bytes
    ///
    /// The command field may itself contain spaces and parentheses, so
    /// fields are counted from the last `)`.
    fn parse_stat(&self, content: &str) -> Option<(f64, u64)> {
        let close = content.rfind(')')?;
        // fields after the command start at `state` (field 3)
        let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();

        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        let rss_pages: i64 = fields.get(21)?.parse().ok()?;

        #[allow(clippy::cast_precision_loss)]
        let cpu_seconds = (utime + stime) as f64 / self.clock_ticks;
        let memory_bytes = u64::try_from(rss_pages)
            .unwrap_or(0)
            .saturating_mul(self.page_size);

        Some((cpu_seconds, memory_bytes))
    }
}

#[async_trait]
impl ProcessReader for ProcfsReader {
    async fn read(&self, pid: ProcessId) -> Result<ProcessStat> {
        let dir = self.root.join(pid.to_string());

        let command = fs::read_to_string(dir.join("comm"))
            .await
            .map_err(|e| Error::process(format!("read comm of {pid}: {e}")))?
            .trim_end()
            .to_string();

        let stat = fs::read_to_string(dir.join("stat"))
            .await
            .map_err(|e| Error::process(format!("read stat of {pid}: {e}")))?;

        let (cpu_seconds, memory_bytes) = self
            .parse_stat(&stat)
            .ok_or_else(|| Error::process(format!("malformed stat for {pid}")))?;

        trace!(pid = %pid, command = %command, cpu_seconds, memory_bytes, "Read process");

        Ok(ProcessStat {
            command,
            cpu_seconds,
            memory_bytes,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn host_clock_ticks() -> f64 {
    // SAFETY: sysconf has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as f64 } else { 100.0 }
}

fn host_page_size() -> u64 {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|s| *s > 0).unwrap_or(4096)
}

/// In-memory process table for tests
#[derive(Clone, Default)]
pub struct MockProcessReader {
    table: Arc<Mutex<HashMap<ProcessId, ProcessStat>>>,
}

impl MockProcessReader {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a process
    pub async fn set(&self, pid: i32, command: &str, cpu_seconds: f64, memory_bytes: u64) {
        self.table.lock().await.insert(
            ProcessId::from_raw(pid),
            ProcessStat {
                command: command.to_string(),
                cpu_seconds,
                memory_bytes,
            },
        );
    }

    /// Remove a process, as if it exited
    pub async fn exit(&self, pid: i32) {
        self.table.lock().await.remove(&ProcessId::from_raw(pid));
    }
}

#[async_trait]
impl ProcessReader for MockProcessReader {
    async fn read(&self, pid: ProcessId) -> Result<ProcessStat> {
        self.table
            .lock()
            .await
            .get(&pid)
            .cloned()
            .ok_or_else(|| Error::process(format!("no such process {pid}")))
    }
}
