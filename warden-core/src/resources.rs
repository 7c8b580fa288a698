//! Resource value objects with compile-time unit safety

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Sub};

use crate::ProcessId;

/// Microseconds per second
pub const USEC_PER_SEC: u64 = 1_000_000;

/// Nanoseconds per second
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Memory size value object with compile-time unit safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[repr(transparent)]
#[serde(transparent)]
pub struct MemorySize(u64); // bytes

impl MemorySize {
    /// Create from bytes
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from kilobytes
    #[must_use]
    pub const fn from_kb(kb: u64) -> Self {
        Self(kb.saturating_mul(1024))
    }

    /// Create from megabytes
    #[must_use]
    pub const fn from_mb(mb: u64) -> Self {
        Self(mb.saturating_mul(1024).saturating_mul(1024))
    }

    /// Get value in bytes
    #[must_use]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Get value in megabytes
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_mb(self) -> f64 {
        self.0 as f64 / (1024.0 * 1024.0)
    }

    /// Get value in gigabytes
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_gb(self) -> f64 {
        self.0 as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

impl Add for MemorySize {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for MemorySize {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GB: u64 = 1024 * 1024 * 1024;
        const MB: u64 = 1024 * 1024;

        if self.0 >= GB {
            write!(f, "{:.2} GB", self.as_gb())
        } else if self.0 >= MB {
            write!(f, "{:.2} MB", self.as_mb())
        } else {
            write!(f, "{} bytes", self.0)
        }
    }
}

/// A memory ceiling that may be removed entirely
///
/// Crosses every external boundary as a signed byte count where `-1`
/// means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ceiling {
    /// Limited to this many bytes
    Bytes(u64),
    /// No ceiling
    Unbounded,
}

impl Ceiling {
    /// The page-aligned `LONG_MAX` that cgroup v1 reports for an unset limit
    pub const LEGACY_UNLIMITED: u64 = 9_223_372_036_854_771_712;

    /// Interpret a signed request value; `-1` removes the ceiling
    ///
    /// Returns `None` for any other negative value.
    #[must_use]
    pub fn from_request(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Self::Unbounded),
            v if v >= 0 => u64::try_from(v).ok().map(Self::Bytes),
            _ => None,
        }
    }

    /// Interpret a byte count read from a legacy limit file
    #[must_use]
    pub const fn from_legacy_bytes(bytes: u64) -> Self {
        if bytes >= Self::LEGACY_UNLIMITED {
            Self::Unbounded
        } else {
            Self::Bytes(bytes)
        }
    }

    /// Byte limit, or `None` when unbounded
    #[must_use]
    pub const fn as_bytes(self) -> Option<u64> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Unbounded => None,
        }
    }

    /// Whether the ceiling has been removed
    #[must_use]
    pub const fn is_unbounded(self) -> bool {
        matches!(self, Self::Unbounded)
    }

    /// Signed wire representation
    #[must_use]
    pub fn to_i64(self) -> i64 {
        match self {
            Self::Bytes(bytes) => i64::try_from(bytes).unwrap_or(-1),
            Self::Unbounded => -1,
        }
    }
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "{}", MemorySize::from_bytes(*bytes)),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl Serialize for Ceiling {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_i64())
    }
}

impl<'de> Deserialize<'de> for Ceiling {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Self::from_request(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid ceiling {value}")))
    }
}

/// CPU quota normalized to allowed microseconds of CPU per wall-clock second
///
/// 1 000 000 is one full core. An unconstrained quota is reported as
/// [`CpuQuota::UNCONSTRAINED`] so numeric consumers can still graph it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct CpuQuota(u64);

impl CpuQuota {
    /// Sentinel for "no quota"
    pub const UNCONSTRAINED: Self = Self(u64::MAX);

    /// Create from microseconds per second
    #[must_use]
    pub const fn from_usec_per_sec(usec: u64) -> Self {
        Self(usec)
    }

    /// Normalize a scheduler quota/period pair (both microseconds)
    ///
    /// A non-positive quota or a zero period means unconstrained.
    #[must_use]
    pub fn from_quota_period(quota_usec: i64, period_usec: u64) -> Self {
        let Ok(quota) = u64::try_from(quota_usec) else {
            return Self::UNCONSTRAINED;
        };
        if quota == 0 || period_usec == 0 {
            return Self::UNCONSTRAINED;
        }

        let per_sec = u128::from(quota) * u128::from(USEC_PER_SEC) / u128::from(period_usec);
        u64::try_from(per_sec).map_or(Self::UNCONSTRAINED, Self)
    }

    /// Get microseconds per second
    #[must_use]
    pub const fn as_usec_per_sec(self) -> u64 {
        self.0
    }

    /// Whether no quota applies
    #[must_use]
    pub const fn is_unconstrained(self) -> bool {
        self.0 == u64::MAX
    }

    /// Quota expressed as a number of cores
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_cores(self) -> Option<f64> {
        if self.is_unconstrained() {
            None
        } else {
            Some(self.0 as f64 / USEC_PER_SEC as f64)
        }
    }
}

impl fmt::Display for CpuQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_cores() {
            Some(cores) => write!(f, "{cores:.2} cores"),
            None => f.write_str("unconstrained"),
        }
    }
}

/// Usage and quota of one group, rebuilt every collection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Cumulative CPU time consumed by the group
    pub cpu_seconds_total: f64,

    /// CPU quota, microseconds per wall-clock second
    pub cpu_quota_per_second: CpuQuota,

    /// Resident memory usage
    pub memory_usage_bytes: MemorySize,

    /// Configured memory ceiling
    pub memory_ceiling_bytes: Ceiling,

    /// Owner of the group
    pub owner_username: String,
}

/// Last observed state of one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    /// Process id
    pub pid: ProcessId,

    /// Command name (`comm`)
    pub command: String,

    /// Cumulative user + system CPU time
    pub cpu_seconds: f64,

    /// Resident memory
    pub memory_bytes: u64,

    /// Observed in the current pass
    pub live: bool,
}

/// Per-command totals for one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessAggregate {
    /// Command name
    pub command: String,

    /// CPU time of every process of this command seen while the command
    /// stayed active, including ones that have exited
    pub cpu_seconds_total: f64,

    /// Resident memory of live processes
    pub memory_bytes_total: u64,

    /// Number of live processes
    pub count: u64,
}
