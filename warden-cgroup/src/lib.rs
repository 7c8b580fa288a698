//! Resource-control group access over both kernel ABIs
//!
//! This crate provides a trait-based abstraction over cgroup v1 and v2 for
//! per-user usage collection and memory ceilings, including production and
//! mock implementations, plus the collection pass built on top of it.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod accessor;
pub mod collector;
mod common;
pub mod hierarchy;
pub mod legacy;
pub mod monitor;
pub mod unified;

pub use accessor::{clamp, clamp_swap, test_snapshot, AppliedLimit, GroupAccessor, GroupMap, MockAccessor};
pub use collector::{GroupUsage, UsageCollector, UsageReport};
pub use hierarchy::{detect_mode, HierarchyProvider};
pub use legacy::LegacyAccessor;
pub use monitor::UsageMonitor;
pub use unified::UnifiedAccessor;

// Re-export commonly used types
pub use warden_core::{Ceiling, GroupHandle, HierarchyMode, UsageSnapshot};
