//! Warden Core - shared types, configuration, and identity resolution
//!
//! This crate provides the value objects and error taxonomy used by the
//! collection and control paths of Warden.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod resources;
pub mod types;

pub use config::{ModeSetting, WardenConfig};
pub use error::{Error, Result};
pub use events::WardenEvent;
pub use identity::{IdentityResolver, StaticIdentity, SystemIdentity};
pub use resources::{
    Ceiling, CpuQuota, MemorySize, ProcessAggregate, ProcessSample, UsageSnapshot,
};
pub use types::{GroupHandle, HierarchyMode, ProcessId, UserSlice};
