//! Process table sampling and per-command aggregation
//!
//! This crate turns the live PID set of a group into per-command totals
//! that survive process churn:
//! - [`ProcessReader`] - reads command, CPU time and resident memory of one PID
//! - [`ProcessCache`] - per-group history of observed processes
//! - [`ProcessSampler`] - merges fresh samples into the cache and aggregates

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod cache;
pub mod reader;
pub mod sampler;

pub use cache::{GroupCache, ProcessCache};
pub use reader::{MockProcessReader, ProcessReader, ProcessStat, ProcfsReader};
pub use sampler::ProcessSampler;
