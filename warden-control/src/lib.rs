//! Limit mutation for per-user units
//!
//! This crate validates limit requests against a property whitelist, resolves
//! the target unit and owner, and routes each request either to the
//! hierarchy accessor or to the service manager over D-Bus.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod channel;
pub mod controller;
pub mod property;

pub use channel::{RecordedCall, RecordingChannel, SystemdChannel, UnitPropertyChannel};
pub use controller::{ControlError, LimitController, LimitRequest, LimitResult, Target};
pub use property::{PropertyKind, PropertyName, RawValue, TypedValue};
