//! Validating, routing and reporting limit mutations

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use warden_cgroup::{clamp, GroupAccessor};
use warden_core::{Error, GroupHandle, IdentityResolver, UserSlice, WardenConfig, WardenEvent};

use crate::channel::UnitPropertyChannel;
use crate::property::{PropertyName, RawValue, TypedValue};

/// A failed mutation, split by who is at fault
#[derive(Debug, Error)]
pub enum ControlError {
    /// The request was invalid; nothing was sent to a backend
    #[error("invalid request: {0}")]
    Input(Error),

    /// The request was valid but applying it failed
    #[error("backend failure: {0}")]
    Backend(Error),
}

impl ControlError {
    /// The underlying error
    #[must_use]
    pub const fn inner(&self) -> &Error {
        match self {
            Self::Input(e) | Self::Backend(e) => e,
        }
    }
}

impl From<Error> for ControlError {
    fn from(err: Error) -> Self {
        if err.is_input_error() {
            Self::Input(err)
        } else {
            Self::Backend(err)
        }
    }
}

/// One mutation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitRequest {
    /// Unit name (`user-1000.slice`) or group path
    #[serde(default)]
    pub unit: Option<String>,
    /// Owner of the unit
    #[serde(default)]
    pub username: Option<String>,
    /// Property name
    pub property: String,
    /// Requested value
    pub value: RawValue,
    /// Do not persist the change across reboots
    #[serde(default)]
    pub runtime: bool,
}

/// What was actually applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitResult {
    /// Unit the property was set on
    pub unit: String,
    /// Owner of the unit
    pub username: String,
    /// Property name
    pub property: String,
    /// Value written, which may exceed the request after clamping
    pub effective_value: TypedValue,
    /// Whether the value was clamped
    pub fallback_applied: bool,
}

/// A resolved unit and its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Unit name
    pub unit: String,
    /// Group path of the unit
    pub group: GroupHandle,
    /// Owner
    pub username: String,
}

/// Applies limit requests
///
/// Memory ceilings (`MemoryMax`, `MemoryHigh`, `MemorySwapMax`) on legacy
/// hosts are written straight to the hierarchy; every other request goes to
/// the unit manager.
pub struct LimitController {
    accessor: Arc<dyn GroupAccessor>,
    channel: Arc<dyn UnitPropertyChannel>,
    identity: Arc<dyn IdentityResolver>,
    root_group: String,
    margin: u64,
    swap_ratio: f64,
    event_tx: Option<mpsc::Sender<WardenEvent>>,
}

impl LimitController {
    /// Create a controller
    #[must_use]
    pub fn new(
        config: &WardenConfig,
        accessor: Arc<dyn GroupAccessor>,
        channel: Arc<dyn UnitPropertyChannel>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            accessor,
            channel,
            identity,
            root_group: config.root_group.clone(),
            margin: config.memory_margin_bytes,
            swap_ratio: config.swap_ratio,
            event_tx: None,
        }
    }

    /// Add event channel for emitting events
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::Sender<WardenEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Validate, route and apply one request
    ///
    /// # Errors
    /// [`ControlError::Input`] for unsupported properties, mistyped values
    /// and bad or mismatched targets; [`ControlError::Backend`] when the
    /// write itself fails
    pub async fn apply_limit(&self, request: &LimitRequest) -> Result<LimitResult, ControlError> {
        let property: PropertyName = request.property.parse()?;
        let requested = property.typed(&request.value)?;
        let target = self.resolve_target(request.unit.as_deref(), request.username.as_deref())?;

        let (effective, fallback) = if property.is_legacy_memory_ceiling()
            && self.accessor.mode().is_legacy()
        {
            self.apply_legacy_memory(&target, property, requested).await?
        } else {
            self.apply_unit_property(&target, property, requested, request.runtime)
                .await?
        };

        let result = LimitResult {
            unit: target.unit,
            username: target.username,
            property: property.as_str().to_string(),
            effective_value: effective,
            fallback_applied: fallback,
        };

        let event = WardenEvent::LimitApplied {
            target: result.unit.clone(),
            property: result.property.clone(),
            requested: requested.to_string(),
            effective: effective.to_string(),
            fallback,
            timestamp: SystemTime::now(),
        };
        event.emit_trace();
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event).await;
        }

        Ok(result)
    }

    async fn apply_legacy_memory(
        &self,
        target: &Target,
        property: PropertyName,
        requested: TypedValue,
    ) -> warden_core::Result<(TypedValue, bool)> {
        let ceiling = requested.as_ceiling().ok_or_else(|| Error::TypeMismatch {
            property: property.as_str().to_string(),
            expected: "integer",
        })?;

        debug!(group = %target.group, property = %property, "Routing memory ceiling to hierarchy");
        let group = &target.group;
        let applied = match property {
            PropertyName::MemorySwapMax => self.accessor.set_swap_limit(group, ceiling).await?,
            PropertyName::MemoryHigh => self.accessor.set_soft_limit(group, ceiling).await?,
            _ => self.accessor.set_memory_limits(group, ceiling).await?,
        };
        Ok((TypedValue::from_ceiling(applied.effective), applied.fallback))
    }

    async fn apply_unit_property(
        &self,
        target: &Target,
        property: PropertyName,
        requested: TypedValue,
        runtime: bool,
    ) -> warden_core::Result<(TypedValue, bool)> {
        let (effective, fallback) = match requested {
            TypedValue::Unsigned(bytes) if property.is_clamped() => {
                let usage = self.accessor.memory_usage(&target.group).await?;
                let applied = clamp(warden_core::Ceiling::Bytes(bytes), usage, self.margin);
                (TypedValue::from_ceiling(applied.effective), applied.fallback)
            }
            _ => (requested, false),
        };

        let mut properties = vec![(property, effective)];
        if property == PropertyName::MemoryMax {
            properties.push((PropertyName::MemorySwapMax, self.swap_for(effective)));
        }

        if fallback {
            warn!(
                unit = %target.unit,
                property = %property,
                requested = %requested,
                effective = %effective,
                "Request below live usage, clamping"
            );
        }

        self.channel
            .set_properties(&target.unit, runtime, &properties)
            .await?;
        Ok((effective, fallback))
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn swap_for(&self, memory: TypedValue) -> TypedValue {
        match memory {
            TypedValue::Unsigned(bytes) => {
                TypedValue::Unsigned((bytes as f64 * self.swap_ratio) as u64)
            }
            other => other,
        }
    }

    /// Resolve a unit and/or username to a full target
    ///
    /// When both are given they must name the same user.
    ///
    /// # Errors
    /// [`Error::MissingTarget`] if neither is given,
    /// [`Error::IdentityMismatch`] if they disagree,
    /// [`Error::MalformedTarget`] if the unit encodes no uid, or the
    /// identity lookup error
    pub fn resolve_target(
        &self,
        unit: Option<&str>,
        username: Option<&str>,
    ) -> warden_core::Result<Target> {
        match (unit, username) {
            (None, None) => Err(Error::MissingTarget),
            (Some(unit), given) => {
                let group = self.group_for_unit(unit)?;
                let owner = self.identity.username_for_group(group.as_str())?;

                if let Some(given) = given {
                    if given != owner {
                        return Err(Error::IdentityMismatch {
                            group: unit.to_string(),
                            username: given.to_string(),
                        });
                    }
                }

                Ok(Target {
                    unit: group.unit_name().to_string(),
                    group,
                    username: owner,
                })
            }
            (None, Some(username)) => {
                let slice = self.identity.slice_for_username(username)?;
                let unit = slice.to_string();
                Ok(Target {
                    group: self.group_for_unit(&unit)?,
                    unit,
                    username: username.to_string(),
                })
            }
        }
    }

    fn group_for_unit(&self, unit: &str) -> warden_core::Result<GroupHandle> {
        let path = if unit.starts_with('/') {
            unit.to_string()
        } else {
            format!("{}/{unit}", self.root_group.trim_end_matches('/'))
        };

        let group = GroupHandle::new(path, self.accessor.mode())?;
        if group.unit_name().parse::<UserSlice>().is_err() {
            return Err(Error::MalformedTarget {
                message: format!("'{unit}' is not a per-user slice"),
            });
        }
        Ok(group)
    }
}

impl std::fmt::Debug for LimitController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimitController")
            .field("mode", &self.accessor.mode())
            .field("root_group", &self.root_group)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;
    use warden_cgroup::MockAccessor;
    use warden_core::{HierarchyMode, StaticIdentity};

    fn controller() -> LimitController {
        LimitController::new(
            &WardenConfig::default(),
            Arc::new(MockAccessor::new(HierarchyMode::Unified)),
            Arc::new(RecordingChannel::new()),
            Arc::new(StaticIdentity::new().with_user(0, "root").with_user(1000, "alice")),
        )
    }

    #[test]
    fn resolve_by_unit_username_or_both() {
        let c = controller();
        let expected = Target {
            unit: "user-0.slice".to_string(),
            group: GroupHandle::new("/user.slice/user-0.slice", HierarchyMode::Unified).unwrap(),
            username: "root".to_string(),
        };

        assert_eq!(c.resolve_target(Some("user-0.slice"), None).unwrap(), expected);
        assert_eq!(c.resolve_target(None, Some("root")).unwrap(), expected);
        assert_eq!(
            c.resolve_target(Some("user-0.slice"), Some("root")).unwrap(),
            expected
        );
        assert_eq!(
            c.resolve_target(Some("/user.slice/user-0.slice"), None).unwrap(),
            expected
        );
    }

    #[test]
    fn resolve_rejects_bad_targets() {
        let c = controller();
        assert!(matches!(c.resolve_target(None, None), Err(Error::MissingTarget)));
        assert!(matches!(
            c.resolve_target(Some("user-0.slice"), Some("alice")),
            Err(Error::IdentityMismatch { .. })
        ));
        assert!(matches!(
            c.resolve_target(Some("system.slice"), None),
            Err(Error::MalformedTarget { .. })
        ));
        assert!(matches!(
            c.resolve_target(Some("../user-0.slice"), None),
            Err(Error::MalformedTarget { .. })
        ));
    }

    #[test]
    fn control_error_classification() {
        assert!(matches!(
            ControlError::from(Error::MissingTarget),
            ControlError::Input(_)
        ));
        assert!(matches!(
            ControlError::from(Error::cgroup("write failed")),
            ControlError::Backend(_)
        ));
    }

    #[test]
    fn request_deserializes_from_json() {
        let request: LimitRequest = serde_json::from_str(
            r#"{"unit":"user-1000.slice","property":"MemoryMax","value":-1}"#,
        )
        .unwrap();
        assert_eq!(request.value, RawValue::Integer(-1));
        assert!(!request.runtime);
        assert_eq!(request.username, None);
    }
}
