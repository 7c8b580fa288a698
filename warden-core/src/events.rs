//! Collection and control events with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Events emitted by collection passes and limit mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WardenEvent {
    /// A collection pass joined all of its group tasks
    PassCompleted {
        /// Groups enumerated in the pass
        groups: usize,
        /// Groups whose usage snapshot failed
        failed_snapshots: usize,
        /// Wall-clock time of the pass
        #[serde(with = "duration_serde")]
        duration: Duration,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Reading one group's usage failed; other groups are unaffected
    SnapshotFailed {
        /// Group path
        group: String,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// A group disappeared and its cached process history was dropped
    GroupPruned {
        /// Group path
        group: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// A limit mutation was applied
    LimitApplied {
        /// Unit or group the limit was applied to
        target: String,
        /// Property name
        property: String,
        /// Value asked for
        requested: String,
        /// Value actually written
        effective: String,
        /// Whether the value was clamped
        fallback: bool,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },
}

impl WardenEvent {
    /// Get the group or unit the event concerns, if any
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::PassCompleted { .. } => None,
            Self::SnapshotFailed { group, .. } | Self::GroupPruned { group, .. } => Some(group),
            Self::LimitApplied { target, .. } => Some(target),
        }
    }

    /// Get the timestamp from any event
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        match self {
            Self::PassCompleted { timestamp, .. }
            | Self::SnapshotFailed { timestamp, .. }
            | Self::GroupPruned { timestamp, .. }
            | Self::LimitApplied { timestamp, .. } => *timestamp,
        }
    }

    /// Check if this event deserves operator attention
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::SnapshotFailed { .. } | Self::LimitApplied { fallback: true, .. }
        )
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::PassCompleted {
                groups,
                failed_snapshots,
                duration,
                ..
            } => {
                tracing::info!(
                    groups,
                    failed_snapshots,
                    duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    event = "pass_completed",
                    "Collection pass completed"
                );
            }
            Self::SnapshotFailed { group, message, .. } => {
                tracing::warn!(
                    group = %group,
                    message = %message,
                    event = "snapshot_failed",
                    "Group snapshot failed"
                );
            }
            Self::GroupPruned { group, .. } => {
                tracing::debug!(group = %group, event = "group_pruned", "Group pruned");
            }
            Self::LimitApplied {
                target,
                property,
                requested,
                effective,
                fallback,
                ..
            } => {
                if *fallback {
                    tracing::warn!(
                        target_unit = %target,
                        property = %property,
                        requested = %requested,
                        effective = %effective,
                        event = "limit_applied",
                        "Limit clamped above live usage"
                    );
                } else {
                    tracing::info!(
                        target_unit = %target,
                        property = %property,
                        effective = %effective,
                        event = "limit_applied",
                        "Limit applied"
                    );
                }
            }
        }
    }
}

impl fmt::Display for WardenEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PassCompleted {
                groups, duration, ..
            } => write!(f, "Pass over {groups} groups completed in {duration:?}"),
            Self::SnapshotFailed { group, message, .. } => {
                write!(f, "Snapshot of {group} failed: {message}")
            }
            Self::GroupPruned { group, .. } => write!(f, "Group {group} pruned"),
            Self::LimitApplied {
                target,
                property,
                effective,
                fallback,
                ..
            } => {
                write!(f, "{property}={effective} applied to {target}")?;
                if *fallback {
                    f.write_str(" (clamped)")?;
                }
                Ok(())
            }
        }
    }
}

// Custom Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Custom SystemTime serialization
mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(since_epoch.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_subject() {
        let event = WardenEvent::GroupPruned {
            group: "/user.slice/user-1000.slice".to_string(),
            timestamp: SystemTime::now(),
        };
        assert_eq!(event.subject(), Some("/user.slice/user-1000.slice"));

        let event = WardenEvent::PassCompleted {
            groups: 3,
            failed_snapshots: 0,
            duration: Duration::from_millis(12),
            timestamp: SystemTime::now(),
        };
        assert_eq!(event.subject(), None);
    }

    #[test]
    fn test_event_critical() {
        let clamped = WardenEvent::LimitApplied {
            target: "user-1000.slice".to_string(),
            property: "MemoryMax".to_string(),
            requested: "1024".to_string(),
            effective: "4096".to_string(),
            fallback: true,
            timestamp: SystemTime::now(),
        };
        assert!(clamped.is_critical());
        assert!(clamped.to_string().ends_with("(clamped)"));

        let pruned = WardenEvent::GroupPruned {
            group: "/user.slice/user-1.slice".to_string(),
            timestamp: SystemTime::now(),
        };
        assert!(!pruned.is_critical());
    }

    #[test]
    fn test_event_serde() {
        let event = WardenEvent::SnapshotFailed {
            group: "/user.slice/user-7.slice".to_string(),
            message: "gone".to_string(),
            timestamp: SystemTime::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"snapshot_failed\""));
        let deserialized: WardenEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.subject(), deserialized.subject());
    }
}
