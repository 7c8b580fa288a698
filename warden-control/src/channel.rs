//! Unit-property mutation through the service manager

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;
use warden_core::{Error, Result};
use zbus::zvariant::Value;

use crate::property::{PropertyName, TypedValue};

/// Sets properties on a systemd unit
///
/// Every property in one call is applied atomically by the manager.
#[async_trait]
pub trait UnitPropertyChannel: Send + Sync {
    /// Set `properties` on `unit`; `runtime` changes do not survive reboot
    async fn set_properties(
        &self,
        unit: &str,
        runtime: bool,
        properties: &[(PropertyName, TypedValue)],
    ) -> Result<()>;
}

/// Channel over the system bus to `org.freedesktop.systemd1`
///
/// The bus is connected on first use.
#[derive(Debug, Default)]
pub struct SystemdChannel {
    connection: OnceCell<zbus::Connection>,
}

impl SystemdChannel {
    const DESTINATION: &'static str = "org.freedesktop.systemd1";
    const PATH: &'static str = "/org/freedesktop/systemd1";
    const INTERFACE: &'static str = "org.freedesktop.systemd1.Manager";

    /// Create an unconnected channel
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn connection(&self) -> Result<&zbus::Connection> {
        self.connection
            .get_or_try_init(|| async {
                zbus::Connection::system().await.map_err(|e| Error::Channel {
                    message: format!("unable to connect to systemd: {e}"),
                })
            })
            .await
    }
}

fn to_variant(value: TypedValue) -> Value<'static> {
    match value {
        TypedValue::Bool(b) => Value::from(b),
        TypedValue::Unsigned(_) | TypedValue::Unbounded => {
            Value::from(value.wire_u64().unwrap_or(u64::MAX))
        }
    }
}

#[async_trait]
impl UnitPropertyChannel for SystemdChannel {
    async fn set_properties(
        &self,
        unit: &str,
        runtime: bool,
        properties: &[(PropertyName, TypedValue)],
    ) -> Result<()> {
        // signature (sba(sv))
        let body: Vec<(&str, Value<'static>)> = properties
            .iter()
            .map(|(name, value)| (name.as_str(), to_variant(*value)))
            .collect();

        debug!(unit, runtime, count = body.len(), "SetUnitProperties");

        self.connection()
            .await?
            .call_method(
                Some(Self::DESTINATION),
                Self::PATH,
                Some(Self::INTERFACE),
                "SetUnitProperties",
                &(unit, runtime, body),
            )
            .await
            .map_err(|e| Error::Channel {
                message: format!("unable to set properties on {unit}: {e}"),
            })?;
        Ok(())
    }
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Unit name
    pub unit: String,
    /// Runtime-only flag
    pub runtime: bool,
    /// Properties set
    pub properties: Vec<(PropertyName, TypedValue)>,
}

/// Channel that records calls instead of sending them, for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl RecordingChannel {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail with `message`
    pub async fn fail_with(&self, message: &str) {
        *self.fail_with.lock().await = Some(message.to_string());
    }

    /// Calls made so far
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl UnitPropertyChannel for RecordingChannel {
    async fn set_properties(
        &self,
        unit: &str,
        runtime: bool,
        properties: &[(PropertyName, TypedValue)],
    ) -> Result<()> {
        if let Some(message) = self.fail_with.lock().await.clone() {
            return Err(Error::Channel { message });
        }

        self.calls.lock().await.push(RecordedCall {
            unit: unit.to_string(),
            runtime,
            properties: properties.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_becomes_max_u64() {
        assert_eq!(to_variant(TypedValue::Unbounded), Value::from(u64::MAX));
        assert_eq!(to_variant(TypedValue::Unsigned(10)), Value::from(10u64));
        assert_eq!(to_variant(TypedValue::Bool(true)), Value::from(true));
    }

    #[tokio::test]
    async fn recording_channel_records_and_fails() {
        let channel = RecordingChannel::new();
        channel
            .set_properties(
                "user-1.slice",
                true,
                &[(PropertyName::CpuAccounting, TypedValue::Bool(true))],
            )
            .await
            .unwrap();
        assert_eq!(channel.calls().await.len(), 1);

        channel.fail_with("bus down").await;
        let err = channel
            .set_properties("user-1.slice", true, &[])
            .await
            .unwrap_err();
        assert!(!err.is_input_error());
        assert_eq!(channel.calls().await.len(), 1);
    }
}
