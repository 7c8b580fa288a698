//! Mutable unit properties and their value types

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use warden_core::{Ceiling, Error, Result};

/// Unit properties that may be changed at runtime
///
/// See `systemd.resource-control(5)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyName {
    /// Toggle CPU accounting
    CpuAccounting,
    /// Toggle memory accounting
    MemoryAccounting,
    /// CPU time allowed per wall-clock second, microseconds
    CpuQuotaPerSecUSec,
    /// Throttling threshold, bytes
    MemoryHigh,
    /// Best-effort protection, bytes
    MemoryLow,
    /// Hard protection, bytes
    MemoryMin,
    /// Hard ceiling, bytes
    MemoryMax,
    /// Swap ceiling, bytes
    MemorySwapMax,
}

/// Value type a property accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// `true` / `false`
    Bool,
    /// Non-negative integer, or `-1`
    Numeric,
}

impl PropertyName {
    /// Every supported property
    pub const ALL: [Self; 8] = [
        Self::CpuAccounting,
        Self::MemoryAccounting,
        Self::CpuQuotaPerSecUSec,
        Self::MemoryHigh,
        Self::MemoryLow,
        Self::MemoryMin,
        Self::MemoryMax,
        Self::MemorySwapMax,
    ];

    /// Name as the unit manager spells it
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CpuAccounting => "CPUAccounting",
            Self::MemoryAccounting => "MemoryAccounting",
            Self::CpuQuotaPerSecUSec => "CPUQuotaPerSecUSec",
            Self::MemoryHigh => "MemoryHigh",
            Self::MemoryLow => "MemoryLow",
            Self::MemoryMin => "MemoryMin",
            Self::MemoryMax => "MemoryMax",
            Self::MemorySwapMax => "MemorySwapMax",
        }
    }

    /// Value type accepted
    #[must_use]
    pub const fn kind(self) -> PropertyKind {
        match self {
            Self::CpuAccounting | Self::MemoryAccounting => PropertyKind::Bool,
            _ => PropertyKind::Numeric,
        }
    }

    /// Whether `-1` removes a ceiling, as opposed to clearing a protection
    #[must_use]
    pub const fn is_ceiling(self) -> bool {
        matches!(
            self,
            Self::CpuQuotaPerSecUSec | Self::MemoryHigh | Self::MemoryMax | Self::MemorySwapMax
        )
    }

    /// Whether requests are raised to at least live usage plus margin
    #[must_use]
    pub const fn is_clamped(self) -> bool {
        matches!(self, Self::MemoryHigh | Self::MemoryMax)
    }

    /// Whether legacy hosts take this ceiling through the hierarchy rather
    /// than the unit manager
    #[must_use]
    pub const fn is_legacy_memory_ceiling(self) -> bool {
        matches!(self, Self::MemoryHigh | Self::MemoryMax | Self::MemorySwapMax)
    }

    /// Check a raw value against this property's type
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] if the value has the wrong type
    pub fn typed(self, raw: &RawValue) -> Result<TypedValue> {
        let mismatch = |expected| Error::TypeMismatch {
            property: self.as_str().to_string(),
            expected,
        };

        match self.kind() {
            PropertyKind::Bool => match raw {
                RawValue::Bool(b) => Ok(TypedValue::Bool(*b)),
                _ => Err(mismatch("bool")),
            },
            PropertyKind::Numeric => {
                let number = match raw {
                    RawValue::Integer(n) => Some(*n),
                    RawValue::Float(f) => integral(*f),
                    RawValue::Text(t) if self.is_ceiling() && t == "infinity" => Some(-1),
                    _ => None,
                }
                .ok_or_else(|| mismatch("integer"))?;

                match number {
                    -1 if self.is_ceiling() => Ok(TypedValue::Unbounded),
                    -1 => Ok(TypedValue::Unsigned(0)),
                    n => u64::try_from(n)
                        .map(TypedValue::Unsigned)
                        .map_err(|_| mismatch("non-negative integer or -1")),
                }
            }
        }
    }
}

// JSON decoders hand integers over as floats
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64)
        .then_some(value as i64)
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::UnsupportedProperty {
                name: s.to_string(),
            })
    }
}

/// A property value as decoded from a request, before type checking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    /// JSON boolean
    Bool(bool),
    /// JSON integer
    Integer(i64),
    /// JSON non-integer number
    Float(f64),
    /// JSON string
    Text(String),
}

impl RawValue {
    /// Decode a command-line argument: JSON scalars keep their type,
    /// anything else is text
    #[must_use]
    pub fn parse_arg(arg: &str) -> Self {
        serde_json::from_str(arg).unwrap_or_else(|_| Self::Text(arg.to_string()))
    }
}

/// A type-checked property value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedValue {
    /// Boolean toggle
    Bool(bool),
    /// Bytes or microseconds
    Unsigned(u64),
    /// Ceiling removed
    Unbounded,
}

impl TypedValue {
    /// Value as a memory ceiling, if numeric
    #[must_use]
    pub const fn as_ceiling(self) -> Option<Ceiling> {
        match self {
            Self::Bool(_) => None,
            Self::Unsigned(bytes) => Some(Ceiling::Bytes(bytes)),
            Self::Unbounded => Some(Ceiling::Unbounded),
        }
    }

    /// Value from a memory ceiling
    #[must_use]
    pub const fn from_ceiling(ceiling: Ceiling) -> Self {
        match ceiling {
            Ceiling::Bytes(bytes) => Self::Unsigned(bytes),
            Ceiling::Unbounded => Self::Unbounded,
        }
    }

    /// The unit manager's representation; unbounded is `u64::MAX`
    /// ("infinity")
    #[must_use]
    pub const fn wire_u64(self) -> Option<u64> {
        match self {
            Self::Bool(_) => None,
            Self::Unsigned(n) => Some(n),
            Self::Unbounded => Some(u64::MAX),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Unsigned(n) => write!(f, "{n}"),
            Self::Unbounded => f.write_str("infinity"),
        }
    }
}

// -1 denotes unbounded at every external boundary
impl Serialize for TypedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Unsigned(n) => serializer.serialize_u64(*n),
            Self::Unbounded => serializer.serialize_i64(-1),
        }
    }
}
