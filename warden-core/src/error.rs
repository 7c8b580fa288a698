//! Error types for Warden

use thiserror::Error;

/// Warden error types
///
/// Variants fall into two classes: input errors, which are caller mistakes
/// and never reach a mutation backend, and operational errors raised while
/// reading or writing kernel and system state. See [`Error::is_input_error`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `CGroup` read or write failed
    #[error("CGroup error: {message}")]
    CGroup {
        /// Error message
        message: String,
    },

    /// Process table read failed
    #[error("Process error: {message}")]
    Process {
        /// Error message
        message: String,
    },


    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Operation not supported by the active backend
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// Operation that was attempted
        operation: String,
    },

    /// Unit-property mutation channel failed
    #[error("Control channel error: {message}")]
    Channel {
        /// Error message
        message: String,
    },

    /// Property name is not on the whitelist
    #[error("property not supported: {name}")]
    UnsupportedProperty {
        /// Requested property name
        name: String,
    },

    /// Property value has the wrong type
    #[error("invalid type for property {property}, expected {expected}")]
    TypeMismatch {
        /// Property name
        property: String,
        /// Expected value type
        expected: &'static str,
    },

    /// Group and username were both given but do not belong together
    #[error("group '{group}' does not belong to user '{username}'")]
    IdentityMismatch {
        /// Requested group
        group: String,
        /// Requested username
        username: String,
    },

    /// Target could not be parsed
    #[error("malformed target: {message}")]
    MalformedTarget {
        /// Error message
        message: String,
    },

    /// No passwd entry for the named user or uid
    #[error("unknown user '{user}'")]
    UnknownUser {
        /// Username or uid that was looked up
        user: String,
    },

    /// Neither a group nor a username was supplied
    #[error("must provide a group or a username")]
    MissingTarget,

    /// System call failed, e.g. a passwd lookup
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Blocking or spawned task did not complete
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether this error was caused by the caller's input rather than an
    /// operational fault
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedProperty { .. }
                | Self::TypeMismatch { .. }
                | Self::IdentityMismatch { .. }
                | Self::MalformedTarget { .. }
                | Self::UnknownUser { .. }
                | Self::MissingTarget
        )
    }

    /// Shorthand for [`Error::CGroup`]
    pub fn cgroup(message: impl Into<String>) -> Self {
        Self::CGroup {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::Process`]
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, Error>;
