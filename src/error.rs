//! Error types for policy-watcher.

use std::fmt;

/// Result type alias for policy-watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors surfaced by a [`Notifier`](crate::core::Notifier) to its caller.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// The initial bus connection could not be established.
    #[error("Failed to connect to bus at '{endpoint}': {source}")]
    Connection {
        /// Endpoint the connection was attempted against
        endpoint: String,
        /// Underlying bus failure
        #[source]
        source: BusError,
    },

    /// Subscribing failed after the connection was established.
    ///
    /// The connection has already been released when this is returned.
    #[error("Failed to subscribe to '{subject}': {source}")]
    Subscription {
        /// Subject the subscription was attempted on
        subject: String,
        /// Underlying bus failure
        #[source]
        source: BusError,
    },

    /// The notifier has no live connection (closed, never connected, or the
    /// bus reports a non-connected state).
    #[error("Connection is absent or not in a connected state")]
    NotConnected,

    /// Publishing on a connected bus failed for a reason other than the
    /// connection going away.
    #[error("Failed to publish on '{subject}': {source}")]
    Publish {
        /// Subject the publish was attempted on
        subject: String,
        /// Underlying bus failure
        #[source]
        source: BusError,
    },

    /// Notifier configuration failed validation.
    #[error("Invalid notifier configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load notifier configuration from files or environment.
    #[error("Failed to load configuration: {0}")]
    Config(String),
}

impl WatcherError {
    /// Whether the caller can recover by reconnecting and retrying.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected)
    }
}

/// Errors reported by a bus backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Nothing is listening at the endpoint.
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    /// The connection was closed by its owner.
    #[error("Connection closed")]
    Closed,

    /// The connection exists but is not currently connected.
    #[error("Connection is not connected")]
    Disconnected,

    /// The subject is empty or malformed.
    #[error("Invalid subject: '{0}'")]
    InvalidSubject(String),

    /// The subscription was already removed.
    #[error("Subscription is no longer valid")]
    InvalidSubscription,

    /// Transport-specific failure.
    #[error("Bus transport error: {0}")]
    Transport(String),
}

impl BusError {
    /// Whether this error means the connection is gone rather than the
    /// request being bad.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Closed | Self::Disconnected)
    }
}

/// Validation error for notifier configuration.
#[derive(Debug)]
pub enum ValidationError {
    /// Custom validation error with a message.
    Custom(String),

    /// A specific field has an invalid value.
    InvalidField {
        /// The field name/path
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create a custom validation error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(msg) => write!(f, "{}", msg),
            Self::InvalidField { field, reason } => {
                write!(f, "Field '{}' is invalid: {}", field, reason)
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple validation errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for WatcherError {
    fn from(err: ValidationError) -> Self {
        WatcherError::InvalidConfig(err.to_string())
    }
}

impl From<config::ConfigError> for WatcherError {
    fn from(err: config::ConfigError) -> Self {
        WatcherError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connection_error_keeps_source() {
        let err = WatcherError::Connection {
            endpoint: "mem://nowhere".to_string(),
            source: BusError::Unreachable("mem://nowhere".to_string()),
        };
        assert!(err.to_string().contains("mem://nowhere"));
        assert!(err.source().is_some());
        assert!(!err.is_not_connected());
    }

    #[test]
    fn test_multiple_validation_errors_display() {
        let err = ValidationError::Multiple(vec![
            ValidationError::invalid_field("endpoint", "must not be empty"),
            ValidationError::custom("subject missing"),
        ]);
        let text = err.to_string();
        assert!(text.contains("1. Field 'endpoint' is invalid: must not be empty"));
        assert!(text.contains("2. subject missing"));

        let watcher_err: WatcherError = err.into();
        assert!(matches!(watcher_err, WatcherError::InvalidConfig(_)));
    }

    #[test]
    fn test_connection_lost_classification() {
        assert!(BusError::Closed.is_connection_lost());
        assert!(BusError::Disconnected.is_connection_lost());
        assert!(!BusError::InvalidSubject(String::new()).is_connection_lost());
    }
}
