//! Error types for the audit pipeline.

use thiserror::Error;

/// Errors that can occur while configuring or running the audit pipeline.
///
/// None of these ever reach the caller of a facade logging operation; they
/// surface from construction helpers and from sinks, and are logged where
/// the pipeline catches them.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Invalid configuration value.
    #[error("invalid audit configuration: {reason}")]
    Config {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// A category name did not match any known category.
    #[error("unknown audit category: {name}")]
    InvalidCategory {
        /// The name that failed to parse.
        name: String,
    },

    /// No sink factory is registered under the configured key.
    #[error("no audit sink registered for type '{key}'")]
    UnknownSink {
        /// The configured sink selector.
        key: String,
    },

    /// A registered sink factory failed to build its sink.
    #[error("failed to create audit sink '{key}': {reason}")]
    SinkCreation {
        /// The configured sink selector.
        key: String,
        /// The reason construction failed.
        reason: String,
    },

    /// A sink failed to deliver a record.
    #[error("audit sink '{sink}' failed to deliver record: {reason}")]
    Delivery {
        /// Name of the sink that failed.
        sink: String,
        /// The reason delivery failed.
        reason: String,
    },

    /// The dispatcher refused a record.
    #[error("audit record rejected: {reason}")]
    Rejected {
        /// The reason the record was refused.
        reason: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O failure while reading configuration or writing diagnostics.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl AuditError {
    /// Shorthand for a [`AuditError::Config`] error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`AuditError::Delivery`] error.
    pub fn delivery(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Delivery {
            sink: sink.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_config() {
        let err = AuditError::config("threadpool_max_queue_len must be positive");
        assert_eq!(
            err.to_string(),
            "invalid audit configuration: threadpool_max_queue_len must be positive"
        );
    }

    #[test]
    fn error_display_unknown_sink() {
        let err = AuditError::UnknownSink {
            key: "kafka".to_string(),
        };
        assert_eq!(err.to_string(), "no audit sink registered for type 'kafka'");
    }

    #[test]
    fn error_display_delivery() {
        let err = AuditError::delivery("webhook", "connection refused");
        assert_eq!(
            err.to_string(),
            "audit sink 'webhook' failed to deliver record: connection refused"
        );
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let audit_err: AuditError = json_err.unwrap_err().into();
        assert!(matches!(audit_err, AuditError::Serialization(_)));
    }
}
