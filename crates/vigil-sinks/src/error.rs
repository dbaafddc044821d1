//! Error types for the HTTP sinks.

use thiserror::Error;
use vigil_audit::AuditError;

/// Errors raised while configuring or talking to an HTTP sink endpoint.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Invalid sink settings.
    #[error("invalid sink configuration: {reason}")]
    Config {
        /// Why the settings were rejected.
        reason: String,
    },

    /// The endpoint URL could not be parsed.
    #[error("invalid endpoint url '{url}': {source}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// The parse failure.
        source: url::ParseError,
    },

    /// An unknown payload format name.
    #[error("unknown webhook format: {name}")]
    UnknownFormat {
        /// The name that failed to parse.
        name: String,
    },

    /// The trusted CA file could not be loaded.
    #[error("failed to load trusted certificates from {path}: {reason}")]
    Certificate {
        /// Path of the PEM file.
        path: String,
        /// The reason loading failed.
        reason: String,
    },

    /// The request never produced a response.
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The HTTP executor thread could not be started or stopped answering.
    #[error("http executor unavailable: {reason}")]
    Executor {
        /// What went wrong.
        reason: String,
    },

    /// The endpoint answered with an unexpected status.
    #[error("unexpected http status {status} from {url}")]
    Status {
        /// The status code returned.
        status: u16,
        /// The endpoint, without query string.
        url: String,
    },

    /// Payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl SinkError {
    /// Shorthand for a [`SinkError::Config`] error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Converts a delivery-time failure into the pipeline's error, tagged
    /// with the sink name.
    #[must_use]
    pub fn into_delivery(self, sink: &str) -> AuditError {
        AuditError::delivery(sink, self.to_string())
    }
}

impl From<SinkError> for AuditError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Config { reason } => Self::Config { reason },
            SinkError::Serialization(reason) => Self::Serialization(reason),
            other => Self::config(other.to_string()),
        }
    }
}

/// Result type alias for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display() {
        let err = SinkError::Status {
            status: 503,
            url: "http://hooks.local/audit".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected http status 503 from http://hooks.local/audit"
        );
    }

    #[test]
    fn config_error_maps_to_audit_config() {
        let err: AuditError = SinkError::config("webhook.url is required").into();
        assert!(matches!(err, AuditError::Config { reason } if reason == "webhook.url is required"));
    }

    #[test]
    fn unknown_format_maps_to_audit_config() {
        let err: AuditError = SinkError::UnknownFormat {
            name: "xml".to_string(),
        }
        .into();
        assert!(matches!(err, AuditError::Config { reason } if reason.contains("xml")));
    }

    #[test]
    fn executor_error_maps_to_audit_config() {
        let err: AuditError = SinkError::Executor {
            reason: "executor stopped".to_string(),
        }
        .into();
        assert!(matches!(err, AuditError::Config { reason } if reason.contains("executor stopped")));
    }

    #[test]
    fn into_delivery_names_sink() {
        let err = SinkError::Status {
            status: 404,
            url: "http://hooks.local".to_string(),
        }
        .into_delivery("webhook");
        match err {
            AuditError::Delivery { sink, reason } => {
                assert_eq!(sink, "webhook");
                assert!(reason.contains("404"));
            }
            other => panic!("expected Delivery error, got {other:?}"),
        }
    }
}
