//! HTTP-backed sinks for the vigil audit pipeline.
//!
//! - [`WebhookSink`] (`webhook`): one request per record in one of five
//!   [`WebhookFormat`]s.
//! - The external storage sink (`external_elasticsearch`): a
//!   [`StorageSink`](vigil_audit::StorageSink) writing through an
//!   [`HttpDocumentStore`].
//!
//! [`default_registry`] returns the core built-ins plus both of these.
//!
//! # Example
//!
//! ```rust
//! use vigil_audit::{AuditConfig, AuditLog, SinkContext};
//!
//! let config = AuditConfig::from_json(r#"{
//!     "type": "webhook",
//!     "sink": { "webhook": { "url": "http://127.0.0.1:9/audit", "format": "slack" } }
//! }"#).unwrap();
//!
//! let log = AuditLog::builder(config)
//!     .registry(vigil_sinks::default_registry())
//!     .context(SinkContext::default())
//!     .build();
//! assert_eq!(log.dispatcher().sink().map(|s| s.name()), Some("webhook"));
//! log.close();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod external;
pub mod format;
pub mod webhook;

use std::sync::Arc;

use vigil_audit::SinkRegistry;

pub use client::{ClientOptions, HttpClient, DEFAULT_TIMEOUT};
pub use error::{Result, SinkError};
pub use external::{external_sink, Credentials, HttpDocumentStore, EXTERNAL_STORAGE_SINK};
pub use format::{Payload, WebhookFormat};
pub use webhook::{WebhookConfig, WebhookSink, WEBHOOK_SINK};

/// Returns a registry with the core sinks plus `webhook` and
/// `external_elasticsearch`.
#[must_use]
pub fn default_registry() -> SinkRegistry {
    let mut registry = SinkRegistry::with_builtins();
    registry.register(WEBHOOK_SINK, |settings, _| {
        Ok(Arc::new(WebhookSink::from_settings(settings)?))
    });
    registry.register(EXTERNAL_STORAGE_SINK, external_sink);
    registry
}
