//! Audit sinks.
//!
//! A sink is the delivery backend for audit records. Exactly one sink is
//! active per pipeline; it is chosen at startup through a [`SinkRegistry`]
//! and owned by the [`Dispatcher`](crate::dispatcher::Dispatcher) until
//! shutdown.

mod debug;
mod registry;
mod storage;

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::DEFAULT_CONFIG_INDEX;
use crate::error::{AuditError, Result};
use crate::index::{ClusterStateProvider, IndexResolver};
use crate::record::AuditRecord;

pub use debug::DebugSink;
pub use registry::{ExtendedSinkFactory, SinkFactory, SinkRegistry, DEBUG_SINK, STORAGE_SINK};
pub use storage::{
    DocumentStore, InMemoryDocumentStore, IndexDocument, IndexNamePattern, StorageSink,
    DEFAULT_DOC_TYPE, DEFAULT_INDEX,
};

/// Delivery backend for audit records.
///
/// `store` may block; in asynchronous mode it only ever runs on dispatcher
/// worker threads. Errors returned from `store` and `close` are logged by
/// the dispatcher and never reach the code that produced the record.
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Returns the name used in diagnostics.
    fn name(&self) -> &str;

    /// Delivers one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be delivered.
    fn store(&self, record: &AuditRecord) -> Result<()>;

    /// Flushes and releases resources. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing failed.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Returns true if `store` never blocks on a slow backend.
    fn is_backpressure_tolerant(&self) -> bool {
        false
    }
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn store(&self, record: &AuditRecord) -> Result<()> {
        (**self).store(record)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn is_backpressure_tolerant(&self) -> bool {
        (**self).is_backpressure_tolerant()
    }
}

/// Sink-specific settings, opaque to the rest of the pipeline.
///
/// Values are looked up by dotted path (`webhook.ssl.verify`), either as a
/// flat key or through nested objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkSettings {
    values: Map<String, Value>,
}

impl SinkSettings {
    /// Wraps a settings object.
    #[must_use]
    pub const fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Builds settings from a JSON value; anything but an object is empty.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    /// Returns the value at `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(path) {
            return Some(value);
        }
        let mut parts = path.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Returns the non-empty string at `path`.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Returns the boolean at `path`, accepting `"true"`/`"false"` strings.
    #[must_use]
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the string at `path` or a configuration error naming it.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Config`] if the value is missing or empty.
    pub fn require_str(&self, path: &str) -> Result<&str> {
        self.get_str(path)
            .ok_or_else(|| AuditError::config(format!("sink setting '{path}' is required")))
    }
}

/// Host collaborators handed to sink factories.
#[derive(Clone)]
pub struct SinkContext {
    /// Protected configuration index name.
    pub config_index: String,
    /// Document store used by the storage sink.
    pub document_store: Option<Arc<dyn DocumentStore>>,
    /// Index name resolver.
    pub index_resolver: Option<Arc<dyn IndexResolver>>,
    /// Cluster state accessor.
    pub cluster: Option<Arc<dyn ClusterStateProvider>>,
}

impl Default for SinkContext {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_INDEX)
    }
}

impl fmt::Debug for SinkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkContext")
            .field("config_index", &self.config_index)
            .field("document_store", &self.document_store)
            .field("has_index_resolver", &self.index_resolver.is_some())
            .field("has_cluster", &self.cluster.is_some())
            .finish()
    }
}

impl SinkContext {
    /// Creates a context without collaborators.
    #[must_use]
    pub fn new(config_index: impl Into<String>) -> Self {
        Self {
            config_index: config_index.into(),
            document_store: None,
            index_resolver: None,
            cluster: None,
        }
    }

    /// Sets the document store.
    #[must_use]
    pub fn with_document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(store);
        self
    }

    /// Sets the index resolver and cluster state accessor.
    #[must_use]
    pub fn with_index_resolver(
        mut self,
        resolver: Arc<dyn IndexResolver>,
        cluster: Option<Arc<dyn ClusterStateProvider>>,
    ) -> Self {
        self.index_resolver = Some(resolver);
        self.cluster = cluster;
        self
    }
}
