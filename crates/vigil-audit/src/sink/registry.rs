//! Sink selection by configured key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{AuditSink, DebugSink, SinkContext, SinkSettings, StorageSink};
use crate::error::{AuditError, Result};
use crate::index::{ClusterStateProvider, IndexResolver};

/// Key of the console sink.
pub const DEBUG_SINK: &str = "debug";

/// Key of the storage sink writing through the host's document store.
pub const STORAGE_SINK: &str = "internal_elasticsearch";

/// Builds a sink from its settings and the host context.
pub type SinkFactory =
    Arc<dyn Fn(&SinkSettings, &SinkContext) -> Result<Arc<dyn AuditSink>> + Send + Sync>;

/// Builds a sink that also needs index resolution.
pub type ExtendedSinkFactory = Arc<
    dyn Fn(
            &SinkSettings,
            &SinkContext,
            Option<Arc<dyn IndexResolver>>,
            Option<Arc<dyn ClusterStateProvider>>,
        ) -> Result<Arc<dyn AuditSink>>
        + Send
        + Sync,
>;

#[derive(Clone, Default)]
struct Registration {
    basic: Option<SinkFactory>,
    extended: Option<ExtendedSinkFactory>,
}

/// Maps sink keys to constructors.
///
/// Keys are case-insensitive. A key may carry a basic constructor, an
/// extended one, or both; [`SinkRegistry::create`] tries them in that order.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    entries: HashMap<String, Registration>,
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

impl SinkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the `debug` and `internal_elasticsearch`
    /// sinks.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(DEBUG_SINK, |_, _| Ok(Arc::new(DebugSink::new())));
        registry.register(STORAGE_SINK, |settings, ctx| {
            Ok(Arc::new(StorageSink::from_settings(settings, ctx)?))
        });
        registry
    }

    /// Registers a basic constructor under `key`.
    pub fn register<F>(&mut self, key: &str, factory: F) -> &mut Self
    where
        F: Fn(&SinkSettings, &SinkContext) -> Result<Arc<dyn AuditSink>> + Send + Sync + 'static,
    {
        self.entries.entry(normalize(key)).or_default().basic = Some(Arc::new(factory));
        self
    }

    /// Registers an extended constructor under `key`.
    pub fn register_extended<F>(&mut self, key: &str, factory: F) -> &mut Self
    where
        F: Fn(
                &SinkSettings,
                &SinkContext,
                Option<Arc<dyn IndexResolver>>,
                Option<Arc<dyn ClusterStateProvider>>,
            ) -> Result<Arc<dyn AuditSink>>
            + Send
            + Sync
            + 'static,
    {
        self.entries.entry(normalize(key)).or_default().extended = Some(Arc::new(factory));
        self
    }

    /// Returns true if `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize(key))
    }

    /// Returns every registered key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Builds the sink registered under `key`.
    ///
    /// The basic constructor runs first; if it is missing or fails and an
    /// extended constructor exists, that one runs with the context's index
    /// resolver and cluster accessor.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::UnknownSink`] for unregistered keys and
    /// [`AuditError::SinkCreation`] if construction failed.
    pub fn create(
        &self,
        key: &str,
        settings: &SinkSettings,
        ctx: &SinkContext,
    ) -> Result<Arc<dyn AuditSink>> {
        let normalized = normalize(key);
        let registration = self
            .entries
            .get(&normalized)
            .ok_or_else(|| AuditError::UnknownSink {
                key: key.to_string(),
            })?;

        let basic_error = match &registration.basic {
            Some(factory) => match factory(settings, ctx) {
                Ok(sink) => return Ok(sink),
                Err(e) => Some(e),
            },
            None => None,
        };

        if let Some(factory) = &registration.extended {
            if let Some(e) = &basic_error {
                tracing::debug!(
                    target: "vigil_audit",
                    key = %normalized,
                    error = %e,
                    "basic sink constructor failed, trying extended"
                );
            }
            return factory(settings, ctx, ctx.index_resolver.clone(), ctx.cluster.clone()).map_err(
                |e| AuditError::SinkCreation {
                    key: normalized.clone(),
                    reason: e.to_string(),
                },
            );
        }

        Err(AuditError::SinkCreation {
            key: normalized,
            reason: basic_error.map_or_else(|| "no constructor registered".to_string(), |e| e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::WildcardIndexResolver;
    use crate::record::AuditRecord;
    use crate::sink::InMemoryDocumentStore;

    #[derive(Debug)]
    struct NamedSink(&'static str);

    impl AuditSink for NamedSink {
        fn name(&self) -> &str {
            self.0
        }

        fn store(&self, _record: &AuditRecord) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = SinkRegistry::with_builtins();
        assert_eq!(registry.keys(), vec!["debug", "internal_elasticsearch"]);
    }

    #[test]
    fn debug_key_yields_debug_sink() {
        let registry = SinkRegistry::with_builtins();
        let sink = registry
            .create(" DEBUG ", &SinkSettings::default(), &SinkContext::default())
            .unwrap();
        assert_eq!(sink.name(), "debug");
        assert!(sink.is_backpressure_tolerant());
    }

    #[test]
    fn storage_key_yields_storage_sink() {
        let registry = SinkRegistry::with_builtins();
        let ctx = SinkContext::default().with_document_store(Arc::new(InMemoryDocumentStore::new()));
        let sink = registry
            .create(STORAGE_SINK, &SinkSettings::default(), &ctx)
            .unwrap();
        assert_eq!(sink.name(), "internal_elasticsearch");
    }

    #[test]
    fn storage_without_store_fails() {
        let registry = SinkRegistry::with_builtins();
        let err = registry.create(STORAGE_SINK, &SinkSettings::default(), &SinkContext::default());
        assert!(matches!(err, Err(AuditError::SinkCreation { .. })));
    }

    #[test]
    fn unknown_key_is_error() {
        let registry = SinkRegistry::with_builtins();
        let err = registry.create("com.example.KafkaSink", &SinkSettings::default(), &SinkContext::default());
        assert!(matches!(err, Err(AuditError::UnknownSink { key }) if key == "com.example.KafkaSink"));
    }

    #[test]
    fn extended_constructor_receives_resolver() {
        let mut registry = SinkRegistry::new();
        registry.register_extended("custom", |_, _, resolver, _| {
            if resolver.is_some() {
                Ok(Arc::new(NamedSink("with-resolver")))
            } else {
                Ok(Arc::new(NamedSink("without-resolver")))
            }
        });

        let ctx = SinkContext::default().with_index_resolver(Arc::new(WildcardIndexResolver), None);
        let sink = registry.create("custom", &SinkSettings::default(), &ctx).unwrap();
        assert_eq!(sink.name(), "with-resolver");
    }

    #[test]
    fn failed_basic_falls_back_to_extended() {
        let mut registry = SinkRegistry::new();
        registry
            .register("custom", |_, _| Err(AuditError::config("missing url")))
            .register_extended("custom", |_, _, _, _| Ok(Arc::new(NamedSink("extended"))));

        let sink = registry
            .create("custom", &SinkSettings::default(), &SinkContext::default())
            .unwrap();
        assert_eq!(sink.name(), "extended");
    }

    #[test]
    fn failed_basic_without_extended_reports_reason() {
        let mut registry = SinkRegistry::new();
        registry.register("custom", |_, _| Err(AuditError::config("missing url")));
        let err = registry
            .create("custom", &SinkSettings::default(), &SinkContext::default())
            .unwrap_err();
        assert!(err.to_string().contains("missing url"));
    }
}
