//! Audit configuration.
//!
//! [`AuditConfig`] is the deserializable settings surface. At startup it is
//! turned into an immutable [`FilterConfig`] snapshot for the filter engine
//! and a [`DispatchConfig`](crate::dispatcher::DispatchConfig) for the
//! dispatcher.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::category::Category;
use crate::error::{AuditError, Result};
use crate::wildcard::WildcardMatcher;

/// Default worker pool size.
pub const DEFAULT_THREADPOOL_SIZE: i64 = 10;

/// Largest accepted worker pool size.
pub const MAX_THREADPOOL_SIZE: i64 = 1024;

/// Default task queue capacity.
pub const DEFAULT_MAX_QUEUE_LEN: i64 = 100_000;

/// Default per-phase shutdown wait.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 60;

/// Default name of the protected configuration index.
pub const DEFAULT_CONFIG_INDEX: &str = "searchguard";

fn default_true() -> bool {
    true
}

fn default_ignore_users() -> Vec<String> {
    vec!["kibanaserver".to_string()]
}

const fn default_threadpool_size() -> i64 {
    DEFAULT_THREADPOOL_SIZE
}

const fn default_max_queue_len() -> i64 {
    DEFAULT_MAX_QUEUE_LEN
}

const fn default_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

fn default_config_index() -> String {
    DEFAULT_CONFIG_INDEX.to_string()
}

/// Audit settings as read from the host's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Sink selector. `None` disables audit logging.
    #[serde(rename = "type", default)]
    pub sink_type: Option<String>,
    /// Audit REST-layer requests.
    #[serde(default = "default_true")]
    pub enable_rest: bool,
    /// Audit transport-layer requests.
    #[serde(default = "default_true")]
    pub enable_transport: bool,
    /// Include request bodies and document sources.
    #[serde(default = "default_true")]
    pub log_request_body: bool,
    /// Emit one record per item of shard-level bulk requests.
    #[serde(default)]
    pub resolve_bulk_requests: bool,
    /// Resolve index patterns to concrete index names.
    #[serde(default = "default_true")]
    pub resolve_indices: bool,
    /// Category names never recorded.
    #[serde(default)]
    pub disabled_categories: Vec<String>,
    /// Effective-user patterns never recorded.
    #[serde(default = "default_ignore_users")]
    pub ignore_users: Vec<String>,
    /// Action, request type or REST path patterns never recorded.
    #[serde(default)]
    pub ignore_requests: Vec<String>,
    /// Worker pool size; zero or negative selects synchronous dispatch.
    #[serde(default = "default_threadpool_size")]
    pub threadpool_size: i64,
    /// Capacity of the dispatcher's task queue.
    #[serde(default = "default_max_queue_len")]
    pub threadpool_max_queue_len: i64,
    /// How long each shutdown phase waits for queued records.
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_period_secs: u64,
    /// Name of the protected configuration index.
    #[serde(default = "default_config_index")]
    pub config_index: String,
    /// Sink-specific settings, interpreted by the selected sink only.
    #[serde(default)]
    pub sink: Map<String, Value>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink_type: None,
            enable_rest: true,
            enable_transport: true,
            log_request_body: true,
            resolve_bulk_requests: false,
            resolve_indices: true,
            disabled_categories: Vec::new(),
            ignore_users: default_ignore_users(),
            ignore_requests: Vec::new(),
            threadpool_size: DEFAULT_THREADPOOL_SIZE,
            threadpool_max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            shutdown_grace_period_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            config_index: default_config_index(),
            sink: Map::new(),
        }
    }
}

impl AuditConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AuditError::config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parses configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| AuditError::config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Unknown category names are not an error here; they are logged and
    /// skipped when the filter snapshot is built.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.threadpool_size > MAX_THREADPOOL_SIZE {
            return Err(AuditError::config(format!(
                "threadpool_size must be at most {MAX_THREADPOOL_SIZE}, got {}",
                self.threadpool_size
            )));
        }
        if self.threadpool_max_queue_len <= 0 {
            return Err(AuditError::config(
                "threadpool_max_queue_len must be positive",
            ));
        }
        if self.config_index.trim().is_empty() {
            return Err(AuditError::config("config_index cannot be empty"));
        }
        if let Some(sink_type) = &self.sink_type {
            if sink_type.trim().is_empty() {
                return Err(AuditError::config("type cannot be blank"));
            }
        }
        Ok(())
    }

    /// Returns the per-phase shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// Builds the filter snapshot.
    #[must_use]
    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig::from_config(self)
    }
}

/// Immutable filtering snapshot, built once at startup.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Audit REST-layer requests.
    pub rest_enabled: bool,
    /// Audit transport-layer requests.
    pub transport_enabled: bool,
    /// Include request bodies and document sources.
    pub include_details: bool,
    /// Fan out shard-level bulk requests.
    pub resolve_bulk: bool,
    /// Resolve index patterns to concrete names.
    pub resolve_indices: bool,
    /// Categories never recorded.
    pub disabled_categories: BTreeSet<Category>,
    /// Ignored effective users.
    pub ignored_users: WildcardMatcher,
    /// Ignored actions, request types and REST paths.
    pub ignored_requests: WildcardMatcher,
    /// Protected configuration index name.
    pub config_index: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::from_config(&AuditConfig::default())
    }
}

impl FilterConfig {
    /// Builds a snapshot from `config`.
    ///
    /// Unknown category names are logged and ignored.
    #[must_use]
    pub fn from_config(config: &AuditConfig) -> Self {
        let disabled_categories = config
            .disabled_categories
            .iter()
            .filter_map(|name| match name.parse::<Category>() {
                Ok(category) => Some(category),
                Err(e) => {
                    tracing::warn!(target: "vigil_audit", error = %e, "ignoring disabled category");
                    None
                }
            })
            .collect();

        Self {
            rest_enabled: config.enable_rest,
            transport_enabled: config.enable_transport,
            include_details: config.log_request_body,
            resolve_bulk: config.resolve_bulk_requests,
            resolve_indices: config.resolve_indices,
            disabled_categories,
            ignored_users: WildcardMatcher::new(&config.ignore_users),
            ignored_requests: WildcardMatcher::new(&config.ignore_requests),
            config_index: config.config_index.clone(),
        }
    }
}
