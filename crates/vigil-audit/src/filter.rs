//! Decides whether an event is recorded at all.

use std::sync::Arc;

use crate::category::{Category, CategoryFlags};
use crate::config::FilterConfig;
use crate::record::Origin;

/// Action prefixes issued by the cluster itself. Never audited on the
/// transport layer.
pub const INTERNAL_ACTION_PREFIXES: [&str; 3] = ["internal:", "cluster:monitor", "indices:monitor"];

/// What the filter looks at for one event.
#[derive(Debug, Clone, Copy)]
pub struct FilterSubject<'a> {
    /// Event category.
    pub category: Category,
    /// Layer the request arrived on.
    pub origin: Origin,
    /// Transport action name.
    pub action: Option<&'a str>,
    /// Effective user.
    pub effective_user: Option<&'a str>,
    /// Request type name.
    pub request_type: Option<&'a str>,
    /// REST request path.
    pub rest_path: Option<&'a str>,
}

impl<'a> FilterSubject<'a> {
    /// Creates a subject for a transport request.
    #[must_use]
    pub const fn transport(
        category: Category,
        action: Option<&'a str>,
        effective_user: Option<&'a str>,
        request_type: Option<&'a str>,
    ) -> Self {
        Self {
            category,
            origin: Origin::Transport,
            action,
            effective_user,
            request_type,
            rest_path: None,
        }
    }

    /// Creates a subject for a REST request.
    #[must_use]
    pub const fn rest(
        category: Category,
        rest_path: Option<&'a str>,
        effective_user: Option<&'a str>,
    ) -> Self {
        Self {
            category,
            origin: Origin::Rest,
            action: None,
            effective_user,
            request_type: None,
            rest_path,
        }
    }
}

/// Stateless filter over a [`FilterConfig`] and the runtime category flags.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    config: Arc<FilterConfig>,
    flags: Arc<CategoryFlags>,
}

impl FilterEngine {
    /// Creates an engine using the process-wide category flags.
    #[must_use]
    pub fn new(config: Arc<FilterConfig>) -> Self {
        Self::with_flags(config, CategoryFlags::global())
    }

    /// Creates an engine with its own category flags.
    #[must_use]
    pub const fn with_flags(config: Arc<FilterConfig>, flags: Arc<CategoryFlags>) -> Self {
        Self { config, flags }
    }

    /// Returns the configuration snapshot.
    #[must_use]
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Returns the category flags consulted by this engine.
    #[must_use]
    pub fn flags(&self) -> &CategoryFlags {
        &self.flags
    }

    /// Returns true if an event described by `subject` should be recorded.
    ///
    /// Rules apply in order and the first rejection wins: layer switch,
    /// internal actions, ignored users, ignored requests, disabled
    /// categories.
    #[must_use]
    pub fn should_audit(&self, subject: &FilterSubject<'_>) -> bool {
        let category = subject.category;
        let is_transport = subject.origin == Origin::Transport;

        let layer_enabled = if is_transport {
            self.config.transport_enabled
        } else {
            self.config.rest_enabled
        };
        if !layer_enabled && !category.is_security_critical() {
            tracing::trace!(
                target: "vigil_audit",
                %category,
                origin = %subject.origin,
                "skipped, layer auditing disabled"
            );
            return false;
        }

        if is_transport {
            if let Some(action) = subject.action {
                if INTERNAL_ACTION_PREFIXES.iter().any(|p| action.starts_with(p)) {
                    tracing::trace!(target: "vigil_audit", %category, action, "skipped internal action");
                    return false;
                }
            }
        }

        if let Some(user) = subject.effective_user {
            if self.config.ignored_users.matches_any(user) {
                tracing::trace!(target: "vigil_audit", %category, user, "skipped ignored user");
                return false;
            }
        }

        let ignored_request = if is_transport {
            subject
                .action
                .into_iter()
                .chain(subject.request_type)
                .any(|name| self.config.ignored_requests.matches_any(name))
        } else {
            subject
                .rest_path
                .is_some_and(|path| self.config.ignored_requests.matches_any(path))
        };
        if ignored_request {
            tracing::trace!(target: "vigil_audit", %category, "skipped ignored request");
            return false;
        }

        if self.config.disabled_categories.contains(&category) || !self.flags.is_enabled(category) {
            tracing::trace!(target: "vigil_audit", %category, "skipped disabled category");
            return false;
        }

        true
    }
}
