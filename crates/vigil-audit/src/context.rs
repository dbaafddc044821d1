//! Request identity and origin context.
//!
//! The host passes identity explicitly through [`RequestContext`]. Values
//! resolve in a fixed order: an explicit argument to the logging call, then
//! the value set on the context, then a value propagated from another node
//! in a transport header.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::Origin;

/// Prefix reserved for headers the pipeline and its host use internally.
pub const INTERNAL_HEADER_PREFIX: &str = "_vigil_";

/// Transport header carrying the propagated user.
pub const USER_HEADER: &str = "_vigil_user";

/// Transport header carrying the propagated remote address.
pub const REMOTE_ADDRESS_HEADER: &str = "_vigil_remote_address";

/// Transport header carrying the propagated origin tag.
pub const ORIGIN_HEADER: &str = "_vigil_origin";

/// Marker set on writes issued by a sink. Requests carrying it are never
/// audited.
pub const INTERNAL_WRITE_MARKER: &str = "_vigil_audit_internal";

/// Task identity for transport requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task id, conventionally `node:sequence`.
    pub id: String,
    /// Parent task id, when the task was spawned by another task.
    pub parent_id: Option<String>,
}

impl TaskInfo {
    /// Creates task info without a parent.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
        }
    }

    /// Sets the parent task id.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Identity and transport metadata attached to one audited request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Layer the request arrived on, if known.
    pub origin: Option<Origin>,
    /// Authenticated user name, if known.
    pub user: Option<String>,
    /// Client address, if known.
    pub remote_address: Option<String>,
    /// Request headers, including propagated internal headers.
    pub headers: BTreeMap<String, String>,
    /// Task identity for transport requests.
    pub task: Option<TaskInfo>,
}

impl RequestContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the origin.
    #[must_use]
    pub const fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Sets the authenticated user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the remote address.
    #[must_use]
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the task identity.
    #[must_use]
    pub fn with_task(mut self, task: TaskInfo) -> Self {
        self.task = Some(task);
        self
    }

    /// Resolves the user: explicit argument, then context, then header.
    #[must_use]
    pub fn resolve_user(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.user.clone())
            .or_else(|| self.header_value(USER_HEADER))
    }

    /// Resolves the remote address: context, then header.
    #[must_use]
    pub fn resolve_remote_address(&self) -> Option<String> {
        self.remote_address
            .clone()
            .or_else(|| self.header_value(REMOTE_ADDRESS_HEADER))
    }

    /// Resolves the origin: explicit argument, then context, then header.
    #[must_use]
    pub fn resolve_origin(&self, explicit: Option<Origin>) -> Option<Origin> {
        explicit
            .or(self.origin)
            .or_else(|| self.header_value(ORIGIN_HEADER).and_then(|t| Origin::parse(&t)))
    }

    /// Returns true if the request was issued by a sink.
    #[must_use]
    pub fn is_internal_write(&self) -> bool {
        self.headers
            .get(INTERNAL_WRITE_MARKER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Returns the headers worth recording, without internal ones.
    #[must_use]
    pub fn audit_headers(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .filter(|(k, _)| !k.starts_with(INTERNAL_HEADER_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Reads a propagated header, decoding it leniently.
    ///
    /// Propagated values are JSON-encoded by the sending node: either a plain
    /// string or an object with a `name` member. Anything that does not parse
    /// as JSON is taken verbatim.
    fn header_value(&self, key: &str) -> Option<String> {
        let raw = self.headers.get(key)?;
        let decoded = match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::String(s)) => s,
            Ok(serde_json::Value::Object(map)) => map
                .get("name")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)?,
            _ => raw.clone(),
        };
        (!decoded.is_empty()).then_some(decoded)
    }
}
