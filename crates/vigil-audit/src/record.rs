//! The canonical audit record.
//!
//! An [`AuditRecord`] is an ordered map from a closed set of [`Field`] keys to
//! JSON values. Category and timestamp are always present; every other field
//! is simply absent when the information is unavailable. Records are built
//! once through [`AuditRecordBuilder`] and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::category::Category;

/// Where the audited request entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// HTTP/REST layer.
    Rest,
    /// Node-to-node transport layer.
    Transport,
}

impl Origin {
    /// Returns the lower-case name of this origin.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Transport => "transport",
        }
    }

    /// Parses an origin tag, as propagated between nodes.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "rest" => Some(Self::Rest),
            "transport" => Some(Self::Transport),
            _ => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of record keys, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Event category.
    Category,
    /// UTC timestamp of record creation.
    Timestamp,
    /// Request layer (rest or transport).
    Origin,
    /// User the request executed as.
    EffectiveUser,
    /// User who initiated the request when impersonating.
    InitiatingUser,
    /// Whether the effective user is an administrator.
    EffectiveUserIsAdmin,
    /// Client address.
    RemoteAddress,
    /// Transport action name.
    Action,
    /// Concrete request type name.
    RequestClass,
    /// Privilege that was checked.
    Privilege,
    /// Index names as given in the request.
    Indices,
    /// Index names after wildcard/alias resolution.
    ResolvedIndices,
    /// Document types.
    DocTypes,
    /// Document id.
    DocId,
    /// Shard id.
    ShardId,
    /// REST request path.
    RestPath,
    /// REST query parameters.
    RestParams,
    /// Request body or document source.
    RequestBody,
    /// Filtered request headers.
    Headers,
    /// Error detail.
    Exception,
    /// Task id.
    TaskId,
    /// Parent task id.
    TaskParentId,
}

impl Field {
    /// Every field, in output order.
    pub const ALL: [Self; 22] = [
        Self::Category,
        Self::Timestamp,
        Self::Origin,
        Self::EffectiveUser,
        Self::InitiatingUser,
        Self::EffectiveUserIsAdmin,
        Self::RemoteAddress,
        Self::Action,
        Self::RequestClass,
        Self::Privilege,
        Self::Indices,
        Self::ResolvedIndices,
        Self::DocTypes,
        Self::DocId,
        Self::ShardId,
        Self::RestPath,
        Self::RestParams,
        Self::RequestBody,
        Self::Headers,
        Self::Exception,
        Self::TaskId,
        Self::TaskParentId,
    ];

    /// Returns the wire key of this field.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Category => "audit_category",
            Self::Timestamp => "audit_utc_timestamp",
            Self::Origin => "audit_request_layer",
            Self::EffectiveUser => "audit_request_effective_user",
            Self::InitiatingUser => "audit_request_initiating_user",
            Self::EffectiveUserIsAdmin => "audit_request_effective_user_is_admin",
            Self::RemoteAddress => "audit_request_remote_address",
            Self::Action => "audit_transport_action",
            Self::RequestClass => "audit_request_class",
            Self::Privilege => "audit_request_privilege",
            Self::Indices => "audit_trace_indices",
            Self::ResolvedIndices => "audit_trace_resolved_indices",
            Self::DocTypes => "audit_trace_doc_types",
            Self::DocId => "audit_trace_doc_id",
            Self::ShardId => "audit_trace_shard_id",
            Self::RestPath => "audit_rest_request_path",
            Self::RestParams => "audit_rest_request_params",
            Self::RequestBody => "audit_request_body",
            Self::Headers => "audit_request_headers",
            Self::Exception => "audit_request_exception",
            Self::TaskId => "audit_trace_task_id",
            Self::TaskParentId => "audit_trace_task_parent_id",
        }
    }

    /// Human-readable label used by text renderings.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Category => "Category",
            Self::Timestamp => "Timestamp",
            Self::Origin => "Layer",
            Self::EffectiveUser => "User",
            Self::InitiatingUser => "Initiating user",
            Self::EffectiveUserIsAdmin => "Admin",
            Self::RemoteAddress => "Remote address",
            Self::Action => "Action",
            Self::RequestClass => "Request class",
            Self::Privilege => "Privilege",
            Self::Indices => "Indices",
            Self::ResolvedIndices => "Resolved indices",
            Self::DocTypes => "Types",
            Self::DocId => "Id",
            Self::ShardId => "Shard",
            Self::RestPath => "Path",
            Self::RestParams => "Params",
            Self::RequestBody => "Body",
            Self::Headers => "Headers",
            Self::Exception => "Details",
            Self::TaskId => "Task",
            Self::TaskParentId => "Parent task",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One immutable audit event.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    category: Category,
    timestamp: DateTime<Utc>,
    fields: BTreeMap<Field, Value>,
}

impl AuditRecord {
    /// Starts a record of `category` stamped with the current time.
    #[must_use]
    pub fn builder(category: Category) -> AuditRecordBuilder {
        AuditRecordBuilder::new(category)
    }

    /// Returns the category.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the value of an optional field, if set.
    ///
    /// Category and timestamp are not stored here; use their accessors.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<&Value> {
        self.fields.get(&field)
    }

    /// Returns the value of `field` as a string slice if it holds a string.
    #[must_use]
    pub fn get_str(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Returns true if `field` is present.
    #[must_use]
    pub fn contains(&self, field: Field) -> bool {
        match field {
            Field::Category | Field::Timestamp => true,
            _ => self.fields.contains_key(&field),
        }
    }

    /// Iterates all present fields in output order, category and timestamp
    /// first.
    pub fn iter(&self) -> impl Iterator<Item = (Field, Value)> + '_ {
        [
            (Field::Category, Value::from(self.category.as_str())),
            (Field::Timestamp, Value::from(self.formatted_timestamp())),
        ]
        .into_iter()
        .chain(self.fields.iter().map(|(k, v)| (*k, v.clone())))
    }

    /// Iterates present fields as `(key, display string)` pairs.
    ///
    /// Strings are emitted verbatim; other values use their compact JSON form.
    pub fn iter_strings(&self) -> impl Iterator<Item = (Field, String)> + '_ {
        self.iter().map(|(field, value)| (field, value_to_string(&value)))
    }

    /// Returns the timestamp in RFC 3339 form with millisecond precision.
    #[must_use]
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Renders the record as `Label: value` lines, skipping empty values.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (field, value) in self.iter_strings() {
            if !value.is_empty() {
                let _ = writeln!(out, "{}: {value}", field.label());
            }
        }
        out
    }

    /// Converts the record into a JSON object.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(field, value)| (field.key().to_string(), value))
                .collect(),
        )
    }
}

impl Serialize for AuditRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field.key(), &value)?;
        }
        map.end()
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json_value())
    }
}

/// Renders a JSON value for text formats.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fluent builder for [`AuditRecord`].
///
/// Every setter ignores empty input so that unavailable information is
/// omitted rather than recorded as null or blank.
#[derive(Debug, Clone)]
pub struct AuditRecordBuilder {
    record: AuditRecord,
}

impl AuditRecordBuilder {
    /// Creates a builder for `category` stamped with the current time.
    #[must_use]
    pub fn new(category: Category) -> Self {
        Self {
            record: AuditRecord {
                category,
                timestamp: Utc::now(),
                fields: BTreeMap::new(),
            },
        }
    }

    /// Overrides the timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.record.timestamp = timestamp;
        self
    }

    /// Sets a string field; `None` and empty strings are ignored.
    #[must_use]
    pub fn text<S: AsRef<str>>(mut self, field: Field, value: Option<S>) -> Self {
        if let Some(v) = value {
            let v = v.as_ref();
            if !v.is_empty() {
                self.record.fields.insert(field, Value::from(v));
            }
        }
        self
    }

    /// Sets a boolean field; `None` is ignored.
    #[must_use]
    pub fn flag(mut self, field: Field, value: Option<bool>) -> Self {
        if let Some(v) = value {
            self.record.fields.insert(field, Value::Bool(v));
        }
        self
    }

    /// Sets a list field; empty lists are ignored.
    #[must_use]
    pub fn list<I, S>(mut self, field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<Value> = values
            .into_iter()
            .map(|s| Value::String(s.into()))
            .collect();
        if !values.is_empty() {
            self.record.fields.insert(field, Value::Array(values));
        }
        self
    }

    /// Sets a string-to-string map field; empty maps are ignored.
    #[must_use]
    pub fn map(mut self, field: Field, values: &BTreeMap<String, String>) -> Self {
        if !values.is_empty() {
            let object = values
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect();
            self.record.fields.insert(field, Value::Object(object));
        }
        self
    }

    /// Sets an arbitrary JSON value; `Null` is ignored.
    #[must_use]
    pub fn value(mut self, field: Field, value: Value) -> Self {
        if !value.is_null() {
            self.record.fields.insert(field, value);
        }
        self
    }

    /// Sets the request origin.
    #[must_use]
    pub fn origin(self, origin: Origin) -> Self {
        self.text(Field::Origin, Some(origin.as_str()))
    }

    /// Sets the effective user.
    #[must_use]
    pub fn effective_user(self, user: Option<&str>) -> Self {
        self.text(Field::EffectiveUser, user)
    }

    /// Sets the remote address.
    #[must_use]
    pub fn remote_address(self, address: Option<&str>) -> Self {
        self.text(Field::RemoteAddress, address)
    }

    /// Sets the error detail.
    #[must_use]
    pub fn exception(self, detail: Option<&str>) -> Self {
        self.text(Field::Exception, detail)
    }

    /// Finishes the record.
    #[must_use]
    pub fn build(self) -> AuditRecord {
        self.record
    }
}
