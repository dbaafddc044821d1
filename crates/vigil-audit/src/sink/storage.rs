//! Storage sink: records become documents in the monitored store.
//!
//! Writes go through a [`DocumentStore`]. Because such a write is itself an
//! operation the host audits, every document carries the
//! [`INTERNAL_WRITE_MARKER`] header; the facade drops requests that carry it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AuditSink, SinkContext, SinkSettings};
use crate::context::INTERNAL_WRITE_MARKER;
use crate::error::{AuditError, Result};
use crate::record::AuditRecord;

/// Default index name template.
pub const DEFAULT_INDEX: &str = "auditlog";

/// Default document type.
pub const DEFAULT_DOC_TYPE: &str = "auditlog";

/// One document write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Target index.
    pub index: String,
    /// Document type.
    pub doc_type: String,
    /// Document body.
    pub body: Value,
    /// Request headers attached to the write.
    pub headers: BTreeMap<String, String>,
}

impl IndexDocument {
    /// Returns true if the write was issued by an audit sink.
    #[must_use]
    pub fn is_internal_write(&self) -> bool {
        self.headers
            .get(INTERNAL_WRITE_MARKER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Backend that accepts document writes.
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Writes one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejected the write.
    fn index(&self, document: IndexDocument) -> Result<()>;
}

/// Document store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<Vec<IndexDocument>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored document.
    #[must_use]
    pub fn documents(&self) -> Vec<IndexDocument> {
        self.documents.lock().clone()
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    /// Returns true if nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn index(&self, document: IndexDocument) -> Result<()> {
        self.documents.lock().push(document);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Date(&'static str),
}

/// Index name template with an optional embedded date pattern.
///
/// Templates use the Joda style: text in single quotes is literal, `''` is
/// a quote, and `yyyy`, `YYYY`, `yy`, `MM`, `dd`, `HH`, `mm`, `ss` are date
/// fields. A template with unquoted text that is not a date field is taken
/// verbatim, so `auditlog` stays `auditlog`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNamePattern {
    template: String,
    segments: Vec<Segment>,
}

const DATE_TOKENS: [(&str, &str); 8] = [
    ("yyyy", "%Y"),
    ("YYYY", "%Y"),
    ("yy", "%y"),
    ("MM", "%m"),
    ("dd", "%d"),
    ("HH", "%H"),
    ("mm", "%M"),
    ("ss", "%S"),
];

impl IndexNamePattern {
    /// Parses a template.
    #[must_use]
    pub fn new(template: &str) -> Self {
        let segments = parse_template(template).unwrap_or_else(|| {
            vec![Segment::Literal(template.to_string())]
        });
        Self {
            template: template.to_string(),
            segments,
        }
    }

    /// Returns the template as configured.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns true if the name depends on the date.
    #[must_use]
    pub fn is_dated(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Date(_)))
    }

    /// Resolves the index name for `now`.
    #[must_use]
    pub fn resolve(&self, now: DateTime<Utc>) -> String {
        let mut name = String::with_capacity(self.template.len() + 8);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Date(spec) => name.push_str(&now.format(spec).to_string()),
            }
        }
        name
    }
}

/// Splits a Joda-style template; `None` if it has unknown unquoted letters
/// or an unterminated quote.
fn parse_template(template: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(c) = rest.chars().next() {
        if c == '\'' {
            if let Some(after) = rest.strip_prefix("''") {
                literal.push('\'');
                rest = after;
                continue;
            }
            let (text, after) = take_quoted(&rest[1..])?;
            literal.push_str(&text);
            rest = after;
        } else if c.is_ascii_alphabetic() {
            let &(token, spec) = DATE_TOKENS.iter().find(|(t, _)| rest.starts_with(*t))?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Date(spec));
            rest = &rest[token.len()..];
        } else {
            literal.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Some(segments)
}

/// Reads quoted text up to the closing quote, unescaping `''`.
fn take_quoted(s: &str) -> Option<(String, &str)> {
    let mut text = String::new();
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if chars.next_if(|&(_, next)| next == '\'').is_some() {
                text.push('\'');
                continue;
            }
            return Some((text, &s[i + 1..]));
        }
        text.push(c);
    }
    None
}

/// Sink writing each record as a document.
#[derive(Debug)]
pub struct StorageSink {
    name: String,
    store: Arc<dyn DocumentStore>,
    index: IndexNamePattern,
    doc_type: String,
}

impl StorageSink {
    /// Creates a sink writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, index: &str, doc_type: impl Into<String>) -> Self {
        Self {
            name: "internal_elasticsearch".to_string(),
            store,
            index: IndexNamePattern::new(index),
            doc_type: doc_type.into(),
        }
    }

    /// Overrides the diagnostic name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the sink from `storage.index` / `storage.doc_type` and the
    /// context's document store.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Config`] if the context has no document store.
    pub fn from_settings(settings: &SinkSettings, ctx: &SinkContext) -> Result<Self> {
        let store = ctx
            .document_store
            .clone()
            .ok_or_else(|| AuditError::config("storage sink requires a document store"))?;
        let index = settings.get_str("storage.index").unwrap_or(DEFAULT_INDEX);
        let doc_type = settings.get_str("storage.doc_type").unwrap_or(DEFAULT_DOC_TYPE);
        Ok(Self::new(store, index, doc_type))
    }

    /// Returns the index name template.
    #[must_use]
    pub const fn index_pattern(&self) -> &IndexNamePattern {
        &self.index
    }

    /// Builds the document for `record` at time `now`.
    #[must_use]
    pub fn document(&self, record: &AuditRecord, now: DateTime<Utc>) -> IndexDocument {
        IndexDocument {
            index: self.index.resolve(now),
            doc_type: self.doc_type.clone(),
            body: record.to_json_value(),
            headers: BTreeMap::from([(INTERNAL_WRITE_MARKER.to_string(), "true".to_string())]),
        }
    }
}

impl AuditSink for StorageSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&self, record: &AuditRecord) -> Result<()> {
        let document = self.document(record, Utc::now());
        let index = document.index.clone();
        self.store.index(document).map_err(|e| {
            if matches!(e, AuditError::Delivery { .. }) {
                e
            } else {
                AuditError::delivery(&self.name, e.to_string())
            }
        })?;
        tracing::debug!(target: "vigil_audit", sink = %self.name, %index, "stored audit record");
        Ok(())
    }
}
