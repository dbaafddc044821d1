//! Operation requests as handed over by the host.
//!
//! The host translates its own request objects into [`OperationRequest`]
//! before calling the facade. Only the data the resolver extracts is
//! modelled; everything else stays with the host.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one shard of an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardId {
    /// Index the shard belongs to.
    pub index: String,
    /// Shard number.
    pub id: u32,
}

impl ShardId {
    /// Creates a shard id.
    #[must_use]
    pub fn new(index: impl Into<String>, id: u32) -> Self {
        Self {
            index: index.into(),
            id,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.id)
    }
}

/// How index patterns are expanded by the index resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicesOptions {
    /// Expand wildcards against existing indices.
    pub expand_wildcards: bool,
    /// Keep patterns that resolve to nothing instead of failing.
    pub allow_no_indices: bool,
    /// Drop concrete names that do not exist.
    pub ignore_unavailable: bool,
}

impl Default for IndicesOptions {
    fn default() -> Self {
        Self {
            expand_wildcards: true,
            allow_no_indices: true,
            ignore_unavailable: true,
        }
    }
}

/// A single-document request: get, index, delete or update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocRequest {
    /// Target index.
    pub index: Option<String>,
    /// Document type.
    pub doc_type: Option<String>,
    /// Document id.
    pub id: Option<String>,
    /// Document source (index), partial document (update).
    pub source: Option<Vec<u8>>,
    /// Shard the request was routed to, once known.
    pub shard_id: Option<ShardId>,
}

impl DocRequest {
    /// Creates a request against `index`.
    #[must_use]
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: Some(index.into()),
            ..Self::default()
        }
    }

    /// Sets the document type.
    #[must_use]
    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// Sets the document id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the document source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<Vec<u8>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the shard id.
    #[must_use]
    pub fn with_shard(mut self, shard_id: ShardId) -> Self {
        self.shard_id = Some(shard_id);
        self
    }
}

/// A request spanning one or more index patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicesRequest {
    /// Raw index patterns. The host may hand over `None` or null entries.
    pub indices: Option<Vec<Option<String>>>,
    /// Document types.
    pub doc_types: Vec<String>,
    /// Request body (search source, query, mapping).
    pub source: Option<Vec<u8>>,
    /// Expansion options.
    pub options: IndicesOptions,
}

impl IndicesRequest {
    /// Creates a request over `indices`.
    pub fn new<I, S>(indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indices: Some(indices.into_iter().map(|i| Some(i.into())).collect()),
            ..Self::default()
        }
    }

    /// Creates a request from the host's raw, possibly null, index array.
    #[must_use]
    pub fn from_raw(indices: Option<Vec<Option<String>>>) -> Self {
        Self {
            indices,
            ..Self::default()
        }
    }

    /// Sets the document types.
    #[must_use]
    pub fn with_types<I, S>(mut self, doc_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doc_types = doc_types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<Vec<u8>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the expansion options.
    #[must_use]
    pub const fn with_options(mut self, options: IndicesOptions) -> Self {
        self.options = options;
        self
    }
}

/// Index creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateIndexRequest {
    /// Name of the index to create.
    pub index: Option<String>,
    /// Settings and mappings body.
    pub source: Option<Vec<u8>>,
}

/// Cluster settings update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSettingsRequest {
    /// Persistent settings body.
    pub persistent: Option<Vec<u8>>,
    /// Transient settings body.
    pub transient: Option<Vec<u8>>,
}

/// Copy documents from source indices into a destination index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexRequest {
    /// Where documents are read from.
    pub source: IndicesRequest,
    /// Where documents are written to.
    pub destination: DocRequest,
}

/// A shard-level batch of document writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkShardRequest {
    /// Shard all items were routed to.
    pub shard_id: ShardId,
    /// Contained write requests.
    pub items: Vec<OperationRequest>,
}

/// A batch that has not been split by shard yet (bulk, multi-get, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeRequest {
    /// Host type name, e.g. `BulkRequest`.
    pub type_name: String,
    /// Contained requests.
    pub requests: Vec<OperationRequest>,
}

/// Every request shape the resolver knows how to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    /// Read a document by id.
    Get(DocRequest),
    /// Create an index.
    CreateIndex(CreateIndexRequest),
    /// Delete indices.
    DeleteIndex(IndicesRequest),
    /// Index (write) a document.
    Index(DocRequest),
    /// Delete a document.
    Delete(DocRequest),
    /// Partially update a document.
    Update(DocRequest),
    /// Search.
    Search(IndicesRequest),
    /// Update cluster settings.
    ClusterUpdateSettings(ClusterSettingsRequest),
    /// Reindex.
    Reindex(ReindexRequest),
    /// Delete documents matching a query.
    DeleteByQuery(IndicesRequest),
    /// Update documents matching a query.
    UpdateByQuery(IndicesRequest),
    /// Change a mapping.
    PutMapping(IndicesRequest),
    /// Any other request that names indices.
    MultiIndex {
        /// Host type name.
        type_name: String,
        /// Index data.
        request: IndicesRequest,
    },
    /// Shard-level bulk write.
    BulkShard(BulkShardRequest),
    /// Batched request not yet split by shard.
    Composite(CompositeRequest),
    /// A request the resolver has no extractor for.
    Other {
        /// Host type name.
        type_name: String,
    },
}

/// Fieldless mirror of [`OperationRequest`], used as the extractor key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// See [`OperationRequest::Get`].
    Get,
    /// See [`OperationRequest::CreateIndex`].
    CreateIndex,
    /// See [`OperationRequest::DeleteIndex`].
    DeleteIndex,
    /// See [`OperationRequest::Index`].
    Index,
    /// See [`OperationRequest::Delete`].
    Delete,
    /// See [`OperationRequest::Update`].
    Update,
    /// See [`OperationRequest::Search`].
    Search,
    /// See [`OperationRequest::ClusterUpdateSettings`].
    ClusterUpdateSettings,
    /// See [`OperationRequest::Reindex`].
    Reindex,
    /// See [`OperationRequest::DeleteByQuery`].
    DeleteByQuery,
    /// See [`OperationRequest::UpdateByQuery`].
    UpdateByQuery,
    /// See [`OperationRequest::PutMapping`].
    PutMapping,
    /// See [`OperationRequest::MultiIndex`].
    MultiIndex,
    /// See [`OperationRequest::BulkShard`].
    BulkShard,
    /// See [`OperationRequest::Composite`].
    Composite,
    /// See [`OperationRequest::Other`].
    Other,
}

impl OperationRequest {
    /// Returns the extractor key for this request.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Get(_) => RequestKind::Get,
            Self::CreateIndex(_) => RequestKind::CreateIndex,
            Self::DeleteIndex(_) => RequestKind::DeleteIndex,
            Self::Index(_) => RequestKind::Index,
            Self::Delete(_) => RequestKind::Delete,
            Self::Update(_) => RequestKind::Update,
            Self::Search(_) => RequestKind::Search,
            Self::ClusterUpdateSettings(_) => RequestKind::ClusterUpdateSettings,
            Self::Reindex(_) => RequestKind::Reindex,
            Self::DeleteByQuery(_) => RequestKind::DeleteByQuery,
            Self::UpdateByQuery(_) => RequestKind::UpdateByQuery,
            Self::PutMapping(_) => RequestKind::PutMapping,
            Self::MultiIndex { .. } => RequestKind::MultiIndex,
            Self::BulkShard(_) => RequestKind::BulkShard,
            Self::Composite(_) => RequestKind::Composite,
            Self::Other { .. } => RequestKind::Other,
        }
    }

    /// Returns the host type name recorded as the request class.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Get(_) => "GetRequest",
            Self::CreateIndex(_) => "CreateIndexRequest",
            Self::DeleteIndex(_) => "DeleteIndexRequest",
            Self::Index(_) => "IndexRequest",
            Self::Delete(_) => "DeleteRequest",
            Self::Update(_) => "UpdateRequest",
            Self::Search(_) => "SearchRequest",
            Self::ClusterUpdateSettings(_) => "ClusterUpdateSettingsRequest",
            Self::Reindex(_) => "ReindexRequest",
            Self::DeleteByQuery(_) => "DeleteByQueryRequest",
            Self::UpdateByQuery(_) => "UpdateByQueryRequest",
            Self::PutMapping(_) => "PutMappingRequest",
            Self::BulkShard(_) => "BulkShardRequest",
            Self::MultiIndex { type_name, .. }
            | Self::Other { type_name }
            | Self::Composite(CompositeRequest { type_name, .. }) => type_name.as_str(),
        }
    }

    /// Returns true for batched requests of either shape.
    #[must_use]
    pub const fn is_bulk(&self) -> bool {
        matches!(self, Self::BulkShard(_) | Self::Composite(_))
    }

    /// Creates an [`OperationRequest::Other`].
    #[must_use]
    pub fn other(type_name: impl Into<String>) -> Self {
        Self::Other {
            type_name: type_name.into(),
        }
    }
}

/// An HTTP request seen by the REST layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestRequest {
    /// HTTP method.
    pub method: String,
    /// Request path without the query string.
    pub path: String,
    /// Decoded query parameters.
    pub params: BTreeMap<String, String>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl RestRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// The request a facade call refers to.
#[derive(Debug, Clone, Copy)]
pub enum AuditRequest<'a> {
    /// A REST request.
    Rest(&'a RestRequest),
    /// A transport request and the action it executes.
    Transport {
        /// Action name, e.g. `indices:data/write/index`.
        action: &'a str,
        /// The request payload.
        request: &'a OperationRequest,
    },
}
