//! Turns operation requests into audit records.
//!
//! Field extraction is table driven: every [`RequestKind`] maps to a pure
//! [`Extractor`] that reads the kind-specific data out of the request. The
//! resolver adds the fields common to every record, resolves index names,
//! applies the sensitive-source policy and fans shard-level bulk requests
//! out into one record per item.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::category::Category;
use crate::context::TaskInfo;
use crate::index::{ClusterState, ClusterStateProvider, IndexResolver};
use crate::record::{AuditRecord, Field, Origin};
use crate::request::{IndicesOptions, IndicesRequest, OperationRequest, RequestKind, ShardId};
use crate::source::{combine_sources, source_to_text};
use crate::wildcard::WildcardPattern;

/// Inputs for one resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolveParams<'a> {
    /// Event category.
    pub category: Category,
    /// Layer the request arrived on.
    pub origin: Origin,
    /// Transport action name.
    pub action: Option<&'a str>,
    /// Privilege that was checked.
    pub privilege: Option<&'a str>,
    /// User the request executes as.
    pub effective_user: Option<&'a str>,
    /// Whether the effective user is an administrator.
    pub is_admin: Option<bool>,
    /// User who initiated the request when impersonating.
    pub initiating_user: Option<&'a str>,
    /// Client address.
    pub remote_address: Option<&'a str>,
    /// The request.
    pub request: &'a OperationRequest,
    /// Filtered request headers.
    pub headers: &'a BTreeMap<String, String>,
    /// Task identity.
    pub task: Option<&'a TaskInfo>,
    /// Include bodies and document sources.
    pub with_details: bool,
    /// Fan out shard-level bulk requests.
    pub resolve_bulk: bool,
    /// Error detail.
    pub exception: Option<&'a str>,
}

/// Kind-specific data read out of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFields {
    /// Raw index names, normalized.
    pub indices: Vec<String>,
    /// Options for resolving `indices`.
    pub options: IndicesOptions,
    /// Document types.
    pub doc_types: Vec<String>,
    /// Document id.
    pub doc_id: Option<String>,
    /// Shard id.
    pub shard_id: Option<ShardId>,
    /// Body or document source, already converted to text.
    pub source: Option<String>,
    /// The source is a document write and may contain protected content.
    pub source_is_sensitive: bool,
}

/// Reads the kind-specific fields of a request.
///
/// The boolean is the include-details switch; sources are only extracted
/// when it is set.
pub type Extractor = fn(&OperationRequest, bool) -> RequestFields;

/// Returns the extractor registered for `kind`.
#[must_use]
pub fn extractor_for(kind: RequestKind) -> Extractor {
    match kind {
        RequestKind::Get => extract_get,
        RequestKind::CreateIndex => extract_create_index,
        RequestKind::Index => extract_index,
        RequestKind::Delete => extract_delete,
        RequestKind::Update => extract_update,
        RequestKind::ClusterUpdateSettings => extract_cluster_settings,
        RequestKind::Reindex => extract_reindex,
        RequestKind::DeleteIndex
        | RequestKind::Search
        | RequestKind::DeleteByQuery
        | RequestKind::UpdateByQuery
        | RequestKind::PutMapping
        | RequestKind::MultiIndex => extract_indices_request,
        RequestKind::BulkShard | RequestKind::Composite | RequestKind::Other => extract_generic,
    }
}

/// Normalizes a host index array.
///
/// `None` and a lone `null` both mean "no indices"; null entries elsewhere
/// are dropped.
#[must_use]
pub fn normalize_indices(indices: Option<&[Option<String>]>) -> Vec<String> {
    match indices {
        None | Some([None]) => Vec::new(),
        Some(list) => list.iter().flatten().cloned().collect(),
    }
}

fn text_source(bytes: Option<&Vec<u8>>, with_details: bool) -> Option<String> {
    if with_details {
        bytes.map(|b| source_to_text(b.as_slice()))
    } else {
        None
    }
}

fn extract_get(request: &OperationRequest, _with_details: bool) -> RequestFields {
    let OperationRequest::Get(req) = request else {
        return RequestFields::default();
    };
    RequestFields {
        indices: req.index.iter().cloned().collect(),
        doc_types: req.doc_type.iter().cloned().collect(),
        doc_id: req.id.clone(),
        shard_id: req.shard_id.clone(),
        ..RequestFields::default()
    }
}

fn extract_create_index(request: &OperationRequest, with_details: bool) -> RequestFields {
    let OperationRequest::CreateIndex(req) = request else {
        return RequestFields::default();
    };
    RequestFields {
        indices: req.index.iter().cloned().collect(),
        source: text_source(req.source.as_ref(), with_details),
        source_is_sensitive: true,
        ..RequestFields::default()
    }
}

fn extract_index(request: &OperationRequest, with_details: bool) -> RequestFields {
    let OperationRequest::Index(req) = request else {
        return RequestFields::default();
    };
    RequestFields {
        indices: req.index.iter().cloned().collect(),
        doc_types: req.doc_type.iter().cloned().collect(),
        doc_id: req.id.clone(),
        shard_id: req.shard_id.clone(),
        source: text_source(req.source.as_ref(), with_details),
        source_is_sensitive: true,
        ..RequestFields::default()
    }
}

fn extract_delete(request: &OperationRequest, _with_details: bool) -> RequestFields {
    let OperationRequest::Delete(req) = request else {
        return RequestFields::default();
    };
    RequestFields {
        indices: req.index.iter().cloned().collect(),
        doc_types: req.doc_type.iter().cloned().collect(),
        doc_id: req.id.clone(),
        shard_id: req.shard_id.clone(),
        ..RequestFields::default()
    }
}

fn extract_update(request: &OperationRequest, with_details: bool) -> RequestFields {
    let OperationRequest::Update(req) = request else {
        return RequestFields::default();
    };
    RequestFields {
        indices: req.index.iter().cloned().collect(),
        doc_types: req.doc_type.iter().cloned().collect(),
        doc_id: req.id.clone(),
        shard_id: req.shard_id.clone(),
        source: text_source(req.source.as_ref(), with_details),
        source_is_sensitive: true,
        ..RequestFields::default()
    }
}

fn extract_cluster_settings(request: &OperationRequest, with_details: bool) -> RequestFields {
    let OperationRequest::ClusterUpdateSettings(req) = request else {
        return RequestFields::default();
    };
    let source = if with_details {
        combine_sources(&[
            ("persistent_settings", req.persistent.as_deref()),
            ("transient_settings", req.transient.as_deref()),
        ])
    } else {
        None
    };
    RequestFields {
        source,
        ..RequestFields::default()
    }
}

fn extract_reindex(request: &OperationRequest, with_details: bool) -> RequestFields {
    let OperationRequest::Reindex(req) = request else {
        return RequestFields::default();
    };
    let mut indices = normalize_indices(req.source.indices.as_deref());
    indices.extend(req.destination.index.iter().cloned());
    RequestFields {
        indices,
        options: req.source.options,
        doc_types: req.destination.doc_type.iter().cloned().collect(),
        source: text_source(req.source.source.as_ref(), with_details),
        ..RequestFields::default()
    }
}

fn indices_request(request: &OperationRequest) -> Option<&IndicesRequest> {
    match request {
        OperationRequest::DeleteIndex(req)
        | OperationRequest::Search(req)
        | OperationRequest::DeleteByQuery(req)
        | OperationRequest::UpdateByQuery(req)
        | OperationRequest::PutMapping(req)
        | OperationRequest::MultiIndex { request: req, .. } => Some(req),
        _ => None,
    }
}

fn extract_indices_request(request: &OperationRequest, with_details: bool) -> RequestFields {
    let Some(req) = indices_request(request) else {
        return RequestFields::default();
    };
    RequestFields {
        indices: normalize_indices(req.indices.as_deref()),
        options: req.options,
        doc_types: req.doc_types.clone(),
        source: text_source(req.source.as_ref(), with_details),
        ..RequestFields::default()
    }
}

fn extract_generic(_request: &OperationRequest, _with_details: bool) -> RequestFields {
    RequestFields::default()
}

/// Builds audit records from operation requests.
#[derive(Clone)]
pub struct RequestResolver {
    config_index: String,
    resolve_indices: bool,
    index_resolver: Option<Arc<dyn IndexResolver>>,
    cluster: Option<Arc<dyn ClusterStateProvider>>,
}

impl fmt::Debug for RequestResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestResolver")
            .field("config_index", &self.config_index)
            .field("resolve_indices", &self.resolve_indices)
            .field("has_index_resolver", &self.index_resolver.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestResolver {
    /// Creates a resolver protecting `config_index`, without index
    /// resolution.
    #[must_use]
    pub fn new(config_index: impl Into<String>) -> Self {
        Self {
            config_index: config_index.into(),
            resolve_indices: true,
            index_resolver: None,
            cluster: None,
        }
    }

    /// Plugs in index resolution.
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

    /// Turns index resolution on or off.
    #[must_use]
    pub const fn resolve_indices(mut self, enabled: bool) -> Self {
        self.resolve_indices = enabled;
        self
    }

    /// Returns the protected configuration index name.
    #[must_use]
    pub fn config_index(&self) -> &str {
        &self.config_index
    }

    /// Produces the records for one request.
    ///
    /// Shard-level bulk requests yield one record per item when bulk
    /// resolution is on. Any bulk request yields nothing when it is off,
    /// unless the category is security critical, in which case one coarse
    /// record is produced. Everything else yields exactly one record.
    #[must_use]
    pub fn resolve(&self, params: &ResolveParams<'_>) -> Vec<AuditRecord> {
        match params.request {
            OperationRequest::BulkShard(bulk) if params.resolve_bulk => bulk
                .items
                .iter()
                .map(|item| self.single(params, item, Some(&bulk.shard_id)))
                .collect(),
            request if request.is_bulk() && !params.resolve_bulk => {
                if params.category.is_security_critical() {
                    vec![self.single(params, request, None)]
                } else {
                    tracing::trace!(
                        target: "vigil_audit",
                        category = %params.category,
                        request = request.type_name(),
                        "skipped unresolved bulk request"
                    );
                    Vec::new()
                }
            }
            request => vec![self.single(params, request, None)],
        }
    }

    fn single(
        &self,
        params: &ResolveParams<'_>,
        request: &OperationRequest,
        parent_shard: Option<&ShardId>,
    ) -> AuditRecord {
        let fields = extractor_for(request.kind())(request, params.with_details);
        let resolved = self.resolve_concrete(&fields);

        let source = match fields.source {
            Some(source)
                if fields.source_is_sensitive
                    && self.touches_config_index(fields.indices.iter().chain(&resolved)) =>
            {
                tracing::debug!(
                    target: "vigil_audit",
                    request = request.type_name(),
                    "omitting source of configuration index write"
                );
                None
            }
            other => other,
        };

        let shard_id = parent_shard.or(fields.shard_id.as_ref()).map(ToString::to_string);

        let mut builder = AuditRecord::builder(params.category)
            .origin(params.origin)
            .effective_user(params.effective_user)
            .text(Field::InitiatingUser, params.initiating_user)
            .flag(Field::EffectiveUserIsAdmin, params.is_admin)
            .remote_address(params.remote_address)
            .text(Field::Action, params.action)
            .text(Field::RequestClass, Some(request.type_name()))
            .text(Field::Privilege, params.privilege)
            .list(Field::Indices, fields.indices)
            .list(Field::ResolvedIndices, resolved)
            .list(Field::DocTypes, fields.doc_types)
            .text(Field::DocId, fields.doc_id)
            .text(Field::ShardId, shard_id)
            .text(Field::RequestBody, source)
            .map(Field::Headers, params.headers)
            .exception(params.exception);

        if let Some(task) = params.task {
            if let Some(parent) = &task.parent_id {
                builder = builder
                    .text(Field::TaskId, Some(&task.id))
                    .text(Field::TaskParentId, Some(parent));
            }
        }

        builder.build()
    }

    fn resolve_concrete(&self, fields: &RequestFields) -> Vec<String> {
        if !self.resolve_indices || fields.indices.is_empty() {
            return Vec::new();
        }
        let Some(resolver) = &self.index_resolver else {
            return Vec::new();
        };
        let state = self
            .cluster
            .as_ref()
            .map_or_else(ClusterState::default, |c| c.state());
        resolver.resolve_concrete_indices(&state, &fields.options, &fields.indices)
    }

    fn touches_config_index<'a, I>(&self, indices: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let protected = WildcardPattern::new(&self.config_index);
        indices.into_iter().any(|index| {
            protected.matches(index) || WildcardPattern::new(index).matches(&self.config_index)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{StaticClusterState, WildcardIndexResolver};
    use crate::request::{
        BulkShardRequest, ClusterSettingsRequest, CompositeRequest, CreateIndexRequest, DocRequest,
        ReindexRequest,
    };
    use proptest::prelude::*;

    const DOC: &[u8] = br#"{"title": "Dune"}"#;

    fn resolver() -> RequestResolver {
        let state = ClusterState::with_indices(["movies", "searchguard", "logs-1", "logs-2"]);
        RequestResolver::new("searchguard").with_index_resolver(
            Arc::new(WildcardIndexResolver),
            Some(Arc::new(StaticClusterState::new(state))),
        )
    }

    fn params<'a>(
        category: Category,
        request: &'a OperationRequest,
        headers: &'a BTreeMap<String, String>,
    ) -> ResolveParams<'a> {
        ResolveParams {
            category,
            origin: Origin::Transport,
            action: Some("indices:data/write/index"),
            privilege: None,
            effective_user: Some("alice"),
            is_admin: None,
            initiating_user: None,
            remote_address: Some("10.0.0.1"),
            request,
            headers,
            task: None,
            with_details: true,
            resolve_bulk: false,
            exception: None,
        }
    }

    fn bulk(n: usize) -> OperationRequest {
        OperationRequest::BulkShard(BulkShardRequest {
            shard_id: ShardId::new("movies", 2),
            items: (0..n)
                .map(|i| {
                    OperationRequest::Index(
                        DocRequest::new("movies").with_id(i.to_string()).with_source(DOC.to_vec()),
                    )
                })
                .collect(),
        })
    }

    // ===========================================
    // Single requests
    // ===========================================

    #[test]
    fn index_request_fields() {
        let request = OperationRequest::Index(
            DocRequest::new("movies")
                .with_type("doc")
                .with_id("1")
                .with_source(DOC.to_vec())
                .with_shard(ShardId::new("movies", 0)),
        );
        let headers = BTreeMap::from([("X-Opaque-Id".to_string(), "trace-1".to_string())]);
        let records = resolver().resolve(&params(Category::GrantedPrivileges, &request, &headers));
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.category(), Category::GrantedPrivileges);
        assert_eq!(record.get_str(Field::EffectiveUser), Some("alice"));
        assert_eq!(record.get_str(Field::RequestClass), Some("IndexRequest"));
        assert_eq!(record.get_str(Field::Action), Some("indices:data/write/index"));
        assert_eq!(record.get_str(Field::DocId), Some("1"));
        assert_eq!(record.get_str(Field::ShardId), Some("[movies][0]"));
        assert_eq!(record.get_str(Field::RequestBody), Some(r#"{"title":"Dune"}"#));
        assert_eq!(record.get(Field::ResolvedIndices), Some(&serde_json::json!(["movies"])));
        assert_eq!(record.get(Field::Headers), Some(&serde_json::json!({"X-Opaque-Id": "trace-1"})));
        assert!(!record.contains(Field::Privilege));
    }

    #[test]
    fn config_index_write_never_includes_source() {
        let headers = BTreeMap::new();
        for index in ["searchguard", "searchg*"] {
            let request = OperationRequest::Index(DocRequest::new(index).with_source(DOC.to_vec()));
            let records = resolver().resolve(&params(Category::SgIndexAttempt, &request, &headers));
            assert!(!records[0].contains(Field::RequestBody), "source leaked for {index}");
        }
    }

    #[test]
    fn other_index_write_includes_source() {
        let headers = BTreeMap::new();
        let request = OperationRequest::Update(DocRequest::new("movies").with_source(DOC.to_vec()));
        let records = resolver().resolve(&params(Category::GrantedPrivileges, &request, &headers));
        assert!(records[0].contains(Field::RequestBody));
    }

    #[test]
    fn search_on_config_index_keeps_source() {
        let headers = BTreeMap::new();
        let request = OperationRequest::Search(
            IndicesRequest::new(["searchguard"]).with_source(br#"{"query":{"match_all":{}}}"#.to_vec()),
        );
        let records = resolver().resolve(&params(Category::MissingPrivileges, &request, &headers));
        assert!(records[0].contains(Field::RequestBody));
    }

    #[test]
    fn details_off_omits_source() {
        let headers = BTreeMap::new();
        let request = OperationRequest::Index(DocRequest::new("movies").with_source(DOC.to_vec()));
        let mut p = params(Category::GrantedPrivileges, &request, &headers);
        p.with_details = false;
        let records = resolver().resolve(&p);
        assert!(!records[0].contains(Field::RequestBody));
    }

    #[test]
    fn wildcard_search_resolves_indices() {
        let headers = BTreeMap::new();
        let request = OperationRequest::Search(IndicesRequest::new(["logs-*"]).with_types(["doc"]));
        let records = resolver().resolve(&params(Category::GrantedPrivileges, &request, &headers));
        assert_eq!(records[0].get(Field::Indices), Some(&serde_json::json!(["logs-*"])));
        assert_eq!(
            records[0].get(Field::ResolvedIndices),
            Some(&serde_json::json!(["logs-1", "logs-2"]))
        );
        assert_eq!(records[0].get(Field::DocTypes), Some(&serde_json::json!(["doc"])));
    }

    #[test]
    fn without_index_resolver_no_resolved_indices() {
        let headers = BTreeMap::new();
        let request = OperationRequest::Search(IndicesRequest::new(["logs-*"]));
        let records = RequestResolver::new("searchguard")
            .resolve(&params(Category::GrantedPrivileges, &request, &headers));
        assert!(records[0].contains(Field::Indices));
        assert!(!records[0].contains(Field::ResolvedIndices));
    }

    #[test]
    fn cluster_settings_source() {
        let headers = BTreeMap::new();
        let request = OperationRequest::ClusterUpdateSettings(ClusterSettingsRequest {
            persistent: Some(br#"{"cluster.routing.allocation.enable":"none"}"#.to_vec()),
            transient: None,
        });
        let records = resolver().resolve(&params(Category::GrantedPrivileges, &request, &headers));
        let body = records[0].get_str(Field::RequestBody).unwrap();
        assert!(body.contains("persistent_settings"));
        assert!(!body.contains("transient_settings"));
    }

    #[test]
    fn reindex_collects_source_and_destination() {
        let headers = BTreeMap::new();
        let request = OperationRequest::Reindex(ReindexRequest {
            source: IndicesRequest::new(["movies"]),
            destination: DocRequest::new("movies-v2").with_type("doc"),
        });
        let records = resolver().resolve(&params(Category::GrantedPrivileges, &request, &headers));
        assert_eq!(
            records[0].get(Field::Indices),
            Some(&serde_json::json!(["movies", "movies-v2"]))
        );
    }

    #[test]
    fn create_index_on_config_index_hides_body() {
        let headers = BTreeMap::new();
        let request = OperationRequest::CreateIndex(CreateIndexRequest {
            index: Some("searchguard".to_string()),
            source: Some(br#"{"settings":{}}"#.to_vec()),
        });
        let records = resolver().resolve(&params(Category::SgIndexAttempt, &request, &headers));
        assert!(!records[0].contains(Field::RequestBody));
    }

    #[test]
    fn unknown_request_has_generic_fields_only() {
        let headers = BTreeMap::new();
        let request = OperationRequest::other("NodesInfoRequest");
        let records = resolver().resolve(&params(Category::MissingPrivileges, &request, &headers));
        let record = &records[0];
        assert_eq!(record.get_str(Field::RequestClass), Some("NodesInfoRequest"));
        assert!(!record.contains(Field::Indices));
        assert!(!record.contains(Field::RequestBody));
    }

    #[test]
    fn task_ids_require_parent() {
        let headers = BTreeMap::new();
        let request = OperationRequest::other("X");

        let root = TaskInfo::new("node:1");
        let mut p = params(Category::MissingPrivileges, &request, &headers);
        p.task = Some(&root);
        assert!(!resolver().resolve(&p)[0].contains(Field::TaskId));

        let child = TaskInfo::new("node:2").with_parent("node:1");
        p.task = Some(&child);
        let record = &resolver().resolve(&p)[0];
        assert_eq!(record.get_str(Field::TaskId), Some("node:2"));
        assert_eq!(record.get_str(Field::TaskParentId), Some("node:1"));
    }

    #[test]
    fn normalizes_null_index_arrays() {
        assert!(normalize_indices(None).is_empty());
        assert!(normalize_indices(Some(&[None][..])).is_empty());
        assert_eq!(
            normalize_indices(Some(&[Some("a".to_string()), None][..])),
            vec!["a".to_string()]
        );
        let request = OperationRequest::DeleteIndex(IndicesRequest::from_raw(Some(vec![None])));
        let headers = BTreeMap::new();
        let records = resolver().resolve(&params(Category::GrantedPrivileges, &request, &headers));
        assert!(!records[0].contains(Field::Indices));
    }

    // ===========================================
    // Bulk handling
    // ===========================================

    #[test]
    fn bulk_fan_out_carries_parent_shard() {
        let headers = BTreeMap::new();
        let request = bulk(3);
        let mut p = params(Category::GrantedPrivileges, &request, &headers);
        p.resolve_bulk = true;
        let records = resolver().resolve(&p);
        assert_eq!(records.len(), 3);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.get_str(Field::ShardId), Some("[movies][2]"));
            assert_eq!(record.get_str(Field::RequestClass), Some("IndexRequest"));
            assert_eq!(record.get_str(Field::DocId), Some(i.to_string().as_str()));
        }
    }

    #[test]
    fn unresolved_bulk_suppressed_unless_critical() {
        let headers = BTreeMap::new();
        let request = bulk(5);
        assert!(resolver().resolve(&params(Category::Authenticated, &request, &headers)).is_empty());

        let records = resolver().resolve(&params(Category::MissingPrivileges, &request, &headers));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str(Field::RequestClass), Some("BulkShardRequest"));
    }

    #[test]
    fn composite_is_not_fanned_out() {
        let headers = BTreeMap::new();
        let request = OperationRequest::Composite(CompositeRequest {
            type_name: "BulkRequest".to_string(),
            requests: vec![OperationRequest::Delete(DocRequest::new("movies").with_id("1"))],
        });
        let mut p = params(Category::GrantedPrivileges, &request, &headers);
        assert!(resolver().resolve(&p).is_empty());
        p.resolve_bulk = true;
        let records = resolver().resolve(&p);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str(Field::RequestClass), Some("BulkRequest"));
    }

    proptest! {
        #[test]
        fn prop_bulk_yields_one_record_per_item(n in 0usize..40) {
            let headers = BTreeMap::new();
            let request = bulk(n);
            let mut p = params(Category::GrantedPrivileges, &request, &headers);
            p.resolve_bulk = true;
            let records = resolver().resolve(&p);
            prop_assert_eq!(records.len(), n);
            prop_assert!(records.iter().all(|r| r.get_str(Field::ShardId) == Some("[movies][2]")));
        }
    }
}
