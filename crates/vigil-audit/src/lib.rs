//! Audit-event pipeline for an access-control layer.
//!
//! Security-relevant operations (logins, privilege checks, configuration
//! index access, TLS failures) are turned into [`AuditRecord`]s and handed
//! to a single configured [`AuditSink`].
//!
//! # Flow
//!
//! 1. The host calls one of the [`AuditLog`] operations with the request and
//!    an explicit [`RequestContext`].
//! 2. The [`FilterEngine`] decides whether the event is recorded.
//! 3. The [`RequestResolver`] builds one or more records, fanning shard-level
//!    bulk requests out per item.
//! 4. The [`Dispatcher`] delivers each record, on the caller's thread or
//!    through a bounded worker pool.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_audit::{
//!     AuditConfig, AuditLog, AuditRequest, InMemoryDocumentStore, RequestContext, RestRequest,
//!     SinkContext,
//! };
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let config = AuditConfig::from_json(
//!     r#"{ "type": "internal_elasticsearch", "threadpool_size": 0 }"#,
//! ).unwrap();
//! let log = AuditLog::new(config, SinkContext::default().with_document_store(store.clone()));
//!
//! let request = RestRequest::new("POST", "/_login");
//! let ctx = RequestContext::new().with_remote_address("203.0.113.9");
//! log.log_failed_login("mallory", &AuditRequest::Rest(&request), &ctx);
//! log.close();
//!
//! assert_eq!(store.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod category;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod facade;
pub mod filter;
pub mod index;
pub mod record;
pub mod request;
pub mod resolver;
pub mod sink;
pub mod source;
pub mod wildcard;

pub use category::{Category, CategoryFlags};
pub use config::{AuditConfig, FilterConfig};
pub use context::{RequestContext, TaskInfo, INTERNAL_WRITE_MARKER};
pub use dispatcher::{DispatchConfig, DispatchStats, Dispatcher, DispatcherState};
pub use error::{AuditError, Result};
pub use facade::{AuditLog, AuditLogBuilder};
pub use filter::{FilterEngine, FilterSubject};
pub use index::{
    ClusterState, ClusterStateProvider, IndexResolver, StaticClusterState, WildcardIndexResolver,
};
pub use record::{AuditRecord, AuditRecordBuilder, Field, Origin};
pub use request::{
    AuditRequest, BulkShardRequest, ClusterSettingsRequest, CompositeRequest, CreateIndexRequest,
    DocRequest, IndicesOptions, IndicesRequest, OperationRequest, ReindexRequest, RequestKind,
    RestRequest, ShardId,
};
pub use resolver::{RequestResolver, ResolveParams};
pub use sink::{
    AuditSink, DebugSink, DocumentStore, InMemoryDocumentStore, IndexDocument, IndexNamePattern,
    SinkContext, SinkRegistry, SinkSettings, StorageSink,
};
pub use wildcard::{WildcardMatcher, WildcardPattern};
